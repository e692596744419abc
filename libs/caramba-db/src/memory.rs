use crate::models::{NewTransaction, Transaction, TransactionStatus};
use crate::store::{StoreError, StoreResult, TransactionStore};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct Rows {
    next_id: i64,
    transactions: Vec<Transaction>,
}

/// A thread-safe in-memory transaction store.
///
/// Every conditional transition runs under the write lock, so it gives the
/// same single-winner guarantee as the SQLite repository. Used by tests and by
/// embedders that do not need persistence across restarts.
#[derive(Default, Clone)]
pub struct InMemoryTransactionStore {
    rows: Arc<RwLock<Rows>>,
}

impl InMemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.transactions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn all(&self) -> Vec<Transaction> {
        self.rows.read().await.transactions.clone()
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn insert_pending(&self, tx: NewTransaction) -> StoreResult<Transaction> {
        let mut rows = self.rows.write().await;
        if rows
            .transactions
            .iter()
            .any(|t| t.provider == tx.provider && t.token == tx.token)
        {
            return Err(StoreError::Duplicate {
                provider: tx.provider,
                token: tx.token,
            });
        }

        rows.next_id += 1;
        let now = Utc::now();
        let record = Transaction {
            id: rows.next_id,
            user_id: tx.user_id,
            provider: tx.provider,
            token: tx.token,
            amount: tx.amount,
            description: tx.description,
            metadata: tx.metadata,
            status: TransactionStatus::Pending,
            ref_id: None,
            card_mask: None,
            failure_code: None,
            failure_message: None,
            credited_at: None,
            created_at: now,
            updated_at: now,
        };
        rows.transactions.push(record.clone());
        Ok(record)
    }

    async fn find_by_token(&self, provider: &str, token: &str) -> StoreResult<Option<Transaction>> {
        let rows = self.rows.read().await;
        Ok(rows
            .transactions
            .iter()
            .find(|t| t.provider == provider && t.token == token)
            .cloned())
    }

    async fn mark_verified(
        &self,
        id: i64,
        ref_id: Option<&str>,
        card_mask: Option<&str>,
    ) -> StoreResult<bool> {
        let mut rows = self.rows.write().await;
        match rows
            .transactions
            .iter_mut()
            .find(|t| t.id == id && t.status == TransactionStatus::Pending)
        {
            Some(t) => {
                t.status = TransactionStatus::Verified;
                t.ref_id = ref_id.map(str::to_string);
                t.card_mask = card_mask.map(str::to_string);
                t.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_failed(&self, id: i64, code: &str, message: &str) -> StoreResult<bool> {
        let mut rows = self.rows.write().await;
        match rows
            .transactions
            .iter_mut()
            .find(|t| t.id == id && t.status == TransactionStatus::Pending)
        {
            Some(t) => {
                t.status = TransactionStatus::Failed;
                t.failure_code = Some(code.to_string());
                t.failure_message = Some(message.to_string());
                t.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Metadata;

    fn new_tx(token: &str) -> NewTransaction {
        NewTransaction {
            user_id: 7,
            provider: "zibal".to_string(),
            token: token.to_string(),
            amount: 50_000,
            description: "top-up".to_string(),
            metadata: Metadata::new(),
        }
    }

    #[tokio::test]
    async fn ids_are_monotonic_and_tokens_unique_per_provider() {
        let store = InMemoryTransactionStore::new();
        let a = store.insert_pending(new_tx("t1")).await.unwrap();
        let b = store.insert_pending(new_tx("t2")).await.unwrap();
        assert!(b.id > a.id);

        let dup = store.insert_pending(new_tx("t1")).await;
        assert!(matches!(dup, Err(StoreError::Duplicate { .. })));

        let mut other_provider = new_tx("t1");
        other_provider.provider = "idpay".to_string();
        assert!(store.insert_pending(other_provider).await.is_ok());
        assert_eq!(store.len().await, 3);
    }

    #[tokio::test]
    async fn terminal_rows_never_transition_again() {
        let store = InMemoryTransactionStore::new();
        let tx = store.insert_pending(new_tx("t1")).await.unwrap();

        assert!(store.mark_verified(tx.id, Some("ref-1"), None).await.unwrap());
        assert!(!store.mark_verified(tx.id, Some("ref-2"), None).await.unwrap());
        assert!(!store.mark_failed(tx.id, "provider_rejected", "late").await.unwrap());

        let stored = store.find_by_token("zibal", "t1").await.unwrap().unwrap();
        assert_eq!(stored.status, TransactionStatus::Verified);
        assert_eq!(stored.ref_id.as_deref(), Some("ref-1"));
        assert!(stored.failure_code.is_none());
    }
}
