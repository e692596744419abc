use crate::models::{NewTransaction, Transaction};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("transaction for provider '{provider}' with token '{token}' already exists")]
    Duplicate { provider: String, token: String },
    #[error("failed to encode metadata: {0}")]
    Metadata(#[from] serde_json::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Durable record of payment attempts.
///
/// Status transitions are conditional: `mark_verified` and `mark_failed` only
/// touch a row that is still pending and report whether they did. Exactly one
/// concurrent caller can win a given transition.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Inserts a pending row. The row is durable when this returns `Ok`.
    async fn insert_pending(&self, tx: NewTransaction) -> StoreResult<Transaction>;

    async fn find_by_token(&self, provider: &str, token: &str) -> StoreResult<Option<Transaction>>;

    async fn mark_verified(
        &self,
        id: i64,
        ref_id: Option<&str>,
        card_mask: Option<&str>,
    ) -> StoreResult<bool>;

    async fn mark_failed(&self, id: i64, code: &str, message: &str) -> StoreResult<bool>;
}
