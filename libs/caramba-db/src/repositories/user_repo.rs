use chrono::Utc;
use sqlx::SqlitePool;
use tracing::info;

use crate::store::StoreResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreditOutcome {
    /// Balance was increased; carries the new balance.
    Credited(i64),
    /// The transaction was already credited or is not verified.
    Skipped,
}

/// Balance side of a verified payment.
///
/// Crediting is keyed by the payment transaction: the `credited_at` marker and
/// the balance update commit together, so a transaction credits at most once
/// even if the callback is replayed after a crash.
#[derive(Debug, Clone)]
pub struct UserRepository {
    pool: SqlitePool,
}

impl UserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get_balance(&self, user_id: i64) -> StoreResult<i64> {
        let balance: Option<i64> = sqlx::query_scalar("SELECT balance FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(balance.unwrap_or(0))
    }

    pub async fn credit_from_transaction(&self, transaction_id: i64) -> StoreResult<CreditOutcome> {
        let mut tx = self.pool.begin().await?;

        let claimed: Option<(i64, i64)> = sqlx::query_as(
            r#"
            UPDATE payment_transactions
            SET credited_at = ?
            WHERE id = ? AND status = 'verified' AND credited_at IS NULL
            RETURNING user_id, amount
            "#,
        )
        .bind(Utc::now())
        .bind(transaction_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((user_id, amount)) = claimed else {
            tx.rollback().await?;
            return Ok(CreditOutcome::Skipped);
        };

        let balance: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO users (id, balance) VALUES (?, ?)
            ON CONFLICT(id) DO UPDATE SET balance = balance + excluded.balance, updated_at = CURRENT_TIMESTAMP
            RETURNING balance
            "#,
        )
        .bind(user_id)
        .bind(amount)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        info!("Credited {} to user {} from payment #{}", amount, user_id, transaction_id);
        Ok(CreditOutcome::Credited(balance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Metadata, NewTransaction};
    use crate::repositories::transaction_repo::TransactionRepository;
    use crate::store::TransactionStore;

    async fn verified_payment(repo: &TransactionRepository, token: &str, amount: i64) -> i64 {
        let tx = repo
            .insert_pending(NewTransaction {
                user_id: 9,
                provider: "zibal".to_string(),
                token: token.to_string(),
                amount,
                description: String::new(),
                metadata: Metadata::new(),
            })
            .await
            .unwrap();
        tx.id
    }

    #[tokio::test]
    async fn credits_once_per_verified_transaction() {
        let pool = crate::connect_in_memory().await.unwrap();
        let txs = TransactionRepository::new(pool.clone());
        let users = UserRepository::new(pool);

        let id = verified_payment(&txs, "111", 25_000).await;
        assert_eq!(users.credit_from_transaction(id).await.unwrap(), CreditOutcome::Skipped);

        txs.mark_verified(id, Some("r"), None).await.unwrap();
        assert_eq!(users.credit_from_transaction(id).await.unwrap(), CreditOutcome::Credited(25_000));
        assert_eq!(users.credit_from_transaction(id).await.unwrap(), CreditOutcome::Skipped);

        let second = verified_payment(&txs, "222", 5_000).await;
        txs.mark_verified(second, None, None).await.unwrap();
        assert_eq!(users.credit_from_transaction(second).await.unwrap(), CreditOutcome::Credited(30_000));
        assert_eq!(users.get_balance(9).await.unwrap(), 30_000);
    }
}
