use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use tracing::debug;

use crate::models::{Metadata, NewTransaction, Transaction, TransactionStatus};
use crate::store::{StoreError, StoreResult, TransactionStore};

#[derive(Debug, Clone)]
pub struct TransactionRepository {
    pool: SqlitePool,
}

impl TransactionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_transaction(row: &SqliteRow) -> StoreResult<Transaction> {
        let status: String = row.try_get("status")?;
        let metadata: String = row.try_get("metadata")?;
        Ok(Transaction {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            provider: row.try_get("provider")?,
            token: row.try_get("token")?,
            amount: row.try_get("amount")?,
            description: row.try_get("description")?,
            metadata: serde_json::from_str::<Metadata>(&metadata)?,
            status: status.parse::<TransactionStatus>().map_err(StoreError::Corrupt)?,
            ref_id: row.try_get("ref_id")?,
            card_mask: row.try_get("card_mask")?,
            failure_code: row.try_get("failure_code")?,
            failure_message: row.try_get("failure_message")?,
            credited_at: row.try_get::<Option<DateTime<Utc>>, _>("credited_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    pub async fn get_by_id(&self, id: i64) -> StoreResult<Option<Transaction>> {
        let row = sqlx::query("SELECT * FROM payment_transactions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_transaction).transpose()
    }

    pub async fn get_for_user(&self, user_id: i64, limit: i64) -> StoreResult<Vec<Transaction>> {
        let rows = sqlx::query(
            "SELECT * FROM payment_transactions WHERE user_id = ? ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_transaction).collect()
    }
}

#[async_trait]
impl TransactionStore for TransactionRepository {
    async fn insert_pending(&self, tx: NewTransaction) -> StoreResult<Transaction> {
        let metadata = serde_json::to_string(&tx.metadata)?;
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO payment_transactions
                (user_id, provider, token, amount, description, metadata, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, 'pending', ?, ?)
            RETURNING *
            "#,
        )
        .bind(tx.user_id)
        .bind(&tx.provider)
        .bind(&tx.token)
        .bind(tx.amount)
        .bind(&tx.description)
        .bind(metadata)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => {
                let record = Self::row_to_transaction(&row)?;
                debug!("Stored pending transaction #{} ({}:{})", record.id, record.provider, record.token);
                Ok(record)
            }
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(StoreError::Duplicate {
                provider: tx.provider,
                token: tx.token,
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn find_by_token(&self, provider: &str, token: &str) -> StoreResult<Option<Transaction>> {
        let row = sqlx::query("SELECT * FROM payment_transactions WHERE provider = ? AND token = ?")
            .bind(provider)
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_transaction).transpose()
    }

    async fn mark_verified(
        &self,
        id: i64,
        ref_id: Option<&str>,
        card_mask: Option<&str>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE payment_transactions
            SET status = 'verified', ref_id = ?, card_mask = ?, updated_at = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(ref_id)
        .bind(card_mask)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_failed(&self, id: i64, code: &str, message: &str) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE payment_transactions
            SET status = 'failed', failure_code = ?, failure_message = ?, updated_at = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(code)
        .bind(message)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
