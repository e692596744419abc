use anyhow::{Context, Result};
use sqlx::SqlitePool;

/// Key-value settings table shared with the admin panel.
#[derive(Debug, Clone)]
pub struct SettingsRepository {
    pool: SqlitePool,
}

impl SettingsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get_all(&self) -> Result<Vec<(String, String)>> {
        let rows: Vec<(String, String)> = sqlx::query_as("SELECT key, value FROM settings")
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch settings")?;
        Ok(rows)
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch setting")?;
        Ok(value)
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO settings (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .context(format!("Failed to update setting {}", key))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connect_in_memory;

    #[tokio::test]
    async fn set_overwrites_existing_value() {
        let repo = SettingsRepository::new(connect_in_memory().await.unwrap());
        repo.set("zibal_enabled", "false").await.unwrap();
        repo.set("zibal_enabled", "true").await.unwrap();

        assert_eq!(repo.get("zibal_enabled").await.unwrap().as_deref(), Some("true"));
        assert_eq!(repo.get("missing").await.unwrap(), None);
        assert_eq!(repo.get_all().await.unwrap().len(), 1);
    }
}
