use anyhow::Result;
use async_trait::async_trait;
use caramba_db::repositories::SettingsRepository;
use caramba_pay::SettingsProvider;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Cached view of the `settings` table.
#[derive(Debug, Clone)]
pub struct SettingsService {
    repo: SettingsRepository,
    cache: Arc<RwLock<HashMap<String, String>>>,
}

impl SettingsService {
    pub async fn new(repo: SettingsRepository) -> Result<Self> {
        let service = Self {
            repo,
            cache: Arc::new(RwLock::new(HashMap::new())),
        };

        service.reload_cache().await?;
        Ok(service)
    }

    pub async fn reload_cache(&self) -> Result<()> {
        info!("Reloading settings cache from database");
        let rows = self.repo.get_all().await?;

        let mut cache = self.cache.write().await;
        cache.clear();
        cache.extend(rows);

        info!("Cache reloaded with {} items", cache.len());
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        self.cache.read().await.get(key).cloned()
    }
}

#[async_trait]
impl SettingsProvider for SettingsService {
    async fn get_setting(&self, key: &str) -> Option<String> {
        self.get(key).await
    }
}
