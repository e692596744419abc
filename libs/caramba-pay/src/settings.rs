use async_trait::async_trait;
use std::collections::HashMap;

/// Read side of the external settings store.
#[async_trait]
pub trait SettingsProvider: Send + Sync {
    async fn get_setting(&self, key: &str) -> Option<String>;
}

/// Fixed settings map, for tests and for embedders that configure gateways in code.
#[derive(Debug, Clone, Default)]
pub struct StaticSettings {
    values: HashMap<String, String>,
}

impl StaticSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.values.insert(key.to_string(), value.to_string());
        self
    }

    pub fn insert(&mut self, key: &str, value: &str) {
        self.values.insert(key.to_string(), value.to_string());
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for StaticSettings {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

#[async_trait]
impl SettingsProvider for StaticSettings {
    async fn get_setting(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}
