use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;

fn default_listen_port() -> u16 {
    8090
}

fn default_deadline_secs() -> u64 {
    45
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackConfig {
    pub database_url: String,
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// Bearer token for the internal create endpoint. Unset disables it.
    #[serde(default)]
    pub internal_token: Option<String>,
    /// Upper bound on one provider round trip, retries included.
    #[serde(default = "default_deadline_secs")]
    pub payment_deadline_secs: u64,
}

impl CallbackConfig {
    pub fn load() -> Result<Self> {
        let config_paths = ["/etc/caramba/payments.toml", "./payments.toml"];

        for path in config_paths {
            if let Ok(contents) = fs::read_to_string(path) {
                tracing::info!("Loading config from {}", path);
                return toml::from_str(&contents).with_context(|| format!("Invalid config in {}", path));
            }
        }

        tracing::info!("Loading config from environment");
        Ok(Self {
            database_url: std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            listen_port: std::env::var("LISTEN_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or_else(default_listen_port),
            internal_token: std::env::var("INTERNAL_TOKEN").ok().filter(|t| !t.trim().is_empty()),
            payment_deadline_secs: std::env::var("PAYMENT_DEADLINE_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_deadline_secs),
        })
    }
}
