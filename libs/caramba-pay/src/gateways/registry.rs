use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::error::PaymentError;
use crate::models::GatewayConfig;
use crate::settings::SettingsProvider;

pub const CALLBACK_BASE_KEY: &str = "payment_callback_base";

struct ProviderSpec {
    id: &'static str,
    /// (settings key, credential name)
    credentials: &'static [(&'static str, &'static str)],
    /// Public credential the provider accepts in sandbox mode.
    sandbox_credential: Option<(&'static str, &'static str)>,
}

const PROVIDERS: &[ProviderSpec] = &[
    ProviderSpec {
        id: "zarinpal",
        credentials: &[("zarinpal_merchant_id", "merchant_id")],
        sandbox_credential: None,
    },
    ProviderSpec {
        id: "zibal",
        credentials: &[("zibal_merchant", "merchant")],
        sandbox_credential: Some(("merchant", "zibal")),
    },
    ProviderSpec {
        id: "idpay",
        credentials: &[("idpay_api_key", "api_key")],
        sandbox_credential: None,
    },
    ProviderSpec {
        id: "nextpay",
        credentials: &[("nextpay_api_key", "api_key")],
        sandbox_credential: None,
    },
    ProviderSpec {
        id: "aqayepardakht",
        credentials: &[("aqayepardakht_pin", "pin")],
        sandbox_credential: Some(("pin", "sandbox")),
    },
    ProviderSpec {
        id: "vandar",
        credentials: &[("vandar_api_key", "api_key")],
        sandbox_credential: None,
    },
];

/// Ids of every provider the registry knows how to configure.
pub fn known_providers() -> impl Iterator<Item = &'static str> {
    PROVIDERS.iter().map(|p| p.id)
}

fn is_truthy(value: Option<&str>) -> bool {
    matches!(
        value.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("true") | Some("1") | Some("yes") | Some("on")
    )
}

/// Enabled gateway configurations, fixed at construction. To pick up new
/// settings, build a new registry.
#[derive(Debug, Clone, Default)]
pub struct GatewayRegistry {
    configs: Vec<GatewayConfig>,
}

impl GatewayRegistry {
    pub async fn load(settings: &dyn SettingsProvider) -> Self {
        let callback_base = settings
            .get_setting(CALLBACK_BASE_KEY)
            .await
            .map(|v| v.trim().trim_end_matches('/').to_string())
            .filter(|v| !v.is_empty());

        let mut configs = Vec::new();
        for spec in PROVIDERS {
            let enabled = is_truthy(settings.get_setting(&format!("{}_enabled", spec.id)).await.as_deref());
            if !enabled {
                continue;
            }
            let Some(base) = callback_base.as_deref() else {
                warn!("Gateway {} is enabled but {} is not set, skipping", spec.id, CALLBACK_BASE_KEY);
                continue;
            };
            let sandbox_mode = is_truthy(settings.get_setting(&format!("{}_sandbox", spec.id)).await.as_deref());

            let mut credentials = BTreeMap::new();
            let mut missing = Vec::new();
            for (key, name) in spec.credentials {
                match settings.get_setting(key).await.filter(|v| !v.trim().is_empty()) {
                    Some(value) => {
                        credentials.insert(name.to_string(), value.trim().to_string());
                    }
                    None => match spec.sandbox_credential {
                        Some((sandbox_name, value)) if sandbox_mode && sandbox_name == *name => {
                            credentials.insert(name.to_string(), value.to_string());
                        }
                        _ => missing.push(*key),
                    },
                }
            }
            if !missing.is_empty() {
                warn!("Gateway {} is enabled but missing {}, skipping", spec.id, missing.join(", "));
                continue;
            }

            configs.push(GatewayConfig {
                provider_id: spec.id.to_string(),
                enabled: true,
                sandbox_mode,
                credentials,
                callback_url: format!("{}/payments/{}/callback", base, spec.id),
            });
        }

        let registry = Self { configs };
        info!("Payment gateways enabled: {:?}", registry.enabled_providers());
        registry
    }

    /// Builds a registry from ready-made configs. Disabled entries are kept
    /// but never served; a later config replaces an earlier one with the same id.
    pub fn from_configs(configs: impl IntoIterator<Item = GatewayConfig>) -> Self {
        let mut out: Vec<GatewayConfig> = Vec::new();
        for config in configs {
            match out.iter_mut().find(|c| c.provider_id == config.provider_id) {
                Some(existing) => *existing = config,
                None => out.push(config),
            }
        }
        Self { configs: out }
    }

    pub fn enabled_providers(&self) -> Vec<&str> {
        self.configs
            .iter()
            .filter(|c| c.enabled)
            .map(|c| c.provider_id.as_str())
            .collect()
    }

    pub fn config_for(&self, provider_id: &str) -> Result<&GatewayConfig, PaymentError> {
        self.configs
            .iter()
            .find(|c| c.provider_id == provider_id && c.enabled)
            .ok_or_else(|| PaymentError::gateway_disabled(provider_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PaymentErrorKind;
    use crate::settings::StaticSettings;

    fn base() -> StaticSettings {
        StaticSettings::new().with(CALLBACK_BASE_KEY, "https://pay.example/")
    }

    #[tokio::test]
    async fn only_enabled_providers_with_credentials_are_loaded() {
        let settings = base()
            .with("zarinpal_enabled", "true")
            .with("zarinpal_merchant_id", "zp-merchant")
            .with("idpay_enabled", "1")
            .with("idpay_api_key", "  ")
            .with("vandar_enabled", "false")
            .with("vandar_api_key", "v-key")
            .with("nextpay_enabled", "TRUE")
            .with("nextpay_api_key", "np-key");

        let registry = GatewayRegistry::load(&settings).await;
        assert_eq!(registry.enabled_providers(), vec!["zarinpal", "nextpay"]);

        let zp = registry.config_for("zarinpal").unwrap();
        assert_eq!(zp.credential("merchant_id"), Ok("zp-merchant"));
        assert_eq!(zp.callback_url, "https://pay.example/payments/zarinpal/callback");
        assert!(!zp.sandbox_mode);
    }

    #[tokio::test]
    async fn sandbox_supplies_public_credentials() {
        let settings = base()
            .with("zibal_enabled", "true")
            .with("zibal_sandbox", "true")
            .with("aqayepardakht_enabled", "true")
            .with("aqayepardakht_sandbox", "false");

        let registry = GatewayRegistry::load(&settings).await;
        assert_eq!(registry.enabled_providers(), vec!["zibal"]);
        assert_eq!(registry.config_for("zibal").unwrap().credential("merchant"), Ok("zibal"));
    }

    #[tokio::test]
    async fn nothing_loads_without_a_callback_base() {
        let settings = StaticSettings::new()
            .with("zibal_enabled", "true")
            .with("zibal_merchant", "m");
        assert!(GatewayRegistry::load(&settings).await.enabled_providers().is_empty());
    }

    #[test]
    fn unknown_and_disabled_are_gateway_disabled() {
        let registry = GatewayRegistry::from_configs([GatewayConfig {
            provider_id: "zibal".into(),
            enabled: false,
            sandbox_mode: true,
            credentials: BTreeMap::new(),
            callback_url: String::new(),
        }]);

        for id in ["zibal", "paypal"] {
            let err = registry.config_for(id).unwrap_err();
            assert_eq!(err.kind, PaymentErrorKind::GatewayDisabled);
            assert_eq!(err.provider, id);
        }
        assert!(registry.enabled_providers().is_empty());
    }
}
