use caramba_db::models::{Metadata, TransactionStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::GatewayError;

/// Per-provider configuration, immutable for the lifetime of a registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub provider_id: String,
    pub enabled: bool,
    pub sandbox_mode: bool,
    pub credentials: BTreeMap<String, String>,
    /// Where the provider sends the user back after paying.
    pub callback_url: String,
}

impl GatewayConfig {
    pub fn credential(&self, name: &str) -> Result<&str, GatewayError> {
        self.credentials
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| {
                GatewayError::rejected(
                    "missing_credential",
                    format!("{} is not configured for {}", name, self.provider_id),
                )
            })
    }
}

/// Canonical payment request. `amount` is in Toman.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentRequest {
    pub user_id: i64,
    pub amount: i64,
    pub description: String,
    pub metadata: Metadata,
}

/// What an adapter returns on a successful create call. `metadata` is the
/// request metadata plus anything the adapter must see again at verify time.
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedPayment {
    pub redirect_url: String,
    pub token: String,
    pub metadata: Metadata,
}

/// Returned by `create_payment` once the pending row is durable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentLink {
    pub transaction_id: i64,
    pub redirect_url: String,
    pub token: String,
}

/// Normalized verification result, identical across providers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub success: bool,
    pub ref_id: Option<String>,
    pub card_mask: Option<String>,
    pub error: Option<String>,
    pub error_code: Option<String>,
}

impl VerificationResult {
    pub fn verified(ref_id: Option<String>, card_mask: Option<String>) -> Self {
        Self {
            success: true,
            ref_id,
            card_mask,
            error: None,
            error_code: None,
        }
    }

    pub fn failed(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            ref_id: None,
            card_mask: None,
            error: Some(message.into()),
            error_code: Some(code.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerifyOutcome {
    pub transaction_id: i64,
    pub user_id: i64,
    pub amount: i64,
    pub status: TransactionStatus,
    pub result: VerificationResult,
    /// True only for the call that moved the row from pending to verified.
    pub newly_verified: bool,
}
