use async_trait::async_trait;
use caramba_db::models::{Metadata, Transaction};
use serde_json::Value;
use std::sync::Arc;

use crate::api_client::{ApiClient, ApiResponse};
use crate::error::GatewayError;
use crate::extract::{self, FieldPath};
use crate::models::{CreatedPayment, GatewayConfig, PaymentRequest, VerificationResult};

pub mod aqayepardakht;
pub mod idpay;
pub mod nextpay;
pub mod registry;
pub mod vandar;
pub mod zarinpal;
pub mod zibal;

pub use aqayepardakht::AqayePardakhtAdapter;
pub use idpay::IdPayAdapter;
pub use nextpay::NextPayAdapter;
pub use registry::GatewayRegistry;
pub use vandar::VandarAdapter;
pub use zarinpal::ZarinpalAdapter;
pub use zibal::ZibalAdapter;

/// One payment provider. Implementations translate the canonical request
/// into the provider's HTTP API and map its answers back. They never touch
/// the transaction store.
#[async_trait]
pub trait PaymentAdapter: Send + Sync {
    fn provider_id(&self) -> &'static str;

    /// Callback parameters that may carry the token, in lookup order.
    fn callback_token_keys(&self) -> &'static [&'static str];

    async fn create(
        &self,
        request: &PaymentRequest,
        config: &GatewayConfig,
    ) -> Result<CreatedPayment, GatewayError>;

    /// Verifies a stored pending transaction. `Ok` always means verified;
    /// every negative answer is an `Err`.
    async fn verify(
        &self,
        transaction: &Transaction,
        config: &GatewayConfig,
    ) -> Result<VerificationResult, GatewayError>;
}

/// All built-in adapters sharing one outbound client.
pub fn default_adapters(client: &ApiClient) -> Vec<Arc<dyn PaymentAdapter>> {
    vec![
        Arc::new(ZarinpalAdapter::new(client.clone())),
        Arc::new(ZibalAdapter::new(client.clone())),
        Arc::new(IdPayAdapter::new(client.clone())),
        Arc::new(NextPayAdapter::new(client.clone())),
        Arc::new(AqayePardakhtAdapter::new(client.clone())),
        Arc::new(VandarAdapter::new(client.clone())),
    ]
}

/// Currency a provider quotes amounts in. Canonical amounts are Toman.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmountUnit {
    Toman,
    Rial,
}

impl AmountUnit {
    pub fn scale(self, toman: i64) -> Result<i64, GatewayError> {
        if toman < 0 {
            return Err(GatewayError::rejected("invalid_amount", "amount must not be negative"));
        }
        let factor = match self {
            AmountUnit::Toman => 1,
            AmountUnit::Rial => 10,
        };
        toman
            .checked_mul(factor)
            .ok_or_else(|| GatewayError::rejected("invalid_amount", "amount is out of range"))
    }
}

/// Scales `toman` and enforces the provider's minimum, both in provider units.
pub(crate) fn provider_amount(unit: AmountUnit, toman: i64, minimum: i64) -> Result<i64, GatewayError> {
    let amount = unit.scale(toman)?;
    if amount < minimum {
        return Err(GatewayError::rejected(
            "amount_below_minimum",
            format!("amount {} is below the provider minimum of {}", amount, minimum),
        ));
    }
    Ok(amount)
}

/// Returns the order id to send, reusing `metadata.order_id` when the caller set one.
pub(crate) fn ensure_order_id(metadata: &Metadata) -> (String, Metadata) {
    let mut metadata = metadata.clone();
    let order_id = metadata
        .get("order_id")
        .filter(|id| !id.trim().is_empty())
        .cloned()
        .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
    metadata.insert("order_id".to_string(), order_id.clone());
    (order_id, metadata)
}

pub(crate) fn stored_order_id(transaction: &Transaction) -> Result<&str, GatewayError> {
    transaction.order_id().ok_or_else(|| {
        GatewayError::rejected(
            "missing_order_id",
            format!("transaction {} has no order_id in its metadata", transaction.id),
        )
    })
}

/// JSON body of a response the adapter can interpret. Transport failures,
/// exhausted 429/5xx retries and non-JSON bodies are all transport errors.
pub(crate) fn response_body(resp: &ApiResponse) -> Result<&Value, GatewayError> {
    if resp.is_transport_failure() || resp.is_server_error() {
        return Err(GatewayError::Transport(
            resp.error.clone().unwrap_or_else(|| "request failed".to_string()),
        ));
    }
    resp.body.as_ref().ok_or_else(|| {
        GatewayError::Transport(format!(
            "unreadable response (HTTP {}): {}",
            resp.status.unwrap_or_default(),
            truncate(&resp.text, 200)
        ))
    })
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((i, _)) => &text[..i],
        None => text,
    }
}

pub(crate) fn rejection(
    body: &Value,
    code_rules: &[FieldPath],
    message_rules: &[FieldPath],
) -> GatewayError {
    let code = extract::first_text(body, code_rules).unwrap_or_else(|| "unknown".to_string());
    let message = extract::first_text(body, message_rules)
        .unwrap_or_else(|| "payment was declined by the provider".to_string());
    GatewayError::Rejected { code, message }
}

/// A field that a successful response must carry.
pub(crate) fn required_text(body: &Value, rules: &[FieldPath], field: &str) -> Result<String, GatewayError> {
    extract::first_text(body, rules)
        .ok_or_else(|| GatewayError::Transport(format!("success response is missing {}", field)))
}

/// Compares the provider-reported amount with the expected one, both in
/// provider units. A response without an amount cannot be trusted as success.
pub(crate) fn check_amount(body: &Value, rules: &[FieldPath], expected: i64) -> Result<(), GatewayError> {
    match extract::first_integer(body, rules) {
        Some(reported) if reported == expected => Ok(()),
        Some(reported) => Err(GatewayError::AmountMismatch { expected, reported }),
        None => Err(GatewayError::Transport(
            "verify response carried no amount".to_string(),
        )),
    }
}
