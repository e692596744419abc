use async_trait::async_trait;
use caramba_db::models::Transaction;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use super::{AmountUnit, PaymentAdapter, provider_amount, rejection, required_text, response_body};
use crate::api_client::{ApiClient, OutboundRequest};
use crate::error::GatewayError;
use crate::extract::{self, FieldPath};
use crate::models::{CreatedPayment, GatewayConfig, PaymentRequest, VerificationResult};

const PRODUCTION_BASE: &str = "https://payment.zarinpal.com/pg";
const SANDBOX_BASE: &str = "https://sandbox.zarinpal.com/pg";
const UNIT: AmountUnit = AmountUnit::Rial;
const MIN_AMOUNT: i64 = 1_000;

const CODE: &[FieldPath] = &[&["data", "code"], &["errors", "code"], &["code"]];
const MESSAGE: &[FieldPath] = &[&["data", "message"], &["errors", "message"], &["message"]];
const AUTHORITY: &[FieldPath] = &[&["data", "authority"], &["authority"]];
const REF_ID: &[FieldPath] = &[&["data", "ref_id"], &["ref_id"]];
const CARD: &[FieldPath] = &[&["data", "card_pan"], &["card_pan"]];

/// ZarinPal REST v4. The verify request carries the amount, so the provider
/// checks it; the response does not echo it back.
pub struct ZarinpalAdapter {
    client: ApiClient,
}

impl ZarinpalAdapter {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    fn base(config: &GatewayConfig) -> &'static str {
        if config.sandbox_mode { SANDBOX_BASE } else { PRODUCTION_BASE }
    }
}

fn result_code(body: &Value) -> Option<i64> {
    extract::first_integer(body, CODE)
}

#[async_trait]
impl PaymentAdapter for ZarinpalAdapter {
    fn provider_id(&self) -> &'static str {
        "zarinpal"
    }

    fn callback_token_keys(&self) -> &'static [&'static str] {
        &["Authority", "authority"]
    }

    async fn create(
        &self,
        request: &PaymentRequest,
        config: &GatewayConfig,
    ) -> Result<CreatedPayment, GatewayError> {
        let merchant_id = config.credential("merchant_id")?;
        let amount = provider_amount(UNIT, request.amount, MIN_AMOUNT)?;

        let mut metadata = Map::new();
        for key in ["order_id", "mobile", "email"] {
            if let Some(value) = request.metadata.get(key) {
                metadata.insert(key.to_string(), Value::String(value.clone()));
            }
        }

        let base = Self::base(config);
        let resp = self
            .client
            .execute(
                OutboundRequest::post("zarinpal.request", format!("{}/v4/payment/request.json", base))
                    .header("Accept", "application/json")
                    .json(json!({
                        "merchant_id": merchant_id,
                        "amount": amount,
                        "currency": "IRR",
                        "callback_url": config.callback_url,
                        "description": request.description,
                        "metadata": metadata,
                    })),
            )
            .await;
        let body = response_body(&resp)?;

        if result_code(body) != Some(100) {
            let err = rejection(body, CODE, MESSAGE);
            warn!("ZarinPal refused payment request for user {}: {}", request.user_id, err);
            return Err(err);
        }

        let authority = required_text(body, AUTHORITY, "authority")?;
        debug!("ZarinPal authority {} issued for user {}", authority, request.user_id);
        Ok(CreatedPayment {
            redirect_url: format!("{}/StartPay/{}", base, authority),
            token: authority,
            metadata: request.metadata.clone(),
        })
    }

    async fn verify(
        &self,
        transaction: &Transaction,
        config: &GatewayConfig,
    ) -> Result<VerificationResult, GatewayError> {
        let merchant_id = config.credential("merchant_id")?;
        let amount = UNIT.scale(transaction.amount)?;

        let resp = self
            .client
            .execute(
                OutboundRequest::post(
                    "zarinpal.verify",
                    format!("{}/v4/payment/verify.json", Self::base(config)),
                )
                .header("Accept", "application/json")
                .json(json!({
                    "merchant_id": merchant_id,
                    "amount": amount,
                    "authority": transaction.token,
                })),
            )
            .await;
        let body = response_body(&resp)?;

        match result_code(body) {
            // 101: verified earlier by another request.
            Some(100) | Some(101) => Ok(VerificationResult::verified(
                extract::first_text(body, REF_ID),
                extract::first_text(body, CARD),
            )),
            _ => Err(rejection(body, CODE, MESSAGE)),
        }
    }
}
