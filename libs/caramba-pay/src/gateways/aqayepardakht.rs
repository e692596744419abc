use async_trait::async_trait;
use caramba_db::models::Transaction;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use super::{AmountUnit, PaymentAdapter, provider_amount, rejection, required_text, response_body};
use crate::api_client::{ApiClient, OutboundRequest};
use crate::error::GatewayError;
use crate::extract::{self, FieldPath};
use crate::models::{CreatedPayment, GatewayConfig, PaymentRequest, VerificationResult};

const BASE: &str = "https://panel.aqayepardakht.ir";
const UNIT: AmountUnit = AmountUnit::Toman;
const MIN_AMOUNT: i64 = 1_000;

const STATUS: &[FieldPath] = &[&["status"]];
const CODE: &[FieldPath] = &[&["code"], &["status"]];
const MESSAGE: &[FieldPath] = &[&["message"], &["error"]];
const TRANS_ID: &[FieldPath] = &[&["transid"], &["trans_id"]];
const REF_ID: &[FieldPath] = &[
    &["tracking_number"],
    &["data", "tracking_number"],
    &["ref_id"],
    &["data", "ref_id"],
];
const CARD: &[FieldPath] = &[&["card_number"], &["data", "card_number"]];

/// AqayePardakht v2. Like ZarinPal, the amount is bound in the verify
/// request and not echoed back.
pub struct AqayePardakhtAdapter {
    client: ApiClient,
}

impl AqayePardakhtAdapter {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }
}

fn is_success(body: &Value) -> bool {
    extract::first_text(body, STATUS).as_deref() == Some("success")
}

#[async_trait]
impl PaymentAdapter for AqayePardakhtAdapter {
    fn provider_id(&self) -> &'static str {
        "aqayepardakht"
    }

    fn callback_token_keys(&self) -> &'static [&'static str] {
        &["transid"]
    }

    async fn create(
        &self,
        request: &PaymentRequest,
        config: &GatewayConfig,
    ) -> Result<CreatedPayment, GatewayError> {
        let pin = config.credential("pin")?;
        let amount = provider_amount(UNIT, request.amount, MIN_AMOUNT)?;

        let mut payload = Map::new();
        payload.insert("pin".into(), json!(pin));
        payload.insert("amount".into(), json!(amount));
        payload.insert("callback".into(), json!(config.callback_url));
        payload.insert("description".into(), json!(request.description));
        if let Some(order_id) = request.metadata.get("order_id") {
            payload.insert("invoice_id".into(), json!(order_id));
        }
        if let Some(mobile) = request.metadata.get("mobile") {
            payload.insert("mobile".into(), json!(mobile));
        }

        let resp = self
            .client
            .execute(
                OutboundRequest::post("aqayepardakht.create", format!("{}/api/v2/create", BASE))
                    .json(Value::Object(payload)),
            )
            .await;
        let body = response_body(&resp)?;

        if !is_success(body) {
            let err = rejection(body, CODE, MESSAGE);
            warn!("AqayePardakht refused payment request for user {}: {}", request.user_id, err);
            return Err(err);
        }

        let trans_id = required_text(body, TRANS_ID, "transid")?;
        let redirect_url = if config.sandbox_mode {
            format!("{}/startpay/sandbox/{}", BASE, trans_id)
        } else {
            format!("{}/startpay/{}", BASE, trans_id)
        };
        debug!("AqayePardakht transid {} issued for user {}", trans_id, request.user_id);
        Ok(CreatedPayment {
            redirect_url,
            token: trans_id,
            metadata: request.metadata.clone(),
        })
    }

    async fn verify(
        &self,
        transaction: &Transaction,
        config: &GatewayConfig,
    ) -> Result<VerificationResult, GatewayError> {
        let pin = config.credential("pin")?;
        let amount = UNIT.scale(transaction.amount)?;

        let resp = self
            .client
            .execute(
                OutboundRequest::post("aqayepardakht.verify", format!("{}/api/v2/verify", BASE)).json(
                    json!({
                        "pin": pin,
                        "amount": amount,
                        "transid": transaction.token,
                    }),
                ),
            )
            .await;
        let body = response_body(&resp)?;

        let code = extract::first_text(body, &[&["code"]]);
        match (is_success(body), code.as_deref()) {
            // "2": verified earlier.
            (true, Some("1")) | (true, Some("2")) => {
                // Falls back to the transid.
                let ref_id = extract::first_text(body, REF_ID).unwrap_or_else(|| transaction.token.clone());
                Ok(VerificationResult::verified(Some(ref_id), extract::first_text(body, CARD)))
            }
            _ => Err(rejection(body, CODE, MESSAGE)),
        }
    }
}
