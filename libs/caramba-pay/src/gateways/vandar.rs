use async_trait::async_trait;
use caramba_db::models::Transaction;
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::{
    AmountUnit, PaymentAdapter, check_amount, ensure_order_id, provider_amount, rejection,
    required_text, response_body,
};
use crate::api_client::{ApiClient, OutboundRequest};
use crate::error::GatewayError;
use crate::extract::{self, FieldPath};
use crate::models::{CreatedPayment, GatewayConfig, PaymentRequest, VerificationResult};

const BASE: &str = "https://ipg.vandar.io";
const UNIT: AmountUnit = AmountUnit::Rial;
const MIN_AMOUNT: i64 = 10_000;

const STATUS: &[FieldPath] = &[&["status"]];
const MESSAGE: &[FieldPath] = &[&["errors", "0"], &["message"]];
const TOKEN: &[FieldPath] = &[&["token"]];
const AMOUNT: &[FieldPath] = &[&["amount"], &["realAmount"]];
const REF_ID: &[FieldPath] = &[&["transId"]];
const CARD: &[FieldPath] = &[&["cardNumber"]];

/// Vandar IPG v3. The API key travels in the body, not a header.
pub struct VandarAdapter {
    client: ApiClient,
}

impl VandarAdapter {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }
}

fn status(body: &Value) -> Option<i64> {
    extract::first_integer(body, STATUS)
}

#[async_trait]
impl PaymentAdapter for VandarAdapter {
    fn provider_id(&self) -> &'static str {
        "vandar"
    }

    fn callback_token_keys(&self) -> &'static [&'static str] {
        &["token"]
    }

    async fn create(
        &self,
        request: &PaymentRequest,
        config: &GatewayConfig,
    ) -> Result<CreatedPayment, GatewayError> {
        let api_key = config.credential("api_key")?;
        let amount = provider_amount(UNIT, request.amount, MIN_AMOUNT)?;
        let (order_id, metadata) = ensure_order_id(&request.metadata);

        let resp = self
            .client
            .execute(
                OutboundRequest::post("vandar.send", format!("{}/api/v3/send", BASE)).json(json!({
                    "api_key": api_key,
                    "amount": amount,
                    "callback_url": config.callback_url,
                    "factorNumber": order_id,
                    "description": request.description,
                })),
            )
            .await;
        let body = response_body(&resp)?;

        if status(body) != Some(1) {
            let err = rejection(body, STATUS, MESSAGE);
            warn!("Vandar refused payment request for user {}: {}", request.user_id, err);
            return Err(err);
        }

        let token = required_text(body, TOKEN, "token")?;
        debug!("Vandar token {} issued for order {}", token, order_id);
        Ok(CreatedPayment {
            redirect_url: format!("{}/v3/{}", BASE, token),
            token,
            metadata,
        })
    }

    async fn verify(
        &self,
        transaction: &Transaction,
        config: &GatewayConfig,
    ) -> Result<VerificationResult, GatewayError> {
        let api_key = config.credential("api_key")?;
        let expected = UNIT.scale(transaction.amount)?;

        let resp = self
            .client
            .execute(
                OutboundRequest::post("vandar.verify", format!("{}/api/v3/verify", BASE)).json(json!({
                    "api_key": api_key,
                    "token": transaction.token,
                })),
            )
            .await;
        let body = response_body(&resp)?;

        if status(body) != Some(1) {
            return Err(rejection(body, STATUS, MESSAGE));
        }
        check_amount(body, AMOUNT, expected)?;

        Ok(VerificationResult::verified(
            extract::first_text(body, REF_ID),
            extract::first_text(body, CARD),
        ))
    }
}
