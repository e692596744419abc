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

const BASE: &str = "https://gateway.zibal.ir";
const UNIT: AmountUnit = AmountUnit::Rial;
const MIN_AMOUNT: i64 = 1_000;

const RESULT: &[FieldPath] = &[&["result"]];
const MESSAGE: &[FieldPath] = &[&["message"]];
const TRACK_ID: &[FieldPath] = &[&["trackId"], &["data", "trackId"]];
const AMOUNT: &[FieldPath] = &[&["amount"], &["data", "amount"]];
const REF_ID: &[FieldPath] = &[&["refNumber"], &["data", "refNumber"]];
const CARD: &[FieldPath] = &[&["cardNumber"], &["data", "cardNumber"]];

/// Zibal. Sandbox mode shares the production host and uses the public
/// `zibal` merchant.
pub struct ZibalAdapter {
    client: ApiClient,
}

impl ZibalAdapter {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }
}

fn result_code(body: &Value) -> Option<i64> {
    extract::first_integer(body, RESULT)
}

// trackId is numeric on the wire.
fn wire_track_id(token: &str) -> Value {
    token
        .parse::<i64>()
        .map(Value::from)
        .unwrap_or_else(|_| Value::String(token.to_string()))
}

impl ZibalAdapter {
    /// Payment details for a trackId. Zibal's "already verified" answer
    /// carries no amount, so the inquiry is the only place to read it.
    async fn inquiry(&self, merchant: &str, track_id: &Value) -> Result<Value, GatewayError> {
        let resp = self
            .client
            .execute(
                OutboundRequest::post("zibal.inquiry", format!("{}/v1/inquiry", BASE)).json(json!({
                    "merchant": merchant,
                    "trackId": track_id,
                })),
            )
            .await;
        let body = response_body(&resp)?;
        if result_code(body) != Some(100) {
            return Err(GatewayError::Transport(format!(
                "inquiry failed: {}",
                rejection(body, RESULT, MESSAGE)
            )));
        }
        Ok(body.clone())
    }
}

#[async_trait]
impl PaymentAdapter for ZibalAdapter {
    fn provider_id(&self) -> &'static str {
        "zibal"
    }

    fn callback_token_keys(&self) -> &'static [&'static str] {
        &["trackId"]
    }

    async fn create(
        &self,
        request: &PaymentRequest,
        config: &GatewayConfig,
    ) -> Result<CreatedPayment, GatewayError> {
        let merchant = config.credential("merchant")?;
        let amount = provider_amount(UNIT, request.amount, MIN_AMOUNT)?;
        let (order_id, metadata) = ensure_order_id(&request.metadata);

        let resp = self
            .client
            .execute(
                OutboundRequest::post("zibal.request", format!("{}/v1/request", BASE)).json(json!({
                    "merchant": merchant,
                    "amount": amount,
                    "callbackUrl": config.callback_url,
                    "description": request.description,
                    "orderId": order_id,
                })),
            )
            .await;
        let body = response_body(&resp)?;

        if result_code(body) != Some(100) {
            let err = rejection(body, RESULT, MESSAGE);
            warn!("Zibal refused payment request for user {}: {}", request.user_id, err);
            return Err(err);
        }

        let track_id = required_text(body, TRACK_ID, "trackId")?;
        debug!("Zibal trackId {} issued for order {}", track_id, order_id);
        Ok(CreatedPayment {
            redirect_url: format!("{}/start/{}", BASE, track_id),
            token: track_id,
            metadata,
        })
    }

    async fn verify(
        &self,
        transaction: &Transaction,
        config: &GatewayConfig,
    ) -> Result<VerificationResult, GatewayError> {
        let merchant = config.credential("merchant")?;
        let expected = UNIT.scale(transaction.amount)?;
        let track_id = wire_track_id(&transaction.token);

        let resp = self
            .client
            .execute(
                OutboundRequest::post("zibal.verify", format!("{}/v1/verify", BASE)).json(json!({
                    "merchant": merchant,
                    "trackId": track_id,
                })),
            )
            .await;
        let body = response_body(&resp)?;

        let paid = match result_code(body) {
            Some(100) => body.clone(),
            Some(201) => {
                debug!("Zibal trackId {} was verified earlier, reading it back", transaction.token);
                self.inquiry(merchant, &track_id).await?
            }
            _ => return Err(rejection(body, RESULT, MESSAGE)),
        };

        check_amount(&paid, AMOUNT, expected)?;
        Ok(VerificationResult::verified(
            extract::first_text(&paid, REF_ID),
            extract::first_text(&paid, CARD),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        MockTransport, gateway_config, order_metadata, payment_request, pending_transaction,
        test_client,
    };
    use std::sync::Arc;

    fn config() -> GatewayConfig {
        gateway_config("zibal", true, &[("merchant", "zibal")])
    }

    #[tokio::test]
    async fn create_generates_order_id_and_start_url() {
        let mock = Arc::new(MockTransport::new());
        mock.on_json("/v1/request", 200, json!({"trackId": 15966442233_i64, "result": 100, "message": "success"}));
        let adapter = ZibalAdapter::new(test_client(&mock));

        let created = adapter.create(&payment_request(3, 100_000), &config()).await.unwrap();
        assert_eq!(created.token, "15966442233");
        assert_eq!(created.redirect_url, "https://gateway.zibal.ir/start/15966442233");

        let sent = mock.calls()[0].json_body().unwrap();
        assert_eq!(sent["amount"], json!(1_000_000));
        assert_eq!(sent["orderId"], json!(created.metadata["order_id"]));
    }

    #[tokio::test]
    async fn create_maps_result_code() {
        let mock = Arc::new(MockTransport::new());
        mock.on_json("/v1/request", 200, json!({"result": 102, "message": "merchant not found"}));
        let adapter = ZibalAdapter::new(test_client(&mock));

        let err = adapter.create(&payment_request(3, 100_000), &config()).await.unwrap_err();
        assert_eq!(err, GatewayError::rejected("102", "merchant not found"));
    }

    #[tokio::test]
    async fn verify_checks_reported_amount() {
        let mock = Arc::new(MockTransport::new());
        mock.on_json(
            "/v1/verify",
            200,
            json!({"result": 100, "amount": 1000000, "refNumber": 58523, "cardNumber": "62741****44", "status": 1}),
        );
        let adapter = ZibalAdapter::new(test_client(&mock));
        let tx = pending_transaction("zibal", "15966442233", 100_000, order_metadata("o-1"));

        let result = adapter.verify(&tx, &config()).await.unwrap();
        assert_eq!(result.ref_id.as_deref(), Some("58523"));
        assert_eq!(result.card_mask.as_deref(), Some("62741****44"));
        assert_eq!(mock.calls()[0].json_body().unwrap()["trackId"], json!(15966442233_i64));
    }

    #[tokio::test]
    async fn verify_amount_mismatch_beats_success_flag() {
        let mock = Arc::new(MockTransport::new());
        mock.on_json("/v1/verify", 200, json!({"result": 100, "amount": 10000, "refNumber": 1}));
        let adapter = ZibalAdapter::new(test_client(&mock));
        let tx = pending_transaction("zibal", "1", 100_000, order_metadata("o-1"));

        assert_eq!(
            adapter.verify(&tx, &config()).await,
            Err(GatewayError::AmountMismatch { expected: 1_000_000, reported: 10_000 })
        );
    }

    #[tokio::test]
    async fn already_verified_reads_the_amount_from_inquiry() {
        let mock = Arc::new(MockTransport::new());
        mock.on_json("/v1/verify", 200, json!({"result": 201, "message": "already verified"}));
        mock.on_json(
            "/v1/inquiry",
            200,
            json!({"result": 100, "status": 1, "amount": 1000000, "refNumber": 58523, "cardNumber": "62741****44"}),
        );
        let adapter = ZibalAdapter::new(test_client(&mock));
        let tx = pending_transaction("zibal", "15966442233", 100_000, order_metadata("o-1"));

        let result = adapter.verify(&tx, &config()).await.unwrap();
        assert_eq!(result.ref_id.as_deref(), Some("58523"));
        assert_eq!(result.card_mask.as_deref(), Some("62741****44"));
        assert_eq!(
            mock.calls_to("/v1/inquiry")[0].json_body().unwrap(),
            json!({"merchant": "zibal", "trackId": 15966442233_i64})
        );
    }

    #[tokio::test]
    async fn already_verified_with_wrong_inquiry_amount_is_a_mismatch() {
        let mock = Arc::new(MockTransport::new());
        mock.on_json("/v1/verify", 200, json!({"result": 201}));
        mock.on_json("/v1/inquiry", 200, json!({"result": 100, "status": 1, "amount": 5000}));
        let adapter = ZibalAdapter::new(test_client(&mock));
        let tx = pending_transaction("zibal", "1", 100_000, order_metadata("o-1"));

        assert_eq!(
            adapter.verify(&tx, &config()).await,
            Err(GatewayError::AmountMismatch { expected: 1_000_000, reported: 5_000 })
        );
    }

    #[tokio::test]
    async fn already_verified_without_inquiry_amount_stays_retryable() {
        let tx = pending_transaction("zibal", "1", 100_000, order_metadata("o-1"));
        for inquiry in [
            json!({"result": 100, "status": 1}),
            json!({"result": 102, "message": "merchant not found"}),
        ] {
            let mock = Arc::new(MockTransport::new());
            mock.on_json("/v1/verify", 200, json!({"result": 201}));
            mock.on_json("/v1/inquiry", 200, inquiry);
            let adapter = ZibalAdapter::new(test_client(&mock));

            assert_eq!(adapter.verify(&tx, &config()).await.unwrap_err().code(), "transport_error");
        }
    }

    #[tokio::test]
    async fn unpaid_is_rejected() {
        let mock = Arc::new(MockTransport::new());
        mock.on_json("/v1/verify", 200, json!({"result": 202, "message": "order not paid or failed"}));
        let adapter = ZibalAdapter::new(test_client(&mock));
        let tx = pending_transaction("zibal", "1", 100_000, order_metadata("o-1"));

        assert_eq!(
            adapter.verify(&tx, &config()).await,
            Err(GatewayError::rejected("202", "order not paid or failed"))
        );
    }
}
