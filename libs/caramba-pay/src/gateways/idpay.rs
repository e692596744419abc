use async_trait::async_trait;
use caramba_db::models::Transaction;
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::{
    AmountUnit, PaymentAdapter, check_amount, ensure_order_id, provider_amount, rejection,
    required_text, response_body, stored_order_id,
};
use crate::api_client::{ApiClient, OutboundRequest};
use crate::error::GatewayError;
use crate::extract::{self, FieldPath};
use crate::models::{CreatedPayment, GatewayConfig, PaymentRequest, VerificationResult};

const BASE: &str = "https://api.idpay.ir/v1.1";
const UNIT: AmountUnit = AmountUnit::Rial;
const MIN_AMOUNT: i64 = 1_000;

const ERROR_CODE: &[FieldPath] = &[&["error_code"], &["status"]];
const ERROR_MESSAGE: &[FieldPath] = &[&["error_message"], &["message"]];
const ID: &[FieldPath] = &[&["id"]];
const LINK: &[FieldPath] = &[&["link"]];
const STATUS: &[FieldPath] = &[&["status"]];
const AMOUNT: &[FieldPath] = &[&["payment", "amount"], &["amount"]];
const TRACK_ID: &[FieldPath] = &[&["payment", "track_id"], &["track_id"]];
const CARD: &[FieldPath] = &[&["payment", "card_no"], &["card_no"]];
const ORDER_ID: &[FieldPath] = &[&["order_id"]];

/// IDPay v1.1. Both calls authenticate with `X-API-KEY`; sandbox is a header,
/// not a separate host.
pub struct IdPayAdapter {
    client: ApiClient,
}

impl IdPayAdapter {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    fn request(
        &self,
        method_name: &str,
        path: &str,
        config: &GatewayConfig,
        body: Value,
    ) -> Result<OutboundRequest, GatewayError> {
        let api_key = config.credential("api_key")?;
        Ok(OutboundRequest::post(method_name, format!("{}{}", BASE, path))
            .header("X-API-KEY", api_key)
            .header("X-SANDBOX", if config.sandbox_mode { "1" } else { "0" })
            .json(body))
    }
}

#[async_trait]
impl PaymentAdapter for IdPayAdapter {
    fn provider_id(&self) -> &'static str {
        "idpay"
    }

    fn callback_token_keys(&self) -> &'static [&'static str] {
        &["id"]
    }

    async fn create(
        &self,
        request: &PaymentRequest,
        config: &GatewayConfig,
    ) -> Result<CreatedPayment, GatewayError> {
        let amount = provider_amount(UNIT, request.amount, MIN_AMOUNT)?;
        let (order_id, metadata) = ensure_order_id(&request.metadata);

        let call = self.request(
            "idpay.payment",
            "/payment",
            config,
            json!({
                "order_id": order_id,
                "amount": amount,
                "desc": request.description,
                "callback": config.callback_url,
            }),
        )?;
        let resp = self.client.execute(call).await;
        let body = response_body(&resp)?;

        // Success is HTTP 201 with {id, link}; errors carry error_code.
        if resp.status != Some(201) || extract::first_text(body, &[&["error_code"]]).is_some() {
            let err = rejection(body, ERROR_CODE, ERROR_MESSAGE);
            warn!("IDPay refused payment request for user {}: {}", request.user_id, err);
            return Err(err);
        }

        let id = required_text(body, ID, "id")?;
        let link = required_text(body, LINK, "link")?;
        debug!("IDPay payment {} created for order {}", id, order_id);
        Ok(CreatedPayment {
            redirect_url: link,
            token: id,
            metadata,
        })
    }

    async fn verify(
        &self,
        transaction: &Transaction,
        config: &GatewayConfig,
    ) -> Result<VerificationResult, GatewayError> {
        let order_id = stored_order_id(transaction)?;
        let expected = UNIT.scale(transaction.amount)?;

        let call = self.request(
            "idpay.verify",
            "/payment/verify",
            config,
            json!({"id": transaction.token, "order_id": order_id}),
        )?;
        let resp = self.client.execute(call).await;
        let body = response_body(&resp)?;

        if extract::first_text(body, &[&["error_code"]]).is_some() {
            return Err(rejection(body, ERROR_CODE, ERROR_MESSAGE));
        }

        match extract::first_integer(body, STATUS) {
            // 101: verified earlier.
            Some(100) | Some(101) => {
                if let Some(echoed) = extract::first_text(body, ORDER_ID) {
                    if echoed != order_id {
                        return Err(GatewayError::rejected(
                            "order_mismatch",
                            format!("provider echoed order {} instead of {}", echoed, order_id),
                        ));
                    }
                }
                check_amount(body, AMOUNT, expected)?;
                Ok(VerificationResult::verified(
                    extract::first_text(body, TRACK_ID),
                    extract::first_text(body, CARD),
                ))
            }
            _ => Err(rejection(body, STATUS, ERROR_MESSAGE)),
        }
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
        gateway_config("idpay", true, &[("api_key", "key-1")])
    }

    #[tokio::test]
    async fn create_sends_auth_headers_and_returns_link() {
        let mock = Arc::new(MockTransport::new());
        mock.on_json(
            "/v1.1/payment",
            201,
            json!({"id": "d2e353189823079e1e4181772cff5292", "link": "https://idpay.ir/p/ws-sandbox/d2e353189823079e1e4181772cff5292"}),
        );
        let adapter = IdPayAdapter::new(test_client(&mock));

        let created = adapter.create(&payment_request(1, 20_000), &config()).await.unwrap();
        assert_eq!(created.token, "d2e353189823079e1e4181772cff5292");
        assert!(created.redirect_url.ends_with("/d2e353189823079e1e4181772cff5292"));
        assert!(created.metadata.contains_key("order_id"));

        let call = &mock.calls()[0];
        assert_eq!(call.header("X-API-KEY"), Some("key-1"));
        assert_eq!(call.header("X-SANDBOX"), Some("1"));
        assert_eq!(call.json_body().unwrap()["amount"], json!(200_000));
    }

    #[tokio::test]
    async fn create_error_body_is_a_rejection() {
        let mock = Arc::new(MockTransport::new());
        mock.on_json(
            "/v1.1/payment",
            406,
            json!({"error_code": 34, "error_message": "amount must be at least 1000 rial"}),
        );
        let adapter = IdPayAdapter::new(test_client(&mock));

        assert_eq!(
            adapter.create(&payment_request(1, 20_000), &config()).await,
            Err(GatewayError::rejected("34", "amount must be at least 1000 rial"))
        );
    }

    #[tokio::test]
    async fn verify_sends_stored_order_id_and_reads_nested_payment() {
        let mock = Arc::new(MockTransport::new());
        mock.on_json(
            "/payment/verify",
            200,
            json!({
                "status": 100,
                "track_id": "10012",
                "id": "abc",
                "order_id": "o-55",
                "amount": "200000",
                "payment": {"track_id": "888001", "amount": "200000", "card_no": "123456******1234"}
            }),
        );
        let adapter = IdPayAdapter::new(test_client(&mock));
        let tx = pending_transaction("idpay", "abc", 20_000, order_metadata("o-55"));

        let result = adapter.verify(&tx, &config()).await.unwrap();
        assert_eq!(result.ref_id.as_deref(), Some("888001"));
        assert_eq!(result.card_mask.as_deref(), Some("123456******1234"));
        assert_eq!(
            mock.calls()[0].json_body().unwrap(),
            json!({"id": "abc", "order_id": "o-55"})
        );
    }

    #[tokio::test]
    async fn verify_flat_amount_mismatch() {
        let mock = Arc::new(MockTransport::new());
        mock.on_json("/payment/verify", 200, json!({"status": 101, "order_id": "o-55", "amount": "100000"}));
        let adapter = IdPayAdapter::new(test_client(&mock));
        let tx = pending_transaction("idpay", "abc", 20_000, order_metadata("o-55"));

        assert_eq!(
            adapter.verify(&tx, &config()).await,
            Err(GatewayError::AmountMismatch { expected: 200_000, reported: 100_000 })
        );
    }

    #[tokio::test]
    async fn verify_without_order_id_is_rejected_locally() {
        let mock = Arc::new(MockTransport::new());
        let adapter = IdPayAdapter::new(test_client(&mock));
        let tx = pending_transaction("idpay", "abc", 20_000, Default::default());

        let err = adapter.verify(&tx, &config()).await.unwrap_err();
        assert!(matches!(err, GatewayError::Rejected { ref code, .. } if code == "missing_order_id"));
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn verify_error_code_is_a_rejection() {
        let mock = Arc::new(MockTransport::new());
        mock.on_json("/payment/verify", 405, json!({"error_code": 53, "error_message": "verification failed"}));
        let adapter = IdPayAdapter::new(test_client(&mock));
        let tx = pending_transaction("idpay", "abc", 20_000, order_metadata("o-55"));

        assert_eq!(
            adapter.verify(&tx, &config()).await,
            Err(GatewayError::rejected("53", "verification failed"))
        );
    }
}
