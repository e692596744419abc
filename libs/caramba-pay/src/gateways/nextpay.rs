use async_trait::async_trait;
use caramba_db::models::Transaction;
use tracing::{debug, warn};

use super::{
    AmountUnit, PaymentAdapter, check_amount, ensure_order_id, provider_amount, rejection,
    required_text, response_body, stored_order_id,
};
use crate::api_client::{ApiClient, OutboundRequest};
use crate::error::GatewayError;
use crate::extract::{self, FieldPath};
use crate::models::{CreatedPayment, GatewayConfig, PaymentRequest, VerificationResult};

const BASE: &str = "https://nextpay.org/nx/gateway";
const UNIT: AmountUnit = AmountUnit::Toman;
const MIN_AMOUNT: i64 = 100;
const CURRENCY: &str = "IRT";

const CODE: &[FieldPath] = &[&["code"]];
const MESSAGE: &[FieldPath] = &[&["message"], &["error"]];
const TRANS_ID: &[FieldPath] = &[&["trans_id"]];
const AMOUNT: &[FieldPath] = &[&["amount"]];
const REF_ID: &[FieldPath] = &[&["Shaparak_Ref_Id"], &["shaparak_ref_id"]];
const CARD: &[FieldPath] = &[&["card_holder"], &["card_number"]];
const ORDER_ID: &[FieldPath] = &[&["order_id"]];

/// NextPay. Form-encoded requests, amounts in Toman, no sandbox host.
pub struct NextPayAdapter {
    client: ApiClient,
}

impl NextPayAdapter {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PaymentAdapter for NextPayAdapter {
    fn provider_id(&self) -> &'static str {
        "nextpay"
    }

    fn callback_token_keys(&self) -> &'static [&'static str] {
        &["trans_id"]
    }

    async fn create(
        &self,
        request: &PaymentRequest,
        config: &GatewayConfig,
    ) -> Result<CreatedPayment, GatewayError> {
        let api_key = config.credential("api_key")?;
        let amount = provider_amount(UNIT, request.amount, MIN_AMOUNT)?;
        let (order_id, metadata) = ensure_order_id(&request.metadata);

        let mut form = vec![
            ("api_key", api_key.to_string()),
            ("order_id", order_id.clone()),
            ("amount", amount.to_string()),
            ("currency", CURRENCY.to_string()),
            ("callback_uri", config.callback_url.clone()),
        ];
        if let Some(phone) = request.metadata.get("mobile") {
            form.push(("customer_phone", phone.clone()));
        }

        let resp = self
            .client
            .execute(OutboundRequest::post("nextpay.token", format!("{}/token", BASE)).form(form))
            .await;
        let body = response_body(&resp)?;

        if extract::first_integer(body, CODE) != Some(-1) {
            let err = rejection(body, CODE, MESSAGE);
            warn!("NextPay refused payment request for user {}: {}", request.user_id, err);
            return Err(err);
        }

        let trans_id = required_text(body, TRANS_ID, "trans_id")?;
        debug!("NextPay trans_id {} issued for order {}", trans_id, order_id);
        Ok(CreatedPayment {
            redirect_url: format!("{}/payment/{}", BASE, trans_id),
            token: trans_id,
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
                OutboundRequest::post("nextpay.verify", format!("{}/verify", BASE)).form([
                    ("api_key", api_key.to_string()),
                    ("trans_id", transaction.token.clone()),
                    ("amount", expected.to_string()),
                    ("currency", CURRENCY.to_string()),
                ]),
            )
            .await;
        let body = response_body(&resp)?;

        if extract::first_integer(body, CODE) != Some(0) {
            return Err(rejection(body, CODE, MESSAGE));
        }

        if let (Ok(stored), Some(echoed)) = (
            stored_order_id(transaction),
            extract::first_text(body, ORDER_ID),
        ) {
            if echoed != stored {
                return Err(GatewayError::rejected(
                    "order_mismatch",
                    format!("provider echoed order {} instead of {}", echoed, stored),
                ));
            }
        }
        check_amount(body, AMOUNT, expected)?;

        Ok(VerificationResult::verified(
            extract::first_text(body, REF_ID),
            extract::first_text(body, CARD),
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
    use serde_json::json;
    use std::sync::Arc;

    fn config() -> GatewayConfig {
        gateway_config("nextpay", false, &[("api_key", "np-key")])
    }

    #[tokio::test]
    async fn create_posts_a_form_in_toman() {
        let mock = Arc::new(MockTransport::new());
        mock.on_json("/nx/gateway/token", 200, json!({"code": -1, "trans_id": "f7c07568-c6d1-4bee-87b1-4a9e5ed2e4c1"}));
        let adapter = NextPayAdapter::new(test_client(&mock));

        let created = adapter.create(&payment_request(9, 50_000), &config()).await.unwrap();
        assert_eq!(
            created.redirect_url,
            "https://nextpay.org/nx/gateway/payment/f7c07568-c6d1-4bee-87b1-4a9e5ed2e4c1"
        );

        let call = &mock.calls()[0];
        assert_eq!(call.header("content-type"), Some("application/x-www-form-urlencoded"));
        let form = call.form_body();
        assert!(form.contains(&("amount".to_string(), "50000".to_string())));
        assert!(form.contains(&("currency".to_string(), "IRT".to_string())));
        assert!(form.contains(&("order_id".to_string(), created.metadata["order_id"].clone())));
    }

    #[tokio::test]
    async fn create_negative_code_is_a_rejection() {
        let mock = Arc::new(MockTransport::new());
        mock.on_json("/nx/gateway/token", 200, json!({"code": -32, "trans_id": null}));
        let adapter = NextPayAdapter::new(test_client(&mock));

        let err = adapter.create(&payment_request(9, 50_000), &config()).await.unwrap_err();
        assert!(matches!(err, GatewayError::Rejected { ref code, .. } if code == "-32"));
    }

    #[tokio::test]
    async fn verify_checks_amount_and_order() {
        let mock = Arc::new(MockTransport::new());
        mock.on_json(
            "/nx/gateway/verify",
            200,
            json!({"code": 0, "amount": 50000, "order_id": "o-9", "card_holder": "6037****1234", "Shaparak_Ref_Id": "1541516"}),
        );
        let adapter = NextPayAdapter::new(test_client(&mock));
        let tx = pending_transaction("nextpay", "t-1", 50_000, order_metadata("o-9"));

        let result = adapter.verify(&tx, &config()).await.unwrap();
        assert_eq!(result.ref_id.as_deref(), Some("1541516"));
        assert_eq!(result.card_mask.as_deref(), Some("6037****1234"));
    }

    #[tokio::test]
    async fn verify_rejects_a_foreign_order() {
        let mock = Arc::new(MockTransport::new());
        mock.on_json("/nx/gateway/verify", 200, json!({"code": 0, "amount": 50000, "order_id": "other"}));
        let adapter = NextPayAdapter::new(test_client(&mock));
        let tx = pending_transaction("nextpay", "t-1", 50_000, order_metadata("o-9"));

        let err = adapter.verify(&tx, &config()).await.unwrap_err();
        assert!(matches!(err, GatewayError::Rejected { ref code, .. } if code == "order_mismatch"));
    }

    #[tokio::test]
    async fn verify_amount_mismatch() {
        let mock = Arc::new(MockTransport::new());
        mock.on_json("/nx/gateway/verify", 200, json!({"code": 0, "amount": 5000, "order_id": "o-9"}));
        let adapter = NextPayAdapter::new(test_client(&mock));
        let tx = pending_transaction("nextpay", "t-1", 50_000, order_metadata("o-9"));

        assert_eq!(
            adapter.verify(&tx, &config()).await,
            Err(GatewayError::AmountMismatch { expected: 50_000, reported: 5_000 })
        );
    }
}
