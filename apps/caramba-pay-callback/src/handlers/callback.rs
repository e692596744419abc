use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
};
use caramba_db::models::TransactionStatus;
use caramba_db::repositories::CreditOutcome;
use caramba_pay::gateways::registry;
use serde_json::{Value, json};
use std::collections::HashMap;
use tracing::info;

use crate::AppState;
use crate::error::ApiError;

/// Query string merged with a form or JSON body. Query values win.
fn callback_params(query: HashMap<String, String>, body: &[u8]) -> HashMap<String, String> {
    let mut params: HashMap<String, String> = HashMap::new();
    if !body.is_empty() {
        if let Ok(Value::Object(map)) = serde_json::from_slice::<Value>(body) {
            for (key, value) in map {
                let value = match value {
                    Value::String(s) => s,
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    _ => continue,
                };
                params.insert(key, value);
            }
        } else if let Ok(pairs) = serde_urlencoded::from_bytes::<Vec<(String, String)>>(body) {
            params.extend(pairs);
        }
    }
    params.extend(query);
    params
}

/// Whether the redirect itself says the user cancelled. Informational only:
/// the provider's verify endpoint decides.
fn reported_cancelled(provider: &str, params: &HashMap<String, String>) -> bool {
    let flag = |key: &str| params.get(key).map(|v| v.trim().to_ascii_lowercase());
    match provider {
        "zarinpal" => flag("Status").is_some_and(|s| s != "ok"),
        "zibal" => flag("success").is_some_and(|s| s != "1"),
        "idpay" => flag("status").is_some_and(|s| s != "10" && s != "100" && s != "101"),
        "vandar" => flag("payment_status").is_some_and(|s| s != "ok"),
        _ => false,
    }
}

pub async fn payment_callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    if !registry::known_providers().any(|p| p == provider) {
        return Err(ApiError::UnknownProvider(provider));
    }
    let params = callback_params(query, &body);
    let token = state
        .orchestrator
        .callback_token(&provider, &params)
        .ok_or_else(|| ApiError::MissingToken(provider.clone()))?;

    if reported_cancelled(&provider, &params) {
        info!("{} callback for {} reports cancellation, verifying anyway", provider, token);
    }

    let tx = state
        .orchestrator
        .find_transaction(&provider, &token)
        .await?
        .ok_or_else(|| caramba_pay::PaymentError::unknown_transaction(&provider))?;

    let outcome = state.orchestrator.verify_payment(&provider, &token, tx.amount).await?;

    if outcome.status != TransactionStatus::Verified {
        return Err(ApiError::PaymentFailed {
            code: outcome.result.error_code.unwrap_or_else(|| "provider_rejected".to_string()),
            message: outcome.result.error.unwrap_or_default(),
        });
    }

    // Crediting is keyed by the transaction, so a replayed callback is a no-op.
    let credit = state.users.credit_from_transaction(outcome.transaction_id).await?;
    let balance = match credit {
        CreditOutcome::Credited(balance) => {
            info!(
                "Credited user {} with {} Toman from {} payment #{}, balance {}",
                outcome.user_id, outcome.amount, provider, outcome.transaction_id, balance
            );
            Some(balance)
        }
        CreditOutcome::Skipped => None,
    };

    Ok(Json(json!({
        "status": "verified",
        "transaction_id": outcome.transaction_id,
        "amount": outcome.amount,
        "ref_id": outcome.result.ref_id,
        "card_mask": outcome.result.card_mask,
        "credited": balance.is_some(),
        "balance": balance,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_overrides_body() {
        let query = HashMap::from([("trackId".to_string(), "1".to_string())]);
        let params = callback_params(query, b"trackId=2&success=1");
        assert_eq!(params["trackId"], "1");
        assert_eq!(params["success"], "1");

        let params = callback_params(HashMap::new(), br#"{"id": "abc", "status": 10, "order_id": "o-1"}"#);
        assert_eq!(params["id"], "abc");
        assert_eq!(params["status"], "10");
    }

    #[test]
    fn cancellation_flags() {
        let params = HashMap::from([("Status".to_string(), "NOK".to_string())]);
        assert!(reported_cancelled("zarinpal", &params));
        let params = HashMap::from([("Status".to_string(), "OK".to_string())]);
        assert!(!reported_cancelled("zarinpal", &params));
        let params = HashMap::from([("payment_status".to_string(), "FAILED".to_string())]);
        assert!(reported_cancelled("vandar", &params));
    }
}
