use axum::{
    Json,
    extract::{Path, State},
    http::HeaderMap,
};
use caramba_db::models::Metadata;
use caramba_pay::PaymentLink;
use serde::Deserialize;

use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct CreatePaymentBody {
    pub user_id: i64,
    /// Toman.
    pub amount: i64,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let expected = state
        .config
        .internal_token
        .as_deref()
        .ok_or(ApiError::Unauthorized)?;
    match extract_bearer_token(headers) {
        Some(token) if !token.trim().is_empty() && token.trim() == expected => Ok(()),
        _ => Err(ApiError::Unauthorized),
    }
}

/// Starts a payment for the bot layer and hands back the redirect link.
pub async fn create_payment(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    Json(body): Json<CreatePaymentBody>,
) -> Result<Json<PaymentLink>, ApiError> {
    authorize(&state, &headers)?;
    if body.amount <= 0 {
        return Err(ApiError::BadRequest("amount must be positive".to_string()));
    }

    let description = body
        .description
        .filter(|d| !d.trim().is_empty())
        .unwrap_or_else(|| format!("Account top-up for user {}", body.user_id));

    let link = state
        .orchestrator
        .create_payment(body.user_id, body.amount, &description, body.metadata, &provider)
        .await?;
    Ok(Json(link))
}
