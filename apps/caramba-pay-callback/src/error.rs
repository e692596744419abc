use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use caramba_db::StoreError;
use caramba_pay::{PaymentError, PaymentErrorKind};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unknown payment provider '{0}'")]
    UnknownProvider(String),
    #[error("callback for {0} carries no payment token")]
    MissingToken(String),
    #[error("missing or invalid bearer token")]
    Unauthorized,
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Payment(#[from] PaymentError),
    /// Verification finished and the payment is failed.
    #[error("payment failed ({code}): {message}")]
    PaymentFailed { code: String, message: String },
    #[error("failed to credit balance: {0}")]
    Credit(#[from] StoreError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::UnknownProvider(_) | ApiError::MissingToken(_) | ApiError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Payment(err) => match err.kind {
                PaymentErrorKind::GatewayDisabled => StatusCode::BAD_REQUEST,
                PaymentErrorKind::UnknownTransaction => StatusCode::NOT_FOUND,
                PaymentErrorKind::ProviderRejected { .. } | PaymentErrorKind::AmountMismatch { .. } => {
                    StatusCode::CONFLICT
                }
                PaymentErrorKind::Transport(_) => StatusCode::BAD_GATEWAY,
                PaymentErrorKind::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::PaymentFailed { .. } => StatusCode::CONFLICT,
            ApiError::Credit(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &str {
        match self {
            ApiError::UnknownProvider(_) => "unknown_provider",
            ApiError::MissingToken(_) => "missing_token",
            ApiError::Unauthorized => "unauthorized",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Payment(err) => err.code(),
            ApiError::PaymentFailed { code, .. } => code,
            ApiError::Credit(_) => "persistence_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Payment request failed: {}", self);
        } else {
            tracing::warn!("Payment request refused: {}", self);
        }
        (status, Json(json!({"error": self.code(), "message": self.to_string()}))).into_response()
    }
}
