use caramba_db::StoreError;
use thiserror::Error;

/// Failure of a single adapter operation. Adapters never panic or escape with
/// anything else.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// Network, timeout, or an unusable response. Safe to retry.
    #[error("transport error: {0}")]
    Transport(String),
    /// The provider explicitly declined. Not retryable with the same token.
    #[error("provider rejected ({code}): {message}")]
    Rejected { code: String, message: String },
    /// Provider-reported amount differs from the expected one, in provider units.
    #[error("amount mismatch: expected {expected}, provider reported {reported}")]
    AmountMismatch { expected: i64, reported: i64 },
}

impl GatewayError {
    pub fn rejected(code: impl Into<String>, message: impl Into<String>) -> Self {
        GatewayError::Rejected {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn code(&self) -> &str {
        match self {
            GatewayError::Transport(_) => "transport_error",
            GatewayError::Rejected { .. } => "provider_rejected",
            GatewayError::AmountMismatch { .. } => "amount_mismatch",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaymentErrorKind {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("provider rejected the payment ({code}): {message}")]
    ProviderRejected { code: String, message: String },
    #[error("amount mismatch: expected {expected}, got {reported}")]
    AmountMismatch { expected: i64, reported: i64 },
    #[error("gateway is disabled or not configured")]
    GatewayDisabled,
    #[error("no transaction matches this token")]
    UnknownTransaction,
    #[error("failed to persist transaction: {0}")]
    Persistence(String),
}

/// Orchestrator error: the first fatal error, tagged with the provider it came from.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("[{provider}] {kind}")]
pub struct PaymentError {
    pub provider: String,
    pub kind: PaymentErrorKind,
}

impl PaymentError {
    pub fn new(provider: impl Into<String>, kind: PaymentErrorKind) -> Self {
        Self {
            provider: provider.into(),
            kind,
        }
    }

    pub fn gateway_disabled(provider: &str) -> Self {
        Self::new(provider, PaymentErrorKind::GatewayDisabled)
    }

    pub fn unknown_transaction(provider: &str) -> Self {
        Self::new(provider, PaymentErrorKind::UnknownTransaction)
    }

    pub fn persistence(provider: &str, err: &StoreError) -> Self {
        Self::new(provider, PaymentErrorKind::Persistence(err.to_string()))
    }

    pub fn from_gateway(provider: &str, err: GatewayError) -> Self {
        let kind = match err {
            GatewayError::Transport(detail) => PaymentErrorKind::Transport(detail),
            GatewayError::Rejected { code, message } => {
                PaymentErrorKind::ProviderRejected { code, message }
            }
            GatewayError::AmountMismatch { expected, reported } => {
                PaymentErrorKind::AmountMismatch { expected, reported }
            }
        };
        Self::new(provider, kind)
    }

    /// Stable machine-readable code for the messaging layer.
    pub fn code(&self) -> &'static str {
        match self.kind {
            PaymentErrorKind::Transport(_) => "transport_error",
            PaymentErrorKind::ProviderRejected { .. } => "provider_rejected",
            PaymentErrorKind::AmountMismatch { .. } => "amount_mismatch",
            PaymentErrorKind::GatewayDisabled => "gateway_disabled",
            PaymentErrorKind::UnknownTransaction => "unknown_transaction",
            PaymentErrorKind::Persistence(_) => "persistence_error",
        }
    }

    pub fn message(&self) -> String {
        self.kind.to_string()
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, PaymentErrorKind::Transport(_))
    }
}
