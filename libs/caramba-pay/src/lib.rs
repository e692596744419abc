//! Payment gateway layer: outbound client, provider adapters, registry and
//! the verification state machine.

pub mod api_client;
pub mod error;
pub mod extract;
pub mod gateways;
pub mod models;
pub mod orchestrator;
pub mod settings;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use api_client::{ApiClient, ApiResponse, OutboundRequest, RetryPolicy};
pub use error::{GatewayError, PaymentError, PaymentErrorKind};
pub use gateways::{GatewayRegistry, PaymentAdapter};
pub use models::{GatewayConfig, PaymentLink, PaymentRequest, VerificationResult, VerifyOutcome};
pub use orchestrator::PaymentOrchestrator;
pub use settings::{SettingsProvider, StaticSettings};
