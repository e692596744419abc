use axum::{
    Router,
    routing::{get, post},
};
use caramba_db::repositories::{SettingsRepository, TransactionRepository, UserRepository};
use caramba_pay::{ApiClient, GatewayRegistry, PaymentOrchestrator, RetryPolicy};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod error;
mod handlers;
mod services;


use config::CallbackConfig;
use services::SettingsService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "caramba_pay_callback=debug,caramba_pay=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = CallbackConfig::load()?;
    tracing::info!("Payment callback service starting...");

    let pool = caramba_db::connect(&config.database_url, 5).await?;
    let settings = SettingsService::new(SettingsRepository::new(pool.clone())).await?;
    let registry = GatewayRegistry::load(&settings).await;

    let client = ApiClient::with_reqwest(RetryPolicy::default())?;
    let store = Arc::new(TransactionRepository::new(pool.clone()));
    let orchestrator = PaymentOrchestrator::new(registry, store, &client)
        .with_deadline(Duration::from_secs(config.payment_deadline_secs));

    if config.internal_token.is_none() {
        tracing::warn!("INTERNAL_TOKEN is not set, payment creation endpoint is closed");
    }

    let state = AppState {
        config: config.clone(),
        orchestrator: Arc::new(orchestrator),
        users: UserRepository::new(pool),
    };
    let app = app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.listen_port));
    tracing::info!("Payment callbacks listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Clone)]
pub struct AppState {
    pub config: CallbackConfig,
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub users: UserRepository,
}

fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route(
            "/payments/{provider}/callback",
            get(handlers::callback::payment_callback).post(handlers::callback::payment_callback),
        )
        .route("/payments/{provider}", post(handlers::payments::create_payment))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
