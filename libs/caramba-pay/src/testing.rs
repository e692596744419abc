//! Scripted HTTP transport for exercising adapters and the orchestrator
//! without network access.

use async_trait::async_trait;
use caramba_db::models::{Metadata, Transaction, TransactionStatus};
use chrono::Utc;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::api_client::{ApiClient, HttpCall, HttpTransport, RateLimiter, RawResponse, TransportFailure};
use crate::models::{GatewayConfig, PaymentRequest};

type Reply = Result<RawResponse, TransportFailure>;

struct Route {
    fragment: String,
    replies: VecDeque<(Reply, Duration)>,
}

/// Routes each call to the first route whose fragment occurs in the URL.
/// Replies for a route are consumed in order as calls arrive; the last one
/// repeats.
#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<Vec<Route>>,
    calls: Mutex<Vec<HttpCall>>,
    latency: Option<Duration>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps this long before replying.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn on(&self, fragment: &str, reply: Reply) -> &Self {
        self.on_after(fragment, Duration::ZERO, reply)
    }

    /// Like `on`, but this reply arrives `delay` after the call, on top of
    /// any transport-wide latency.
    pub fn on_after(&self, fragment: &str, delay: Duration, reply: Reply) -> &Self {
        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        match routes.iter_mut().find(|r| r.fragment == fragment) {
            Some(route) => route.replies.push_back((reply, delay)),
            None => routes.push(Route {
                fragment: fragment.to_string(),
                replies: VecDeque::from([(reply, delay)]),
            }),
        }
        self
    }

    pub fn on_json(&self, fragment: &str, status: u16, body: Value) -> &Self {
        self.on(fragment, Ok(RawResponse::json(status, &body)))
    }

    pub fn calls(&self) -> Vec<HttpCall> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn calls_to(&self, fragment: &str) -> Vec<HttpCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.url.contains(fragment))
            .collect()
    }

    fn reply_for(&self, url: &str) -> (Reply, Duration) {
        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(route) = routes.iter_mut().find(|r| url.contains(&r.fragment)) else {
            return (
                Err(TransportFailure::Other(format!("no mock route for {}", url))),
                Duration::ZERO,
            );
        };
        let next = if route.replies.len() > 1 {
            route.replies.pop_front()
        } else {
            route.replies.front().cloned()
        };
        next.unwrap_or((Err(TransportFailure::Timeout), Duration::ZERO))
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn execute(&self, call: HttpCall) -> Result<RawResponse, TransportFailure> {
        let (reply, delay) = self.reply_for(&call.url);
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
        let wait = self.latency.unwrap_or_default() + delay;
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
        reply
    }
}

/// Client over `mock` with the default retry policy and a limiter that never stalls.
pub fn test_client(mock: &Arc<MockTransport>) -> ApiClient {
    ApiClient::new(mock.clone()).with_rate_limiter(RateLimiter::new(
        Duration::from_secs(60),
        usize::MAX,
        Duration::ZERO,
    ))
}

pub fn gateway_config(provider: &str, sandbox: bool, credentials: &[(&str, &str)]) -> GatewayConfig {
    GatewayConfig {
        provider_id: provider.to_string(),
        enabled: true,
        sandbox_mode: sandbox,
        credentials: credentials
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        callback_url: format!("https://pay.example/payments/{}/callback", provider),
    }
}

pub fn payment_request(user_id: i64, amount: i64) -> PaymentRequest {
    PaymentRequest {
        user_id,
        amount,
        description: "VPN credit".to_string(),
        metadata: Metadata::new(),
    }
}

/// A pending row as the store would hand it to an adapter.
pub fn pending_transaction(provider: &str, token: &str, amount: i64, metadata: Metadata) -> Transaction {
    let now = Utc::now();
    Transaction {
        id: 1,
        user_id: 7,
        provider: provider.to_string(),
        token: token.to_string(),
        amount,
        description: "VPN credit".to_string(),
        metadata,
        status: TransactionStatus::Pending,
        ref_id: None,
        card_mask: None,
        failure_code: None,
        failure_message: None,
        credited_at: None,
        created_at: now,
        updated_at: now,
    }
}

pub fn order_metadata(order_id: &str) -> Metadata {
    Metadata::from([("order_id".to_string(), order_id.to_string())])
}
