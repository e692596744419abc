mod rate_limit;
mod transport;

pub use rate_limit::RateLimiter;
pub use transport::{HttpCall, HttpTransport, RawResponse, ReqwestTransport, TransportFailure};

use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

use crate::extract::{self, FieldPath};

const RETRY_AFTER_RULES: &[FieldPath] = &[&["retry_after"], &["parameters", "retry_after"]];
const MAX_RETRY_AFTER: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    Json(Value),
    Form(Vec<(String, String)>),
}

#[derive(Debug, Clone)]
pub struct OutboundRequest {
    /// Rate-limit bucket and log label, e.g. `zibal.verify`.
    pub method_name: String,
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
    pub deadline: Option<Instant>,
}

impl OutboundRequest {
    pub fn new(method_name: impl Into<String>, method: Method, url: impl Into<String>) -> Self {
        Self {
            method_name: method_name.into(),
            method,
            url: url.into(),
            headers: Vec::new(),
            body: RequestBody::Empty,
            deadline: None,
        }
    }

    pub fn post(method_name: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(method_name, Method::POST, url)
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    pub fn form<K: Into<String>, V: Into<String>>(mut self, pairs: impl IntoIterator<Item = (K, V)>) -> Self {
        self.body = RequestBody::Form(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect());
        self
    }

    pub fn deadline(mut self, at: Instant) -> Self {
        self.deadline = Some(at);
        self
    }

    fn encode(&self) -> Result<(Vec<(String, String)>, Option<Vec<u8>>), String> {
        let mut headers = self.headers.clone();
        let body = match &self.body {
            RequestBody::Empty => None,
            RequestBody::Json(value) => {
                headers.push(("Content-Type".to_string(), "application/json".to_string()));
                Some(serde_json::to_vec(value).map_err(|e| e.to_string())?)
            }
            RequestBody::Form(pairs) => {
                headers.push((
                    "Content-Type".to_string(),
                    "application/x-www-form-urlencoded".to_string(),
                ));
                Some(serde_urlencoded::to_string(pairs).map_err(|e| e.to_string())?.into_bytes())
            }
        };
        Ok((headers, body))
    }
}

/// Outcome of `ApiClient::execute`. Failures are data: `ok` is false and
/// `error` explains why; `status` is `None` when no HTTP response arrived.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub ok: bool,
    pub status: Option<u16>,
    pub body: Option<Value>,
    pub text: String,
    pub error: Option<String>,
    pub attempts: u32,
}

impl ApiResponse {
    fn from_raw(raw: RawResponse, attempts: u32) -> Self {
        let ok = (200..300).contains(&raw.status);
        Self {
            ok,
            status: Some(raw.status),
            body: serde_json::from_slice(&raw.body).ok(),
            text: String::from_utf8_lossy(&raw.body).into_owned(),
            error: (!ok).then(|| format!("HTTP {}", raw.status)),
            attempts,
        }
    }

    fn transport(detail: impl Into<String>, attempts: u32) -> Self {
        Self {
            ok: false,
            status: None,
            body: None,
            text: String::new(),
            error: Some(detail.into()),
            attempts,
        }
    }

    pub fn is_transport_failure(&self) -> bool {
        self.status.is_none()
    }

    pub fn is_server_error(&self) -> bool {
        matches!(self.status, Some(s) if s == 429 || s >= 500)
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Connect plus total time for a single attempt.
    pub timeout: Duration,
    /// Overall budget for one `execute`, retries and stalls included.
    pub budget: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            timeout: Duration::from_secs(30),
            budget: None,
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

fn is_retryable_status(status: u16) -> bool {
    status == 429 || status >= 500
}

fn retry_after(raw: &RawResponse) -> Option<Duration> {
    let from_header = raw
        .header("retry-after")
        .and_then(|v| v.trim().parse::<f64>().ok());
    let from_body = || {
        serde_json::from_slice::<Value>(&raw.body)
            .ok()
            .and_then(|body| extract::first_number(&body, RETRY_AFTER_RULES))
    };
    from_header
        .or_else(from_body)
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(|secs| Duration::from_secs_f64(secs.min(MAX_RETRY_AFTER.as_secs_f64())))
}

/// Sleeps for `delay` unless that would end past `deadline`.
async fn sleep_within(delay: Duration, deadline: Option<Instant>) -> bool {
    if let Some(deadline) = deadline {
        if Instant::now() + delay > deadline {
            return false;
        }
    }
    tokio::time::sleep(delay).await;
    true
}

/// Shared outbound HTTP executor used by every gateway adapter.
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn HttpTransport>,
    policy: RetryPolicy,
    limiter: Arc<RateLimiter>,
}

impl ApiClient {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            policy: RetryPolicy::default(),
            limiter: Arc::new(RateLimiter::default()),
        }
    }

    /// Production client backed by reqwest.
    pub fn with_reqwest(policy: RetryPolicy) -> Result<Self, reqwest::Error> {
        let transport = ReqwestTransport::new(policy.timeout)?;
        Ok(Self::new(Arc::new(transport)).with_policy(policy))
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = Arc::new(limiter);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn execute(&self, request: OutboundRequest) -> ApiResponse {
        let deadline = request
            .deadline
            .or_else(|| self.policy.budget.map(|budget| Instant::now() + budget));
        let (headers, body) = match request.encode() {
            Ok(encoded) => encoded,
            Err(e) => return ApiResponse::transport(format!("failed to encode request: {}", e), 0),
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            self.limiter.acquire(&request.method_name, deadline).await;

            let timeout = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return ApiResponse::transport("deadline exceeded", attempt - 1);
                    }
                    self.policy.timeout.min(remaining)
                }
                None => self.policy.timeout,
            };

            let call = HttpCall {
                method: request.method.clone(),
                url: request.url.clone(),
                headers: headers.clone(),
                body: body.clone(),
                timeout,
            };

            let (delay, last) = match self.transport.execute(call).await {
                Ok(raw) if is_retryable_status(raw.status) => {
                    let hint = retry_after(&raw);
                    let status = raw.status;
                    let response = ApiResponse::from_raw(raw, attempt);
                    if attempt > self.policy.max_retries {
                        warn!("{} gave up after {} attempts: HTTP {}", request.method_name, attempt, status);
                        return response;
                    }
                    let delay = hint.unwrap_or_else(|| self.policy.backoff(attempt));
                    warn!(
                        "{} returned HTTP {} (attempt {}), retrying in {:?}",
                        request.method_name, status, attempt, delay
                    );
                    (delay, response)
                }
                Ok(raw) => return ApiResponse::from_raw(raw, attempt),
                Err(failure) => {
                    let response = ApiResponse::transport(failure.to_string(), attempt);
                    if attempt > self.policy.max_retries {
                        warn!("{} gave up after {} attempts: {}", request.method_name, attempt, failure);
                        return response;
                    }
                    let delay = self.policy.backoff(attempt);
                    warn!(
                        "{} failed (attempt {}): {}, retrying in {:?}",
                        request.method_name, attempt, failure, delay
                    );
                    (delay, response)
                }
            };

            if !sleep_within(delay, deadline).await {
                warn!("{} stopped retrying: deadline would pass during backoff", request.method_name);
                return last;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;
    use serde_json::json;

    fn client(mock: &Arc<MockTransport>) -> ApiClient {
        ApiClient::new(mock.clone())
    }

    #[tokio::test(start_paused = true)]
    async fn success_needs_a_single_attempt() {
        let mock = Arc::new(MockTransport::new());
        mock.on_json("/ok", 200, json!({"result": 100}));

        let resp = client(&mock).execute(OutboundRequest::post("t.ok", "https://p/ok")).await;
        assert!(resp.ok);
        assert_eq!(resp.attempts, 1);
        assert_eq!(resp.body, Some(json!({"result": 100})));
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failures_back_off_linearly() {
        let mock = Arc::new(MockTransport::new());
        mock.on("/flaky", Err(TransportFailure::Timeout))
            .on("/flaky", Err(TransportFailure::Connect("refused".into())))
            .on_json("/flaky", 200, json!({}));

        let started = Instant::now();
        let resp = client(&mock).execute(OutboundRequest::post("t.flaky", "https://p/flaky")).await;

        assert!(resp.ok);
        assert_eq!(resp.attempts, 3);
        // 1 * 1s after the first failure, 2 * 1s after the second.
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_are_returned_as_data() {
        let mock = Arc::new(MockTransport::new());
        mock.on("/down", Err(TransportFailure::Timeout));

        let resp = client(&mock).execute(OutboundRequest::post("t.down", "https://p/down")).await;
        assert!(!resp.ok);
        assert!(resp.is_transport_failure());
        assert_eq!(resp.attempts, 4);
        assert_eq!(mock.call_count(), 4);
        assert_eq!(resp.error.as_deref(), Some("request timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_header_is_honored() {
        let mock = Arc::new(MockTransport::new());
        mock.on("/busy", Ok(RawResponse::new(503, "busy").with_header("Retry-After", "5")))
            .on_json("/busy", 200, json!({}));

        let started = Instant::now();
        let resp = client(&mock).execute(OutboundRequest::post("t.busy", "https://p/busy")).await;
        assert!(resp.ok);
        assert_eq!(started.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_body_field_is_honored() {
        let mock = Arc::new(MockTransport::new());
        mock.on_json("/limited", 429, json!({"ok": false, "parameters": {"retry_after": 2}}))
            .on_json("/limited", 200, json!({"ok": true}));

        let started = Instant::now();
        let resp = client(&mock).execute(OutboundRequest::post("t.limited", "https://p/limited")).await;
        assert!(resp.ok);
        assert_eq!(resp.attempts, 2);
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn client_errors_are_not_retried() {
        let mock = Arc::new(MockTransport::new());
        mock.on_json("/bad", 400, json!({"error_code": 32}));

        let resp = client(&mock).execute(OutboundRequest::post("t.bad", "https://p/bad")).await;
        assert!(!resp.ok);
        assert_eq!(resp.status, Some(400));
        assert_eq!(resp.body, Some(json!({"error_code": 32})));
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_stops_at_the_deadline() {
        let mock = Arc::new(MockTransport::new());
        mock.on("/slow", Err(TransportFailure::Timeout));
        let policy = RetryPolicy {
            budget: Some(Duration::from_millis(2500)),
            ..RetryPolicy::default()
        };

        let resp = client(&mock)
            .with_policy(policy)
            .execute(OutboundRequest::post("t.slow", "https://p/slow"))
            .await;

        // Attempt 1 at 0s, attempt 2 at 1s; the 2s backoff would end at 3s.
        assert!(!resp.ok);
        assert_eq!(resp.attempts, 2);
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn bodies_are_encoded_with_content_type() {
        let mock = Arc::new(MockTransport::new());
        mock.on_json("/form", 200, json!({}));
        mock.on_json("/json", 200, json!({}));
        let client = client(&mock);

        client
            .execute(OutboundRequest::post("t.form", "https://p/form").form([("api_key", "k"), ("amount", "100")]))
            .await;
        client
            .execute(OutboundRequest::post("t.json", "https://p/json").header("X-API-KEY", "k").json(json!({"a": 1})))
            .await;

        let calls = mock.calls();
        assert_eq!(calls[0].header("content-type"), Some("application/x-www-form-urlencoded"));
        assert_eq!(
            calls[0].form_body(),
            vec![("api_key".to_string(), "k".to_string()), ("amount".to_string(), "100".to_string())]
        );
        assert_eq!(calls[1].header("content-type"), Some("application/json"));
        assert_eq!(calls[1].header("x-api-key"), Some("k"));
        assert_eq!(calls[1].json_body(), Some(json!({"a": 1})));
    }
}
