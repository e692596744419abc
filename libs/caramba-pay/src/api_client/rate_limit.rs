use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Sliding-window call counter per outbound method name.
///
/// Over the cap, a call is delayed until the oldest call in the window
/// expires, but never by more than `max_stall`. Calls are never rejected.
#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    cap: usize,
    max_stall: Duration,
    calls: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Duration::from_secs(60), 30, Duration::from_secs(1))
    }
}

impl RateLimiter {
    pub fn new(window: Duration, cap: usize, max_stall: Duration) -> Self {
        Self {
            window,
            cap,
            max_stall,
            calls: Mutex::new(HashMap::new()),
        }
    }

    fn reserve(&self, method: &str) -> Duration {
        let now = Instant::now();
        let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
        let entries = calls.entry(method.to_string()).or_default();

        while let Some(oldest) = entries.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                entries.pop_front();
            } else {
                break;
            }
        }

        let stall = if entries.len() >= self.cap {
            entries
                .front()
                .map(|oldest| (*oldest + self.window).saturating_duration_since(now))
                .unwrap_or_default()
                .min(self.max_stall)
        } else {
            Duration::ZERO
        };

        entries.push_back(now + stall);
        stall
    }

    /// Records a call for `method`, sleeping first if the window is full.
    /// Returns how long the caller was held.
    pub async fn acquire(&self, method: &str, deadline: Option<Instant>) -> Duration {
        let mut stall = self.reserve(method);
        if let Some(deadline) = deadline {
            stall = stall.min(deadline.saturating_duration_since(Instant::now()));
        }
        if !stall.is_zero() {
            debug!("Rate limit reached for {}, stalling {:?}", method, stall);
            tokio::time::sleep(stall).await;
        }
        stall
    }
}
