//! Per-source request spacing for polite crawling.
//!
//! Each source key carries its own last-request timestamp and optional
//! interval override. Keys never throttle each other. Callers sharing a key
//! are serialized: the per-key lock is held across the sleep, so a second
//! caller always computes its wait from the first caller's fresh timestamp.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::AppError;

/// Limiter-wide defaults.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Minimum spacing between requests for the same key.
    pub min_interval: Duration,

    /// Maximum random jitter added on top of the interval (uniform [0, jitter]).
    /// Set to `Duration::ZERO` to disable.
    pub jitter: Duration,
}

impl RateLimitConfig {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            jitter: Duration::ZERO,
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    fn effective(&self, interval: Duration) -> Duration {
        if self.jitter.is_zero() {
            return interval;
        }
        interval + Duration::from_millis(rand_jitter_ms(self.jitter.as_millis() as u64))
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[derive(Debug, Default)]
struct KeyState {
    last: Option<Instant>,
    interval: Option<Duration>,
}

/// Shared, cloneable per-key rate limiter.
#[derive(Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    keys: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<KeyState>>>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            keys: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn slot(&self, key: &str) -> Arc<tokio::sync::Mutex<KeyState>> {
        let mut map = self.keys.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Rate limiter mutex was poisoned, recovering");
            PoisonError::into_inner(poisoned)
        });
        map.entry(key.to_string()).or_default().clone()
    }

    /// Override the interval for one key (e.g. a source's `rate_limit_seconds`).
    pub async fn set_interval(&self, key: &str, interval: Duration) {
        let slot = self.slot(key);
        slot.lock().await.interval = Some(interval);
    }

    /// Suspend until the key's interval has elapsed, then record now.
    pub async fn wait(&self, key: &str) {
        // A token that is never cancelled cannot make the wait fail.
        let _ = self.wait_cancellable(key, &CancellationToken::new()).await;
    }

    /// Like [`wait`](Self::wait) but aborts with `Cancelled` when the token fires.
    /// A cancelled wait does not record a request.
    pub async fn wait_cancellable(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<(), AppError> {
        let slot = self.slot(key);
        let mut state = tokio::select! {
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
            guard = slot.lock() => guard,
        };

        if let Some(last) = state.last {
            let required = self
                .config
                .effective(state.interval.unwrap_or(self.config.min_interval));
            let elapsed = last.elapsed();
            if elapsed < required {
                let sleep_for = required - elapsed;
                tracing::debug!(
                    key = %key,
                    sleep_ms = %sleep_for.as_millis(),
                    "Rate limiting request"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(AppError::Cancelled),
                    _ = tokio::time::sleep(sleep_for) => {}
                }
            }
        }

        state.last = Some(Instant::now());
        Ok(())
    }
}

// Uses a simple xorshift seeded from the current time.
pub(crate) fn rand_jitter_ms(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }
    let mut x = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    x % max_ms
}
