//! Progressive timeout retries.
//!
//! A [`RetryPolicy`] runs an operation once per entry of its
//! [`RetrySchedule`], bounding each attempt by that entry's timeout. The
//! first success wins; exhaustion reports the last observed error. Errors
//! that are not [retryable](AppError::is_retryable) end the run at once.

use std::future::Future;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::AppError;

/// Ordered, finite sequence of per-attempt timeouts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySchedule {
    timeouts: Vec<Duration>,
}

impl RetrySchedule {
    pub fn new(timeouts: Vec<Duration>) -> Self {
        Self { timeouts }
    }

    pub fn from_secs(secs: &[u64]) -> Self {
        Self::new(secs.iter().map(|s| Duration::from_secs(*s)).collect())
    }

    /// `base, 2*base, 4*base, ...` with `attempts` entries.
    pub fn progressive(base: Duration, attempts: usize) -> Self {
        let timeouts = (0..attempts)
            .map(|i| base.saturating_mul(1u32 << i.min(16)))
            .collect();
        Self { timeouts }
    }

    pub fn timeouts(&self) -> &[Duration] {
        &self.timeouts
    }

    pub fn len(&self) -> usize {
        self.timeouts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timeouts.is_empty()
    }

    /// True when every timeout is at least as long as the one before it.
    pub fn is_progressive(&self) -> bool {
        self.timeouts.windows(2).all(|w| w[0] <= w[1])
    }

    /// Sum of all attempt bounds.
    pub fn total(&self) -> Duration {
        self.timeouts.iter().sum()
    }
}

/// Runs operations against a [`RetrySchedule`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    schedule: RetrySchedule,
    /// Pause between a failed attempt and the next one.
    delay_between: Duration,
}

impl RetryPolicy {
    pub fn new(schedule: RetrySchedule) -> Self {
        Self {
            schedule,
            delay_between: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_between = delay;
        self
    }

    pub fn schedule(&self) -> &RetrySchedule {
        &self.schedule
    }

    pub fn delay_between(&self) -> Duration {
        self.delay_between
    }

    /// Execute `op` once per schedule entry until it succeeds.
    ///
    /// `op` receives the timeout of the current attempt. A cancelled token
    /// aborts the in-flight attempt and skips remaining entries.
    pub async fn execute<T, F, Fut>(
        &self,
        mut op: F,
        cancel: &CancellationToken,
    ) -> Result<T, AppError>
    where
        F: FnMut(Duration) -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let total = self.schedule.len();
        let mut last_error: Option<AppError> = None;

        for (idx, &timeout) in self.schedule.timeouts.iter().enumerate() {
            let attempt = idx + 1;

            if idx > 0 && !self.delay_between.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(AppError::Cancelled),
                    _ = tokio::time::sleep(self.delay_between) => {}
                }
            }

            let started = Instant::now();
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(AppError::Cancelled),
                res = tokio::time::timeout(timeout, op(timeout)) => res,
            };

            match outcome {
                Ok(Ok(value)) => {
                    if attempt > 1 {
                        tracing::debug!(attempt, total, "Retry succeeded");
                    }
                    return Ok(value);
                }
                Ok(Err(AppError::Cancelled)) => return Err(AppError::Cancelled),
                Ok(Err(e)) if !e.is_retryable() => {
                    tracing::warn!(
                        attempt,
                        total,
                        error = %e,
                        "Permanent failure, not retrying"
                    );
                    return Err(AppError::RetriesExhausted {
                        attempts: attempt,
                        last_error: Box::new(e),
                    });
                }
                Ok(Err(e)) => {
                    tracing::warn!(
                        attempt,
                        total,
                        timeout_s = timeout.as_secs_f64(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        error = %e,
                        "Attempt failed"
                    );
                    last_error = Some(e);
                }
                Err(_) => {
                    tracing::warn!(
                        attempt,
                        total,
                        timeout_s = timeout.as_secs_f64(),
                        "Attempt timed out"
                    );
                    last_error = Some(AppError::Timeout(timeout));
                }
            }
        }

        Err(AppError::RetriesExhausted {
            attempts: total,
            last_error: Box::new(
                last_error.unwrap_or_else(|| AppError::Generic("retry schedule is empty".into())),
            ),
        })
    }
}
