//! Retry with exponential backoff and jitter

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::cancel::CancelToken;
use crate::error::{Error, Result};

/// Backoff policy for transient failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Must be at least 1.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Growth factor between retries.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Policy used by the stream consumer's reconnect loop.
    pub fn reconnect() -> Self {
        Self {
            max_attempts: u32::MAX,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }

    /// Delay before retry number `retry` (zero-based), with full jitter.
    ///
    /// Jitter spreads synchronized clients apart so a recovering server is
    /// not hit by a retry storm.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = self.multiplier.powi(retry.min(30) as i32);
        let capped = self
            .base_delay
            .mul_f64(exp)
            .min(self.max_delay)
            .as_millis() as u64;
        let jittered = rand::rng().random_range(capped / 2..=capped.max(1));
        Duration::from_millis(jittered)
    }
}

/// Run `op` under `policy`, retrying transient errors.
///
/// Non-transient errors surface immediately. Cancellation is checked before
/// every attempt and interrupts backoff sleeps; a cancelled call returns
/// [`Error::Cancelled`] without scheduling further attempts.
pub async fn with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancelToken,
    mut op: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = None;

    for attempt in 0..policy.max_attempts.max(1) {
        if attempt > 0 {
            let delay = policy.delay_for(attempt - 1);
            tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "Backing off before retry");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(Error::Cancelled),
            }
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_transient() => {
                tracing::warn!(
                    attempt = attempt + 1,
                    max_attempts = policy.max_attempts,
                    error = %error,
                    "Transient failure"
                );
                last_error = Some(error);
            }
            Err(error) => return Err(error),
        }
    }

    Err(last_error.unwrap_or_else(|| Error::TransientNetwork("retry budget exhausted".into())))
}
