//! Bounded exponential backoff around a fallible async operation.
//! Delay before retry `i` (0-based) is `base_delay * 2^i`; no jitter.
//! A zero base retries immediately.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::TranslateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX))
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the attempt
/// budget is spent. The last error is returned unchanged.
/// Side effects are not deduplicated; `op` must be safe to repeat.
pub async fn run_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, TranslateError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TranslateError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(TranslateError::Cancelled);
        }

        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if !err.is_retryable() || attempt + 1 >= max_attempts {
            return Err(err);
        }

        let wait = policy.delay_for(attempt);
        warn!(
            attempt = attempt + 1,
            max_attempts,
            wait_ms = wait.as_millis() as u64,
            error = %err,
            "remote call failed, retrying"
        );
        if !wait.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = cancel.cancelled() => return Err(TranslateError::Cancelled),
            }
        }
        attempt += 1;
    }
}
