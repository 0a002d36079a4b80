//! Token-bucket admission control for outbound provider calls.
//! Capacity 10, one token per second by default. One token per admitted call.

use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::TranslateError;

/// What `acquire` does when the bucket is empty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitMode {
    /// Sleep until a token is available.
    #[default]
    Wait,
    /// Fail with `RateLimitExceeded`.
    Strict,
    /// No limiting at all (deterministic tests).
    Disabled,
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

pub struct RateLimiter {
    mode: RateLimitMode,
    capacity: f64,
    refill_interval: Duration,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Bucket starts full.
    pub fn new(mode: RateLimitMode, capacity: f64, refill_interval: Duration) -> Self {
        Self {
            mode,
            capacity,
            refill_interval,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn mode(&self) -> RateLimitMode {
        self.mode
    }

    /// Tokens available right now, after refilling for elapsed time.
    pub fn available_tokens(&self) -> f64 {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket);
        bucket.tokens
    }

    /// Take a token if one is available; otherwise return how long until one is.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        if self.mode == RateLimitMode::Disabled {
            return Ok(());
        }
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return Ok(());
        }
        let wait = self.refill_interval.mul_f64(1.0 - bucket.tokens);
        Err(wait.max(Duration::from_millis(1)))
    }

    /// Admit one call according to the configured mode.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), TranslateError> {
        loop {
            let wait = match self.try_acquire() {
                Ok(()) => return Ok(()),
                Err(wait) => wait,
            };

            if self.mode == RateLimitMode::Strict {
                warn!("rate limit exceeded (strict mode)");
                return Err(TranslateError::RateLimitExceeded);
            }

            debug!(wait_ms = wait.as_millis() as u64, "rate limited, waiting for token");
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = cancel.cancelled() => return Err(TranslateError::Cancelled),
            }
        }
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        let gained = elapsed.as_secs_f64() / self.refill_interval.as_secs_f64();
        bucket.tokens = (bucket.tokens + gained).min(self.capacity);
        bucket.last_refill = now;
    }
}
