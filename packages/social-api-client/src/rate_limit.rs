//! Process-wide token bucket shared by every request a client issues.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SocialApiError};

/// Token bucket parameters.
#[derive(Debug, Clone, Copy)]
pub struct RateLimit {
    /// Burst size: tokens available when the bucket is full.
    pub capacity: u32,
    /// Sustained rate in tokens per second.
    pub refill_per_second: f64,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            capacity: 3,
            refill_per_second: 3.0,
        }
    }
}

impl RateLimit {
    fn quota(&self) -> Quota {
        let burst = NonZeroU32::new(self.capacity).unwrap_or(NonZeroU32::MIN);
        let rate = if self.refill_per_second.is_finite() && self.refill_per_second > 0.0 {
            self.refill_per_second
        } else {
            1.0
        };
        let period = Duration::from_secs_f64(1.0 / rate);
        Quota::with_period(period)
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
            .allow_burst(burst)
    }
}

/// Rate limiter shared across clones and concurrent callers.
///
/// Waiters are not starved indefinitely: governor hands out cells in the order
/// their readiness time comes up.
#[derive(Clone)]
pub struct SharedRateLimiter {
    limiter: Arc<DefaultDirectRateLimiter>,
    limit: RateLimit,
}

impl SharedRateLimiter {
    pub fn new(limit: RateLimit) -> Self {
        Self {
            limiter: Arc::new(RateLimiter::direct(limit.quota())),
            limit,
        }
    }

    pub fn limit(&self) -> RateLimit {
        self.limit
    }

    /// Wait for a token, or bail out with `Cancelled`.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<()> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SocialApiError::Cancelled),
            _ = self.limiter.until_ready() => Ok(()),
        }
    }

    /// Take a token without waiting.
    pub fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }
}

impl std::fmt::Debug for SharedRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRateLimiter")
            .field("limit", &self.limit)
            .finish()
    }
}
