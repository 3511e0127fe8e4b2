//! Backoff policy for throttled and transient responses.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff with symmetric jitter and a hard attempt ceiling.
///
/// With the defaults (500 ms base, ×2, 8 s cap):
/// - attempt 1 failed: ~500 ms
/// - attempt 2 failed: ~1 s
/// - attempt 3 failed: ~2 s
/// - attempt 4 failed: ~4 s
/// - attempt 5 failed: give up
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Fraction of the nominal delay added or removed at random (0.2 = ±20%).
    pub jitter: f64,
    /// Total attempts per request, including the first one.
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(8),
            jitter: 0.2,
            max_attempts: 5,
        }
    }
}

impl BackoffPolicy {
    /// Delay before the next attempt, without jitter.
    ///
    /// `attempt` is the 1-indexed attempt that just failed.
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// Delay before the next attempt with jitter applied, never above `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let nominal = self.nominal_delay(attempt).as_secs_f64();
        let jitter = self.jitter.clamp(0.0, 1.0);
        let factor = if jitter > 0.0 {
            rand::thread_rng().gen_range((1.0 - jitter)..=(1.0 + jitter))
        } else {
            1.0
        };
        let secs = (nominal * factor).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Whether another attempt is allowed after `attempt` attempts.
    pub fn allows_retry_after(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}
