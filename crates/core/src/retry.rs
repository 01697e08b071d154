use std::time::Duration;

use rand::Rng;

/// Exponential back-off with random jitter for retrying contended operations.
///
/// The delay for attempt `n` is `base * multiplier^n`, clamped to `max`, then
/// spread by up to `jitter` in either direction so concurrent callers do not
/// all retry at the same instant.
#[derive(Debug, Clone)]
pub struct RetryStrategy {
    /// Initial delay before the first retry.
    pub base: Duration,
    /// Upper bound on the computed delay.
    pub max: Duration,
    /// Factor applied on each successive attempt.
    pub multiplier: f64,
    /// Fractional jitter, e.g. `0.25` for ±25%. Zero disables jitter.
    pub jitter: f64,
    /// How many retries are allowed before the operation gives up.
    pub max_retries: u32,
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(50),
            max: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: 0.25,
            max_retries: 3,
        }
    }
}

impl RetryStrategy {
    /// Compute the delay duration for the given zero-based `attempt` number.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        // In practice `attempt` is a small retry count (< 100), so wrapping
        // from u32 to i32 cannot occur.
        #[allow(clippy::cast_possible_wrap)]
        let raw = self.base.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let clamped = raw.min(self.max.as_secs_f64());

        let spread = if self.jitter > 0.0 {
            rand::thread_rng().gen_range(-self.jitter..=self.jitter)
        } else {
            0.0
        };

        Duration::from_secs_f64((clamped * (1.0 + spread)).max(0.0))
    }

    /// Sleep for the delay belonging to `attempt`.
    pub async fn sleep_for(&self, attempt: u32) {
        tokio::time::sleep(self.delay_for(attempt)).await;
    }
}
