//! Retry delays for transient push failures.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff with ±50% jitter.
///
/// `next_delay(n) = min(initial * 2^n, max) * (1 + U(-0.5, 0.5))`.
/// The failure counter lives with the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_millis(16_000),
        }
    }
}

impl BackoffPolicy {
    /// Delay before jitter.
    pub fn base_delay(&self, failures: u32) -> Duration {
        let factor = 1u32.checked_shl(failures).unwrap_or(u32::MAX);
        self.initial
            .checked_mul(factor)
            .map_or(self.max, |d| d.min(self.max))
    }

    pub fn next_delay_with<R: Rng + ?Sized>(&self, failures: u32, rng: &mut R) -> Duration {
        let jitter: f64 = rng.gen_range(-0.5..0.5);
        self.base_delay(failures).mul_f64(1.0 + jitter)
    }

    pub fn next_delay(&self, failures: u32) -> Duration {
        self.next_delay_with(failures, &mut rand::thread_rng())
    }
}
