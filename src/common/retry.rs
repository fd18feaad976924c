use std::time::Duration;

/// Exponential backoff policy for transient failures.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Backoff {
    /// Attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound on the summed delays of one retry loop.
    pub max_total_wait: Duration,
}

impl Backoff {
    /// Delay before retry number `retry` (1-based): `base * 2^(retry-1)`,
    /// capped at `max_delay`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// Delay to wait after `failed_attempts` failures having already waited
    /// `waited`, or `None` once the attempt or wait budget is spent.
    pub fn next_delay(&self, failed_attempts: u32, waited: Duration) -> Option<Duration> {
        if failed_attempts >= self.max_attempts {
            return None;
        }
        let delay = self.delay_for(failed_attempts);
        if waited + delay > self.max_total_wait {
            return None;
        }
        Some(delay)
    }
}
