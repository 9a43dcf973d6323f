//! Exponential reconnect backoff.
//!
//! The policy is `min(base * 2^attempts, cap)`. It holds no state of its own;
//! the attempt counter lives in the channel and is only reset by a
//! successful open.

use std::time::Duration;

/// Default delay before the first reconnect.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(1_000);

/// Default ceiling for reconnect delays.
pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_millis(15_000);

/// Reconnect delay policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
}

impl Backoff {
    /// Create a policy with an explicit base delay and ceiling.
    #[must_use]
    pub const fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// Delay to wait before the reconnect that follows `attempts` failures.
    ///
    /// Never exceeds the cap, for any attempt count.
    #[must_use]
    pub fn delay(&self, attempts: u32) -> Duration {
        2u32.checked_pow(attempts)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.cap, |delay| delay.min(self.cap))
    }

    /// Base delay.
    #[must_use]
    pub fn base(&self) -> Duration {
        self.base
    }

    /// Delay ceiling.
    #[must_use]
    pub fn cap(&self) -> Duration {
        self.cap
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_CAP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(d: Duration) -> u128 {
        d.as_millis()
    }

    #[test]
    fn test_default_sequence_is_capped() {
        let backoff = Backoff::default();
        let delays: Vec<u128> = (0..7).map(|a| ms(backoff.delay(a))).collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 15000, 15000, 15000]);
    }

    #[test]
    fn test_large_attempt_counts_do_not_overflow() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay(31), DEFAULT_BACKOFF_CAP);
        assert_eq!(backoff.delay(32), DEFAULT_BACKOFF_CAP);
        assert_eq!(backoff.delay(u32::MAX), DEFAULT_BACKOFF_CAP);
    }

    #[test]
    fn test_custom_policy() {
        let backoff = Backoff::new(Duration::from_millis(250), Duration::from_secs(1));
        assert_eq!(ms(backoff.delay(0)), 250);
        assert_eq!(ms(backoff.delay(1)), 500);
        assert_eq!(ms(backoff.delay(2)), 1000);
        assert_eq!(ms(backoff.delay(3)), 1000);
    }
}
