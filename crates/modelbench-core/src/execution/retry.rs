//! Exponential backoff between provider attempts.

use std::time::Duration;

use rand::Rng;

use crate::domain::RetryPolicy;

/// Fraction of the nominal delay added or removed at random.
const JITTER: f64 = 0.25;

/// Delay schedule: `initial * 2^(retry - 1)`, capped at `max`, with ±25%
/// jitter unless disabled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    jitter: bool,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            jitter: true,
        }
    }

    pub fn from_policy(policy: &RetryPolicy) -> Self {
        Self::new(
            Duration::from_secs(policy.initial_delay_seconds),
            Duration::from_secs(policy.max_delay_seconds),
        )
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Nominal delay before retry number `retry` (1 = first retry).
    pub fn nominal(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        self.initial
            .saturating_mul(1u32 << exponent)
            .min(self.max)
    }

    /// Delay to actually wait before retry number `retry`.
    pub fn delay(&self, retry: u32) -> Duration {
        let nominal = self.nominal(retry);
        if !self.jitter || nominal.is_zero() {
            return nominal;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(-JITTER..=JITTER);
        nominal.mul_f64(factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nominal_doubles_and_caps() {
        let backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(10));
        assert_eq!(backoff.nominal(1), Duration::from_secs(1));
        assert_eq!(backoff.nominal(2), Duration::from_secs(2));
        assert_eq!(backoff.nominal(3), Duration::from_secs(4));
        assert_eq!(backoff.nominal(4), Duration::from_secs(8));
        assert_eq!(backoff.nominal(5), Duration::from_secs(10));
        assert_eq!(backoff.nominal(200), Duration::from_secs(10));
    }

    #[test]
    fn test_jitter_stays_within_a_quarter() {
        let backoff = Backoff::new(Duration::from_secs(4), Duration::from_secs(60));
        for _ in 0..200 {
            let d = backoff.delay(1);
            assert!(d >= Duration::from_secs(3) && d <= Duration::from_secs(5), "{d:?}");
        }
    }

    #[test]
    fn test_without_jitter_is_exact() {
        let policy = RetryPolicy {
            max_retry_attempts: 3,
            initial_delay_seconds: 2,
            max_delay_seconds: 60,
        };
        let backoff = Backoff::from_policy(&policy).with_jitter(false);
        assert_eq!(backoff.delay(2), Duration::from_secs(4));
    }

    #[test]
    fn test_zero_initial_delay_never_waits() {
        let backoff = Backoff::new(Duration::ZERO, Duration::from_secs(60));
        assert_eq!(backoff.delay(1), Duration::ZERO);
        assert_eq!(backoff.delay(9), Duration::ZERO);
    }
}
