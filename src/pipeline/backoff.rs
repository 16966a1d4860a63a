//! Capped exponential backoff with optional full jitter.

use std::time::Duration;

use rand::Rng;

/// Doubling backoff: attempt `n` waits up to `base * 2^n`, never more than `cap`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    jitter: bool,
}

impl Backoff {
    /// Backoff with full jitter.
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap: cap.max(base),
            jitter: true,
        }
    }

    /// Enable or disable jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn cap(&self) -> Duration {
        self.cap
    }

    /// Upper bound of the delay for the zero-based `attempt`.
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.checked_mul(factor).unwrap_or(self.cap).min(self.cap)
    }

    /// Delay before the zero-based `attempt`.
    ///
    /// With jitter the delay is uniform in `[0, ceiling]`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling(attempt);
        if !self.jitter || ceiling.is_zero() {
            return ceiling;
        }
        let millis = u64::try_from(ceiling.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rand::thread_rng().gen_range(0..=millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ceiling_doubles_until_cap() {
        let backoff = Backoff::new(Duration::from_secs(10), Duration::from_secs(300));
        assert_eq!(backoff.ceiling(0), Duration::from_secs(10));
        assert_eq!(backoff.ceiling(1), Duration::from_secs(20));
        assert_eq!(backoff.ceiling(4), Duration::from_secs(160));
        assert_eq!(backoff.ceiling(5), Duration::from_secs(300));
        assert_eq!(backoff.ceiling(64), Duration::from_secs(300));
    }

    #[test]
    fn test_delay_without_jitter_is_ceiling() {
        let backoff =
            Backoff::new(Duration::from_secs(1), Duration::from_secs(30)).with_jitter(false);
        for attempt in 0..8 {
            assert_eq!(backoff.delay(attempt), backoff.ceiling(attempt));
        }
    }

    #[test]
    fn test_jittered_delay_stays_in_range() {
        let backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(2));
        for attempt in 0..10 {
            for _ in 0..50 {
                assert!(backoff.delay(attempt) <= backoff.ceiling(attempt));
            }
        }
    }

    #[test]
    fn test_cap_below_base_is_raised() {
        let backoff = Backoff::new(Duration::from_secs(5), Duration::from_secs(1));
        assert_eq!(backoff.cap(), Duration::from_secs(5));
        assert_eq!(backoff.ceiling(3), Duration::from_secs(5));
    }
}
