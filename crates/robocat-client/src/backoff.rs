//! Reconnect delay policy.

use std::time::Duration;

/// Doubling delay with an attempt budget.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Option<Duration>,
    limit: u32,
    attempt: u32,
}

impl Backoff {
    #[must_use]
    pub const fn new(base: Duration, max: Option<Duration>, limit: u32) -> Self {
        Self {
            base,
            max,
            limit,
            attempt: 0,
        }
    }

    /// Whether the attempt budget is spent.
    #[must_use]
    pub const fn exhausted(&self) -> bool {
        self.attempt >= self.limit
    }

    /// Attempts made since the last reset.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay before the next attempt; counts the attempt.
    pub fn next_delay(&mut self) -> Duration {
        let factor = 2u32.saturating_pow(self.attempt);
        let delay = self.base.saturating_mul(factor);
        self.attempt = self.attempt.saturating_add(1);
        match self.max {
            Some(max) => delay.min(max),
            None => delay,
        }
    }

    /// Back to the base delay and a full budget.
    pub const fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubles_until_exhausted() {
        let mut backoff = Backoff::new(Duration::from_secs(1), None, 3);
        assert!(!backoff.exhausted());
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
        assert_eq!(backoff.next_delay(), Duration::from_secs(4));
        assert!(backoff.exhausted());
    }

    #[test]
    fn test_reset_and_cap() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Some(Duration::from_millis(250)), 10);
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.next_delay(), Duration::from_millis(250));

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_zero_attempts_disables() {
        assert!(Backoff::new(Duration::from_secs(1), None, 0).exhausted());
    }
}
