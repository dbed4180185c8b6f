//! Reconnect delay schedule

use rand::Rng;
use std::time::Duration;

/// Capped exponential backoff with jitter.
///
/// The base delay starts at `initial` and doubles per consecutive fault up to
/// `max`. Each returned delay adds up to a quarter of the base as random
/// jitter, still capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
    attempts: u32,
}

impl Backoff {
    /// Schedule starting at `initial`; `max` below `initial` is raised to it
    pub fn new(initial: Duration, max: Duration) -> Self {
        let max = max.max(initial);
        Self {
            initial,
            max,
            current: initial,
            attempts: 0,
        }
    }

    /// Consecutive faults since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay before the next reconnect attempt
    pub fn next_delay(&mut self) -> Duration {
        self.attempts = self.attempts.saturating_add(1);
        let base = self.current;
        self.current = base.saturating_mul(2).min(self.max);

        let spread = u64::try_from((base / 4).as_millis()).unwrap_or(u64::MAX);
        if spread == 0 {
            return base;
        }
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=spread));
        base.saturating_add(jitter).min(self.max)
    }

    /// Back to the initial delay, after a successful exchange
    pub fn reset(&mut self) {
        self.current = self.initial;
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubles_within_jitter_bounds() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(60));
        for base in [1u64, 2, 4, 8, 16, 32] {
            let d = backoff.next_delay();
            assert!(d >= Duration::from_secs(base), "{:?} < {}s", d, base);
            assert!(d <= Duration::from_millis(base * 1250), "{:?} > {}s", d, base);
        }
        assert_eq!(backoff.attempts(), 6);
    }

    #[test]
    fn test_capped_at_max() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(5));
        for _ in 0..10 {
            assert!(backoff.next_delay() <= Duration::from_secs(5));
        }
        assert_eq!(backoff.next_delay(), Duration::from_secs(5));
    }

    #[test]
    fn test_reset() {
        let mut backoff = Backoff::new(Duration::from_secs(2), Duration::from_secs(60));
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert!(backoff.next_delay() < Duration::from_secs(3));
    }

    #[test]
    fn test_huge_max_saturates() {
        let mut backoff = Backoff::new(Duration::from_secs(u64::MAX / 2), Duration::MAX);
        for _ in 0..4 {
            let d = backoff.next_delay();
            assert!(d >= Duration::from_secs(u64::MAX / 2));
        }
        assert_eq!(backoff.next_delay(), Duration::MAX);
        assert_eq!(backoff.attempts(), 5);
    }

    #[test]
    fn test_zero_delay() {
        let mut backoff = Backoff::new(Duration::ZERO, Duration::ZERO);
        assert_eq!(backoff.next_delay(), Duration::ZERO);
        assert_eq!(backoff.next_delay(), Duration::ZERO);
    }
}
