use std::time::Duration;

use crate::config::ReconnectConfig;

/// Exponential reconnect schedule: attempt `n` waits `min(2^n, cap)` seconds,
/// up to a fixed number of attempts. A successful connection resets it.
#[derive(Debug, Clone)]
pub struct Backoff {
    attempt: u32,
    max_attempts: u32,
    unit: Duration,
    cap: Duration,
}

impl Backoff {
    pub fn new(max_attempts: u32, cap: Duration) -> Self {
        Self::scaled(max_attempts, Duration::from_secs(1), cap)
    }

    /// Same schedule with `unit` in place of one second.
    pub fn scaled(max_attempts: u32, unit: Duration, cap: Duration) -> Self {
        Self {
            attempt: 0,
            max_attempts,
            unit,
            cap,
        }
    }

    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self::new(config.max_attempts, Duration::from_secs(config.max_backoff_secs))
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        self.attempt += 1;
        let factor = 1u32.checked_shl(self.attempt).unwrap_or(u32::MAX);
        Some(self.unit.saturating_mul(factor).min(self.cap))
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_then_caps() {
        let mut b = Backoff::new(10, Duration::from_secs(30));
        let delays: Vec<u64> = std::iter::from_fn(|| b.next_delay().map(|d| d.as_secs())).collect();
        assert_eq!(delays, vec![2, 4, 8, 16, 30, 30, 30, 30, 30, 30]);
        assert_eq!(b.attempt(), 10);
        assert!(b.next_delay().is_none());
    }

    #[test]
    fn reset_starts_over() {
        let mut b = Backoff::new(3, Duration::from_secs(30));
        b.next_delay();
        b.next_delay();
        b.reset();
        assert_eq!(b.next_delay(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn scaled_unit() {
        let mut b = Backoff::scaled(2, Duration::from_millis(10), Duration::from_secs(1));
        assert_eq!(b.next_delay(), Some(Duration::from_millis(20)));
        assert_eq!(b.next_delay(), Some(Duration::from_millis(40)));
        assert_eq!(b.next_delay(), None);
    }

    #[test]
    fn large_attempt_counts_do_not_overflow() {
        let mut b = Backoff::new(200, Duration::from_secs(30));
        for _ in 0..200 {
            assert!(b.next_delay().unwrap() <= Duration::from_secs(30));
        }
    }
}
