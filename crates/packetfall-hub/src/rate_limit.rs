use std::time::Instant;

use crate::config::LimitsConfig;

/// Message allowance for one game-client connection.
///
/// Holds up to `burst` messages and earns `per_sec` back continuously.
/// Callers pass the clock in, so the bucket is driven by whatever instant
/// the read loop observed.
#[derive(Debug, Clone)]
pub struct MessageBudget {
    burst: f64,
    per_sec: f64,
    available: f64,
    refilled_at: Instant,
}

impl MessageBudget {
    pub fn new(burst: f64, per_sec: f64, now: Instant) -> Self {
        Self {
            burst,
            per_sec,
            available: burst,
            refilled_at: now,
        }
    }

    pub fn from_limits(limits: &LimitsConfig, now: Instant) -> Self {
        Self::new(limits.ws_rate_burst, limits.ws_rate_limit_per_sec, now)
    }

    /// Spend one message. False when the allowance is exhausted.
    pub fn try_spend(&mut self, now: Instant) -> bool {
        let earned = now.saturating_duration_since(self.refilled_at).as_secs_f64() * self.per_sec;
        self.available = (self.available + earned).min(self.burst);
        self.refilled_at = now;

        if self.available < 1.0 {
            return false;
        }
        self.available -= 1.0;
        true
    }
}
