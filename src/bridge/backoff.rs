//! Reconnect delay schedule for the streaming connection.

use std::time::Duration;

/// Multiplicative backoff with a cap, reset on a successful connect.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    initial: Duration,
    factor: f64,
    max: Duration,
    current: Duration,
    attempt: u32,
}

impl ReconnectBackoff {
    pub fn new(initial: Duration, factor: f64, max: Duration) -> Self {
        Self {
            initial,
            factor: factor.max(1.0),
            max,
            current: initial.min(max),
            attempt: 0,
        }
    }

    /// Delay before the next attempt; advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        let grown = (self.current.as_nanos() as f64 * self.factor) as u64;
        self.current = Duration::from_nanos(grown).min(self.max);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Back to the initial delay.
    pub fn reset(&mut self) {
        self.current = self.initial.min(self.max);
        self.attempt = 0;
    }

    /// Reconnect attempts since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), 1.8, Duration::from_secs(15))
    }
}
