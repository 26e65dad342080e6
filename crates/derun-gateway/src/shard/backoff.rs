//! Reconnect backoff
//!
//! Exponential with equal jitter: half of the capped delay is fixed, the other
//! half random. The attempt counter only resets once a session is established.

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            attempt: 0,
        }
    }

    /// Consecutive delays handed out since the last reset
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Upper bound of the delay for the current attempt
    #[must_use]
    pub fn ceiling(&self) -> Duration {
        let factor = 2u32.saturating_pow(self.attempt.min(16));
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Delay before the next attempt, then advance
    pub fn next_delay(&mut self) -> Duration {
        let ceiling = self.ceiling();
        let half = ceiling / 2;
        let jitter = rand::thread_rng().gen_range(0.0..=1.0);
        self.attempt = self.attempt.saturating_add(1);
        half + half.mul_f64(jitter)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
