//! Heartbeat bookkeeping
//!
//! Tracks whether the last beat was acknowledged and measures round-trip
//! latency. Scheduling lives in the runner; this type never sleeps.

use rand::Rng;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Default)]
pub struct HeartbeatState {
    interval: Option<Duration>,
    acked: bool,
    last_sent: Option<Instant>,
    latency: Option<Duration>,
}

impl HeartbeatState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a new cycle after Hello
    pub fn start(&mut self, interval: Duration) {
        self.interval = Some(interval);
        self.acked = true;
        self.last_sent = None;
    }

    #[must_use]
    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    /// True when a beat went out and no ack has come back since
    #[must_use]
    pub fn is_zombie(&self) -> bool {
        self.last_sent.is_some() && !self.acked
    }

    pub fn record_sent(&mut self, now: Instant) {
        self.acked = false;
        self.last_sent = Some(now);
    }

    /// Mark the beat acknowledged and return the round trip
    pub fn record_ack(&mut self, now: Instant) -> Option<Duration> {
        self.acked = true;
        let latency = self.last_sent.map(|sent| now.saturating_duration_since(sent));
        if latency.is_some() {
            self.latency = latency;
        }
        latency
    }

    /// Last measured round trip
    #[must_use]
    pub fn latency(&self) -> Option<Duration> {
        self.latency
    }

    /// Forget the cycle; latency is kept until the next ack replaces it
    pub fn reset(&mut self) {
        self.interval = None;
        self.acked = true;
        self.last_sent = None;
    }
}

/// Delay before the first beat: `interval * jitter` with jitter in `[0, 1)`
#[must_use]
pub fn first_beat_delay(interval: Duration) -> Duration {
    interval.mul_f64(rand::thread_rng().gen_range(0.0..1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_ack_measures_latency() {
        let mut heartbeat = HeartbeatState::new();
        heartbeat.start(Duration::from_millis(41_250));

        let sent = Instant::now();
        heartbeat.record_sent(sent);
        assert!(heartbeat.is_zombie());

        let latency = heartbeat.record_ack(sent + Duration::from_millis(87));
        assert_eq!(latency, Some(Duration::from_millis(87)));
        assert_eq!(heartbeat.latency(), Some(Duration::from_millis(87)));
        assert!(!heartbeat.is_zombie());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_cycle_is_not_zombie() {
        let mut heartbeat = HeartbeatState::new();
        heartbeat.start(Duration::from_secs(1));
        assert!(!heartbeat.is_zombie());

        heartbeat.record_sent(Instant::now());
        heartbeat.reset();
        assert!(!heartbeat.is_zombie());
        assert_eq!(heartbeat.interval(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_without_beat_keeps_latency() {
        let mut heartbeat = HeartbeatState::new();
        heartbeat.start(Duration::from_secs(1));
        assert_eq!(heartbeat.record_ack(Instant::now()), None);
        assert_eq!(heartbeat.latency(), None);
    }

    #[test]
    fn test_first_beat_is_within_interval() {
        let interval = Duration::from_millis(41_250);
        for _ in 0..50 {
            assert!(first_beat_delay(interval) < interval);
        }
    }
}
