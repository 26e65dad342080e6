//! Two-level rate limiter

use super::bucket::RouteBucket;
use super::global::GlobalLimiter;
use dashmap::DashMap;
use derun_common::RestConfig;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant, MissedTickBehavior};

/// Gates outbound calls on the global windows and per-route buckets
///
/// Buckets are created lazily from the first response carrying rate-limit
/// headers and dropped by `sweep` once they have been stale for a full
/// clean interval.
#[derive(Debug)]
pub struct RateLimiter {
    global: GlobalLimiter,
    buckets: DashMap<String, RouteBucket>,
    offset: Duration,
    clean_interval: Duration,
}

impl RateLimiter {
    #[must_use]
    pub fn new(config: &RestConfig) -> Self {
        Self {
            global: GlobalLimiter::new(
                config.global_per_second,
                config.global_per_ten_minutes,
                config.time_offset(),
            ),
            buckets: DashMap::new(),
            offset: config.time_offset(),
            clean_interval: config.clean_interval(),
        }
    }

    /// Create a limiter wrapped in Arc
    #[must_use]
    pub fn new_shared(config: &RestConfig) -> Arc<Self> {
        Arc::new(Self::new(config))
    }

    pub fn global(&self) -> &GlobalLimiter {
        &self.global
    }

    /// Wait until a request on `route` may be sent, consuming one slot
    pub async fn acquire(&self, route: &str) {
        self.global.acquire().await;

        loop {
            // The shard lock makes check-then-decrement atomic; it is released
            // before sleeping and the bucket is re-checked afterwards.
            let wait = match self.buckets.get_mut(route) {
                Some(mut bucket) => bucket.try_take(Instant::now(), self.offset),
                None => None,
            };

            match wait {
                None => return,
                Some(delay) => {
                    tracing::debug!(
                        route = %route,
                        delay_ms = delay.as_millis() as u64,
                        "Route bucket exhausted, waiting"
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    /// Overwrite the route's bucket with the server's counters
    ///
    /// Returns `true` when the headers carried rate-limit state.
    pub fn update(&self, route: &str, headers: &HashMap<String, String>) -> bool {
        match RouteBucket::from_headers(headers, Instant::now()) {
            Some(bucket) => {
                tracing::trace!(
                    route = %route,
                    limit = bucket.limit,
                    remaining = bucket.remaining,
                    "Route bucket updated"
                );
                self.buckets.insert(route.to_string(), bucket);
                true
            }
            None => false,
        }
    }

    /// Current state of a route's bucket
    pub fn bucket(&self, route: &str) -> Option<RouteBucket> {
        self.buckets.get(route).map(|b| *b)
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Drop buckets whose reset time plus the clean interval has passed
    ///
    /// Returns the number of buckets removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| !bucket.is_stale(now, self.clean_interval));
        let removed = before.saturating_sub(self.buckets.len());
        if removed > 0 {
            tracing::debug!(removed, remaining = self.buckets.len(), "Swept stale route buckets");
        }
        removed
    }

    /// Run `sweep` every clean interval until the limiter is dropped
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let period = self.clean_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                match weak.upgrade() {
                    Some(limiter) => {
                        limiter.sweep();
                    }
                    None => break,
                }
            }
            tracing::trace!("Bucket sweeper stopped");
        })
    }
}
