//! Per-route bucket state

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

pub const HEADER_LIMIT: &str = "x-ratelimit-limit";
pub const HEADER_REMAINING: &str = "x-ratelimit-remaining";
pub const HEADER_RESET_AFTER: &str = "x-ratelimit-reset-after";
pub const HEADER_GLOBAL: &str = "x-ratelimit-global";

/// Quota for one route template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteBucket {
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: Instant,
    /// Length of the window reported by the server
    pub window: Duration,
}

impl RouteBucket {
    /// Build a bucket from response headers
    ///
    /// Returns `None` unless both `remaining` and `reset-after` are present and
    /// well-formed. A missing `limit` falls back to `remaining`.
    pub fn from_headers(headers: &HashMap<String, String>, now: Instant) -> Option<Self> {
        let remaining: u32 = headers.get(HEADER_REMAINING)?.trim().parse().ok()?;
        let reset_after: f64 = headers.get(HEADER_RESET_AFTER)?.trim().parse().ok()?;
        let reset_after = Duration::try_from_secs_f64(reset_after).ok()?;
        let limit = headers
            .get(HEADER_LIMIT)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(remaining);

        Some(Self {
            limit,
            remaining,
            reset_at: now + reset_after,
            window: reset_after,
        })
    }

    /// Take one request from the bucket
    ///
    /// A bucket whose reset time has passed is replenished first. Returns the
    /// time to wait when the bucket is exhausted; the caller must sleep and then
    /// try again rather than assume the slot is theirs.
    pub fn try_take(&mut self, now: Instant, offset: Duration) -> Option<Duration> {
        if now >= self.reset_at {
            self.remaining = self.limit.max(1);
            self.reset_at = now + self.window;
        }

        if self.remaining == 0 {
            return Some((self.reset_at + offset).saturating_duration_since(now));
        }

        self.remaining -= 1;
        None
    }

    /// Check if the bucket can be dropped
    pub fn is_stale(&self, now: Instant, grace: Duration) -> bool {
        self.reset_at + grace < now
    }
}
