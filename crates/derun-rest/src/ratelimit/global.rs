//! Global request windows
//!
//! Two fixed windows apply to every call regardless of route: one second and
//! ten minutes. Callers queue on a fair async mutex so they are served in
//! arrival order; the counters themselves sit behind a synchronous lock that is
//! never held across an await.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::{sleep, Instant};

const ONE_SECOND: Duration = Duration::from_secs(1);
const TEN_MINUTES: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Copy)]
struct Window {
    limit: u32,
    remaining: u32,
    length: Duration,
    reset_at: Instant,
}

impl Window {
    fn new(limit: u32, length: Duration, now: Instant) -> Self {
        Self {
            limit,
            remaining: limit,
            length,
            reset_at: now + length,
        }
    }

    fn refresh(&mut self, now: Instant) {
        if now >= self.reset_at {
            self.remaining = self.limit;
            self.reset_at = now + self.length;
        }
    }

    fn wait_time(&self, now: Instant) -> Option<Duration> {
        (self.remaining == 0).then(|| self.reset_at.saturating_duration_since(now))
    }
}

#[derive(Debug)]
struct Windows {
    per_second: Window,
    per_ten_minutes: Window,
}

/// Global rate limiter
#[derive(Debug)]
pub struct GlobalLimiter {
    windows: Mutex<Windows>,
    queue: tokio::sync::Mutex<()>,
    offset: Duration,
}

impl GlobalLimiter {
    #[must_use]
    pub fn new(per_second: u32, per_ten_minutes: u32, offset: Duration) -> Self {
        let now = Instant::now();
        Self {
            windows: Mutex::new(Windows {
                per_second: Window::new(per_second.max(1), ONE_SECOND, now),
                per_ten_minutes: Window::new(per_ten_minutes.max(1), TEN_MINUTES, now),
            }),
            queue: tokio::sync::Mutex::new(()),
            offset,
        }
    }

    /// Wait for a slot in both windows and consume it
    pub async fn acquire(&self) {
        // tokio's Mutex is fair, so waiters are released in FIFO order
        let _turn = self.queue.lock().await;

        loop {
            let wait = {
                let mut windows = self.windows.lock();
                let now = Instant::now();
                windows.per_second.refresh(now);
                windows.per_ten_minutes.refresh(now);

                let wait = windows
                    .per_second
                    .wait_time(now)
                    .max(windows.per_ten_minutes.wait_time(now));
                if wait.is_none() {
                    windows.per_second.remaining -= 1;
                    windows.per_ten_minutes.remaining -= 1;
                }
                wait
            };

            match wait {
                None => return,
                Some(delay) => {
                    let delay = delay + self.offset;
                    tracing::debug!(delay_ms = delay.as_millis() as u64, "Global rate limit reached, waiting");
                    sleep(delay).await;
                }
            }
        }
    }

    /// Block every caller for `retry_after`
    ///
    /// Used when the server reports a global 429.
    pub fn pause(&self, retry_after: Duration) {
        let mut windows = self.windows.lock();
        let until = Instant::now() + retry_after;
        let window = &mut windows.per_second;
        window.remaining = 0;
        if window.reset_at < until {
            window.reset_at = until;
        }
    }

    /// Remaining requests in the (one second, ten minute) windows
    pub fn remaining(&self) -> (u32, u32) {
        let mut windows = self.windows.lock();
        let now = Instant::now();
        windows.per_second.refresh(now);
        windows.per_ten_minutes.refresh(now);
        (windows.per_second.remaining, windows.per_ten_minutes.remaining)
    }
}
