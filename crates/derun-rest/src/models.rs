//! Response models
//!
//! Only the bodies the dispatcher itself needs to understand live here.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Response of `GET /gateway/bot`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayBotInfo {
    /// Gateway URL to connect to
    pub url: String,
    /// Recommended shard count
    #[serde(default = "default_one")]
    pub shards: u32,
    pub session_start_limit: SessionStartLimit,
}

/// Identify budget for the current window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStartLimit {
    pub total: u32,
    pub remaining: u32,
    /// Milliseconds until the budget resets
    pub reset_after: u64,
    /// Identify requests allowed per 5 seconds
    #[serde(default = "default_one")]
    pub max_concurrency: u32,
}

impl SessionStartLimit {
    /// Time until the budget resets
    #[must_use]
    pub fn reset_duration(&self) -> Duration {
        Duration::from_millis(self.reset_after)
    }

    /// Check if the budget covers `sessions` fresh identifies
    #[must_use]
    pub fn allows(&self, sessions: u32) -> bool {
        self.remaining >= sessions
    }
}

/// Error body of a non-2xx response
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub code: u64,
    #[serde(default)]
    pub message: String,
}

/// Body of a 429 response
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitBody {
    /// Seconds, fractional
    pub retry_after: f64,
    #[serde(default)]
    pub global: bool,
}

fn default_one() -> u32 {
    1
}
