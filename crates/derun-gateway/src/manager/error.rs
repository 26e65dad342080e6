//! Startup errors

use crate::error::GatewayError;
use derun_rest::RestError;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Why `launch` gave up
#[derive(Debug, Error)]
pub enum StartupError {
    /// The token was rejected by `/gateway/bot`
    #[error("Invalid token")]
    Unauthorized,

    #[error("Failed to fetch gateway information: {0}")]
    Rest(#[source] RestError),

    /// Not enough identifies left to start every shard
    #[error(
        "Session start limit reached: {remaining} remaining, {required} required, resets in {}s",
        reset_after.as_secs()
    )]
    SessionStartLimit {
        remaining: u32,
        required: u32,
        reset_after: Duration,
    },

    /// A shard other than the one being started reported ready
    #[error("Shard {actual} became ready while waiting for shard {expected}")]
    OutOfOrder { expected: u32, actual: u32 },

    /// The shard being started stopped before it was ready
    #[error("Shard {shard_id} failed during startup: {error}")]
    ShardFailed {
        shard_id: u32,
        error: Arc<GatewayError>,
    },

    /// The manager's event channel closed mid-startup
    #[error("Startup interrupted")]
    Interrupted,
}

impl StartupError {
    /// Get error code string
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Rest(_) => "REST_ERROR",
            Self::SessionStartLimit { .. } => "SESSION_START_LIMIT",
            Self::OutOfOrder { .. } => "SHARD_OUT_OF_ORDER",
            Self::ShardFailed { .. } => "SHARD_FAILED",
            Self::Interrupted => "INTERRUPTED",
        }
    }
}

impl From<RestError> for StartupError {
    fn from(err: RestError) -> Self {
        match err {
            RestError::Unauthorized => Self::Unauthorized,
            other => Self::Rest(other),
        }
    }
}
