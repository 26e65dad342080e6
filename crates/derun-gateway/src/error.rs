//! Gateway error types

use crate::protocol::{describe_close_code, CloseCode};
use std::time::Duration;
use thiserror::Error;

/// Errors raised by a shard
///
/// Every variant names the shard it came from.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The gateway closed with a code that forbids reconnecting
    #[error("[Shard {shard_id}] [{code}] {reason}")]
    FatalClose {
        shard_id: u32,
        code: u16,
        reason: String,
    },

    /// Socket open plus Hello did not finish in time
    #[error("[Shard {shard_id}] connection timed out after {}ms", timeout.as_millis())]
    ConnectionTimeout { shard_id: u32, timeout: Duration },

    /// The socket could not be constructed (bad URL, rejected upgrade)
    #[error("[Shard {shard_id}] could not open connection: {reason}")]
    Connect { shard_id: u32, reason: String },

    #[error("[Shard {shard_id}] failed to serialize payload: {source}")]
    Serialization {
        shard_id: u32,
        #[source]
        source: serde_json::Error,
    },

    /// Payload sent before the socket reached the handshake
    #[error("[Shard {shard_id}] not connected")]
    NotConnected { shard_id: u32 },

    /// The shard's connection task is gone
    #[error("[Shard {shard_id}] shard has stopped")]
    Stopped { shard_id: u32 },

    #[error("[Shard {shard_id}] unknown shard")]
    UnknownShard { shard_id: u32 },
}

impl GatewayError {
    /// Fatal error for a close code
    #[must_use]
    pub fn fatal_close(shard_id: u32, code: u16) -> Self {
        Self::FatalClose {
            shard_id,
            code,
            reason: describe_close_code(code).to_string(),
        }
    }

    #[must_use]
    pub fn shard_id(&self) -> u32 {
        match self {
            Self::FatalClose { shard_id, .. }
            | Self::ConnectionTimeout { shard_id, .. }
            | Self::Connect { shard_id, .. }
            | Self::Serialization { shard_id, .. }
            | Self::NotConnected { shard_id }
            | Self::Stopped { shard_id }
            | Self::UnknownShard { shard_id } => *shard_id,
        }
    }

    /// Whether the shard stopped because of this error
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::FatalClose { .. } | Self::ConnectionTimeout { .. } | Self::Connect { .. }
        )
    }

    /// Gateway close code, if the error came from one
    #[must_use]
    pub fn close_code(&self) -> Option<CloseCode> {
        match self {
            Self::FatalClose { code, .. } => CloseCode::from_u16(*code),
            _ => None,
        }
    }

    /// Get error code string
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::FatalClose { .. } => "FATAL_CLOSE",
            Self::ConnectionTimeout { .. } => "CONNECTION_TIMEOUT",
            Self::Connect { .. } => "CONNECT_FAILED",
            Self::Serialization { .. } => "SERIALIZATION_ERROR",
            Self::NotConnected { .. } => "NOT_CONNECTED",
            Self::Stopped { .. } => "SHARD_STOPPED",
            Self::UnknownShard { .. } => "UNKNOWN_SHARD",
        }
    }
}

/// Gateway result type
pub type GatewayResult<T> = Result<T, GatewayError>;
