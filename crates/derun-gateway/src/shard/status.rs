//! Connection status of a shard

use serde::Serialize;
use std::fmt;

/// Lifecycle of one gateway connection
///
/// Ordered: a status compares greater the further the handshake has gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum ShardStatus {
    /// No socket
    #[default]
    Unavailable = 0,
    /// Socket opening
    Connecting = 1,
    /// Socket open, identify or resume in flight
    Handshaking = 2,
    /// READY or RESUMED received
    Connected = 3,
}

impl ShardStatus {
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Unavailable),
            1 => Some(Self::Connecting),
            2 => Some(Self::Handshaking),
            3 => Some(Self::Connected),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Whether payloads may be written to the socket
    #[must_use]
    pub fn can_send(self) -> bool {
        self >= Self::Handshaking
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Unavailable => "UNAVAILABLE",
            Self::Connecting => "CONNECTING",
            Self::Handshaking => "HANDSHAKING",
            Self::Connected => "CONNECTED",
        }
    }
}

impl fmt::Display for ShardStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
