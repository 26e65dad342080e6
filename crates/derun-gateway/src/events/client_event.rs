//! Events surfaced to subscribers of the shard manager

use super::ReadyEvent;
use crate::error::GatewayError;
use crate::protocol::GatewayMessage;
use derun_core::Event;
use serde_json::Value;
use std::sync::Arc;

/// Something that happened on one shard, or on the manager as a whole
///
/// Cheap to clone: payloads are reference counted so one event can be handed
/// to both the callback registry and the broadcast channel.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Every shard has finished its first identify
    Ready,
    ShardReady {
        shard_id: u32,
        ready: Arc<ReadyEvent>,
    },
    ShardResumed {
        shard_id: u32,
    },
    /// Recoverable problem; the shard reconnects on its own
    ShardWarn {
        shard_id: u32,
        message: String,
    },
    /// The shard stopped and must be respawned
    ShardError {
        shard_id: u32,
        error: Arc<GatewayError>,
    },
    /// Every inbound frame, when raw payload emission is enabled
    ShardRawPayload {
        shard_id: u32,
        payload: Arc<GatewayMessage>,
    },
    Dispatch {
        shard_id: u32,
        event: String,
        data: Arc<Value>,
    },
}

/// Subscription key for `ClientEvent`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Ready,
    ShardReady,
    ShardResumed,
    ShardWarn,
    ShardError,
    ShardRawPayload,
    Dispatch,
}

impl EventKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::ShardReady => "shardReady",
            Self::ShardResumed => "shardResumed",
            Self::ShardWarn => "shardWarn",
            Self::ShardError => "shardError",
            Self::ShardRawPayload => "shardRawPayload",
            Self::Dispatch => "dispatch",
        }
    }
}

impl ClientEvent {
    /// Originating shard; `None` for manager-wide events
    #[must_use]
    pub fn shard_id(&self) -> Option<u32> {
        match self {
            Self::Ready => None,
            Self::ShardReady { shard_id, .. }
            | Self::ShardResumed { shard_id }
            | Self::ShardWarn { shard_id, .. }
            | Self::ShardError { shard_id, .. }
            | Self::ShardRawPayload { shard_id, .. }
            | Self::Dispatch { shard_id, .. } => Some(*shard_id),
        }
    }
}

impl Event for ClientEvent {
    type Kind = EventKind;

    fn kind(&self) -> EventKind {
        match self {
            Self::Ready => EventKind::Ready,
            Self::ShardReady { .. } => EventKind::ShardReady,
            Self::ShardResumed { .. } => EventKind::ShardResumed,
            Self::ShardWarn { .. } => EventKind::ShardWarn,
            Self::ShardError { .. } => EventKind::ShardError,
            Self::ShardRawPayload { .. } => EventKind::ShardRawPayload,
            Self::Dispatch { .. } => EventKind::Dispatch,
        }
    }
}
