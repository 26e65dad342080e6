//! # derun-gateway
//!
//! Sharded gateway client. Each shard keeps one WebSocket session alive
//! (heartbeats, resume, reconnect backoff) and the manager starts shards in
//! order and fans their events out to subscribers.

pub mod error;
pub mod events;
pub mod manager;
pub mod protocol;
pub mod shard;

// Re-export commonly used types at crate root
pub use error::{GatewayError, GatewayResult};
pub use events::{ClientEvent, EventKind, GatewayEventType, ReadyEvent};
pub use manager::{ShardManager, StartupError};
pub use protocol::{Activity, GatewayMessage, OpCode, PresenceUpdatePayload, Status};
pub use shard::{Shard, ShardInfo, ShardStatus};
