//! Gateway shards
//!
//! A shard is one WebSocket connection responsible for a slice of guilds.
//! `session` holds the protocol rules, `runner` drives the socket and
//! `shard` is the handle callers hold.

mod backoff;
mod heartbeat;
mod runner;
mod session;
mod shard;
mod socket;
mod status;

pub use backoff::Backoff;
pub use heartbeat::{first_beat_delay, HeartbeatState};
pub use session::{ShardAction, ShardSession};
pub use shard::{Shard, ShardInfo};
pub use status::ShardStatus;
