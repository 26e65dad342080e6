//! Shard coordination
//!
//! `ShardManager` resolves the shard count, starts shards in order and is
//! the single place callers subscribe to events.

mod error;
mod manager;

pub use error::StartupError;
pub use manager::ShardManager;
