//! Session event payloads
//!
//! Only the dispatches a shard needs for its own bookkeeping are typed; all
//! others are handed to listeners as raw JSON.

use serde::{Deserialize, Serialize};

/// READY payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyEvent {
    /// Gateway protocol version
    #[serde(default)]
    pub v: u8,

    pub user: ReadyUser,

    /// Guilds the bot is in; all start out unavailable
    #[serde(default)]
    pub guilds: Vec<UnavailableGuild>,

    pub session_id: String,

    /// Host to use when resuming this session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_gateway_url: Option<String>,

    /// `[shard_id, shard_count]` echoed back for sharded sessions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shard: Option<[u32; 2]>,
}

/// The bot user in READY
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyUser {
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub bot: bool,
}

/// Guild stub in READY
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnavailableGuild {
    pub id: String,
    #[serde(default)]
    pub unavailable: bool,
}
