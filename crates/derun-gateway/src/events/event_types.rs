//! Gateway event names
//!
//! Names a shard reacts to itself, plus the common ones callers match on.
//! Dispatches with names outside this set are still forwarded verbatim.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Event names carried in the `t` field of a dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayEventType {
    // Session
    Ready,
    Resumed,

    // Guilds
    GuildCreate,
    GuildUpdate,
    GuildDelete,
    GuildMemberAdd,
    GuildMemberRemove,
    GuildMembersChunk,

    // Messages
    MessageCreate,
    MessageUpdate,
    MessageDelete,

    InteractionCreate,
    PresenceUpdate,
    TypingStart,
    VoiceStateUpdate,
}

impl GatewayEventType {
    pub const ALL: [Self; 15] = [
        Self::Ready,
        Self::Resumed,
        Self::GuildCreate,
        Self::GuildUpdate,
        Self::GuildDelete,
        Self::GuildMemberAdd,
        Self::GuildMemberRemove,
        Self::GuildMembersChunk,
        Self::MessageCreate,
        Self::MessageUpdate,
        Self::MessageDelete,
        Self::InteractionCreate,
        Self::PresenceUpdate,
        Self::TypingStart,
        Self::VoiceStateUpdate,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "READY",
            Self::Resumed => "RESUMED",
            Self::GuildCreate => "GUILD_CREATE",
            Self::GuildUpdate => "GUILD_UPDATE",
            Self::GuildDelete => "GUILD_DELETE",
            Self::GuildMemberAdd => "GUILD_MEMBER_ADD",
            Self::GuildMemberRemove => "GUILD_MEMBER_REMOVE",
            Self::GuildMembersChunk => "GUILD_MEMBERS_CHUNK",
            Self::MessageCreate => "MESSAGE_CREATE",
            Self::MessageUpdate => "MESSAGE_UPDATE",
            Self::MessageDelete => "MESSAGE_DELETE",
            Self::InteractionCreate => "INTERACTION_CREATE",
            Self::PresenceUpdate => "PRESENCE_UPDATE",
            Self::TypingStart => "TYPING_START",
            Self::VoiceStateUpdate => "VOICE_STATE_UPDATE",
        }
    }

    /// Look up a known event by its wire name
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|event| event.as_str() == name)
    }
}

impl fmt::Display for GatewayEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
