//! Gateway intents bitflags
//!
//! Intents select which categories of gateway events a shard receives. The
//! bit assignments are part of the wire contract and must not change.

use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

bitflags! {
    /// Gateway intent flags
    ///
    /// Sent as a plain integer in the identify payload.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Intents: u64 {
        const GUILDS                    = 1 << 0;
        /// Privileged
        const GUILD_MEMBERS             = 1 << 1;
        const GUILD_BANS                = 1 << 2;
        const GUILD_EMOJIS_AND_STICKERS = 1 << 3;
        const GUILD_INTEGRATIONS        = 1 << 4;
        const GUILD_WEBHOOKS            = 1 << 5;
        const GUILD_INVITES             = 1 << 6;
        const GUILD_VOICE_STATES        = 1 << 7;
        /// Privileged
        const GUILD_PRESENCES           = 1 << 8;
        const GUILD_MESSAGES            = 1 << 9;
        const GUILD_MESSAGE_REACTIONS   = 1 << 10;
        const GUILD_MESSAGE_TYPING      = 1 << 11;
        const DIRECT_MESSAGES           = 1 << 12;
        const DIRECT_MESSAGE_REACTIONS  = 1 << 13;
        const DIRECT_MESSAGE_TYPING     = 1 << 14;
        /// Privileged
        const MESSAGE_CONTENT           = 1 << 15;
    }
}

impl Intents {
    /// Intents that must be enabled on the application dashboard before use
    pub const PRIVILEGED: Intents = Intents::GUILD_MEMBERS
        .union(Intents::GUILD_PRESENCES)
        .union(Intents::MESSAGE_CONTENT);

    /// Every non-privileged intent
    pub const NON_PRIVILEGED: Intents = Intents::all().difference(Intents::PRIVILEGED);

    /// Check whether every flag in `other` is set
    #[inline]
    pub fn has(&self, other: Intents) -> bool {
        self.contains(other)
    }

    /// Check whether any privileged intent is requested
    #[inline]
    pub fn is_privileged(&self) -> bool {
        self.intersects(Self::PRIVILEGED)
    }

    /// Symbolic names of the flags that are set, lowest bit first
    pub fn names(&self) -> Vec<&'static str> {
        self.iter_names().map(|(name, _)| name).collect()
    }

    /// Build an intent set from symbolic names
    ///
    /// Names are matched case-insensitively; an unknown name is rejected rather
    /// than silently dropped.
    pub fn from_names<I, S>(names: I) -> Result<Self, UnknownIntent>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names.into_iter().try_fold(Intents::empty(), |acc, name| {
            let name = name.as_ref().trim();
            Intents::from_name(&name.to_ascii_uppercase())
                .map(|flag| acc | flag)
                .ok_or_else(|| UnknownIntent(name.to_string()))
        })
    }

    /// Parse either a decimal bitfield or a comma-separated list of names
    pub fn parse(s: &str) -> Result<Self, UnknownIntent> {
        let s = s.trim();
        if let Ok(bits) = s.parse::<u64>() {
            return Ok(Intents::from_bits_truncate(bits));
        }
        Self::from_names(s.split(',').filter(|part| !part.trim().is_empty()))
    }
}

impl Default for Intents {
    fn default() -> Self {
        Intents::GUILDS
    }
}

impl fmt::Display for Intents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bits())
    }
}

/// Returned when an intent name does not match any known flag
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown intent: {0}")]
pub struct UnknownIntent(pub String);

impl Serialize for Intents {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(self.bits())
    }
}

// Deserialize from an integer, a decimal string, or a list of names
impl<'de> Deserialize<'de> for Intents {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::{self, SeqAccess, Visitor};

        struct IntentsVisitor;

        impl<'de> Visitor<'de> for IntentsVisitor {
            type Value = Intents;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("an integer bitfield, a string, or a list of intent names")
            }

            fn visit_u64<E>(self, value: u64) -> Result<Intents, E>
            where
                E: de::Error,
            {
                Ok(Intents::from_bits_truncate(value))
            }

            fn visit_i64<E>(self, value: i64) -> Result<Intents, E>
            where
                E: de::Error,
            {
                u64::try_from(value)
                    .map(Intents::from_bits_truncate)
                    .map_err(|_| E::custom("intents cannot be negative"))
            }

            fn visit_str<E>(self, value: &str) -> Result<Intents, E>
            where
                E: de::Error,
            {
                Intents::parse(value).map_err(E::custom)
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Intents, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let mut names = Vec::new();
                while let Some(name) = seq.next_element::<String>()? {
                    names.push(name);
                }
                Intents::from_names(names).map_err(de::Error::custom)
            }
        }

        deserializer.deserialize_any(IntentsVisitor)
    }
}
