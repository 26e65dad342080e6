//! Gateway message format
//!
//! Every frame on the socket is a JSON envelope `{op, d, s, t}`.

use super::{HelloPayload, IdentifyPayload, OpCode, PresenceUpdatePayload, ResumePayload};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Gateway message envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayMessage {
    pub op: OpCode,

    /// Event name (Dispatch only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,

    /// Sequence number (Dispatch only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,

    /// Event data; Heartbeat sends an explicit `null` before the first dispatch
    #[serde(default)]
    pub d: Option<Value>,
}

impl GatewayMessage {
    /// Envelope with only an op code and body
    #[must_use]
    pub fn new(op: OpCode, d: Option<Value>) -> Self {
        Self { op, t: None, s: None, d }
    }

    // === Client Messages ===

    /// Heartbeat (op=1) carrying the last sequence seen
    #[must_use]
    pub fn heartbeat(last_sequence: Option<u64>) -> Self {
        Self::new(OpCode::Heartbeat, last_sequence.map(Value::from))
    }

    /// Identify (op=2)
    pub fn identify(payload: &IdentifyPayload) -> Result<Self, serde_json::Error> {
        Ok(Self::new(OpCode::Identify, Some(serde_json::to_value(payload)?)))
    }

    /// Resume (op=6)
    pub fn resume(payload: &ResumePayload) -> Result<Self, serde_json::Error> {
        Ok(Self::new(OpCode::Resume, Some(serde_json::to_value(payload)?)))
    }

    /// Presence Update (op=3)
    pub fn presence_update(payload: &PresenceUpdatePayload) -> Result<Self, serde_json::Error> {
        Ok(Self::new(OpCode::PresenceUpdate, Some(serde_json::to_value(payload)?)))
    }

    // === Server Messages ===

    /// Dispatch (op=0)
    #[must_use]
    pub fn dispatch(event_type: impl Into<String>, sequence: u64, data: Value) -> Self {
        Self {
            op: OpCode::Dispatch,
            t: Some(event_type.into()),
            s: Some(sequence),
            d: Some(data),
        }
    }

    /// Hello (op=10)
    #[must_use]
    pub fn hello(heartbeat_interval: u64) -> Self {
        Self::new(
            OpCode::Hello,
            Some(serde_json::json!({ "heartbeat_interval": heartbeat_interval })),
        )
    }

    #[must_use]
    pub fn heartbeat_ack() -> Self {
        Self::new(OpCode::HeartbeatAck, None)
    }

    #[must_use]
    pub fn reconnect() -> Self {
        Self::new(OpCode::Reconnect, None)
    }

    /// Invalid Session (op=9)
    #[must_use]
    pub fn invalid_session(resumable: bool) -> Self {
        Self::new(OpCode::InvalidSession, Some(Value::Bool(resumable)))
    }

    // === Parsing ===

    /// Parse the Hello body
    pub fn as_hello(&self) -> Option<HelloPayload> {
        if self.op != OpCode::Hello {
            return None;
        }
        self.d.as_ref().and_then(|d| HelloPayload::deserialize(d).ok())
    }

    /// Whether an Invalid Session may be resumed; a missing body means no
    pub fn as_invalid_session(&self) -> Option<bool> {
        if self.op != OpCode::InvalidSession {
            return None;
        }
        Some(self.d.as_ref().and_then(Value::as_bool).unwrap_or(false))
    }

    /// Parse the Identify body (used by test servers)
    pub fn as_identify(&self) -> Option<IdentifyPayload> {
        if self.op != OpCode::Identify {
            return None;
        }
        self.d.as_ref().and_then(|d| IdentifyPayload::deserialize(d).ok())
    }

    /// Parse the Resume body (used by test servers)
    pub fn as_resume(&self) -> Option<ResumePayload> {
        if self.op != OpCode::Resume {
            return None;
        }
        self.d.as_ref().and_then(|d| ResumePayload::deserialize(d).ok())
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Borrowed client frame, serialized without building a `Value` first
#[derive(Debug, Serialize)]
pub struct OutboundMessage<'a, T: Serialize> {
    pub op: OpCode,
    pub d: &'a T,
}

impl<'a, T: Serialize> OutboundMessage<'a, T> {
    pub fn new(op: OpCode, d: &'a T) -> Self {
        Self { op, d }
    }
}

impl std::fmt::Display for GatewayMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(t) = &self.t {
            write!(f, "GatewayMessage(op={}, t={}", self.op, t)?;
            if let Some(s) = self.s {
                write!(f, ", s={s}")?;
            }
            write!(f, ")")
        } else {
            write!(f, "GatewayMessage(op={})", self.op)
        }
    }
}
