//! Gateway wire protocol
//!
//! Envelopes, op codes, close codes and payload bodies for gateway v10 with
//! JSON encoding.

mod close_codes;
mod messages;
mod opcodes;
mod payloads;

pub use close_codes::{describe as describe_close_code, CloseCode, CloseDisposition, CLIENT_RECONNECT_CODE};
pub use messages::{GatewayMessage, OutboundMessage};
pub use opcodes::OpCode;
pub use payloads::{
    Activity, ActivityType, HelloPayload, IdentifyPayload, IdentifyProperties, PresenceUpdatePayload,
    ResumePayload, Status,
};
