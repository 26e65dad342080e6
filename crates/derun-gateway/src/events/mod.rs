//! Gateway events
//!
//! Dispatch names, the READY payload and the events the manager publishes.

mod client_event;
mod event_types;
mod payloads;

pub use client_event::{ClientEvent, EventKind};
pub use event_types::GatewayEventType;
pub use payloads::{ReadyEvent, ReadyUser, UnavailableGuild};
