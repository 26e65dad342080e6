//! Session state machine
//!
//! Everything a shard decides lives here, free of I/O: the runner feeds it
//! frames, heartbeat ticks and close codes, then carries out the returned
//! actions. Keeping this synchronous lets the protocol rules be tested
//! without a socket.

use super::heartbeat::HeartbeatState;
use super::status::ShardStatus;
use crate::error::GatewayError;
use crate::events::{ClientEvent, GatewayEventType, ReadyEvent};
use crate::protocol::{
    describe_close_code, CloseDisposition, GatewayMessage, IdentifyPayload, IdentifyProperties,
    OpCode, ResumePayload,
};
use derun_common::{GatewayConfig, Token};
use derun_core::Intents;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// What the runner must do next
#[derive(Debug)]
pub enum ShardAction {
    /// Write a frame to the socket
    Send(GatewayMessage),
    /// Schedule heartbeats at this interval, first one jittered
    StartHeartbeat(Duration),
    /// READY or RESUMED arrived
    Established { resumed: bool },
    /// Tear the socket down and connect again
    Reconnect { resume: bool, reason: String },
    /// Stop the shard
    Fatal(GatewayError),
    /// Publish to subscribers
    Emit(ClientEvent),
}

/// Per-shard protocol state
#[derive(Debug)]
pub struct ShardSession {
    shard_id: u32,
    shard_count: u32,
    token: Token,
    intents: Intents,
    large_threshold: u32,
    properties: IdentifyProperties,
    emit_raw: bool,
    status: ShardStatus,
    session_id: Option<String>,
    sequence: Option<u64>,
    resume_url: Option<String>,
    heartbeat: HeartbeatState,
}

impl ShardSession {
    #[must_use]
    pub fn new(shard_id: u32, shard_count: u32, token: Token, config: &GatewayConfig) -> Self {
        Self {
            shard_id,
            shard_count: shard_count.max(1),
            token,
            intents: config.intents,
            large_threshold: config.large_threshold,
            properties: IdentifyProperties::new(),
            emit_raw: config.emit_raw_payloads,
            status: ShardStatus::Unavailable,
            session_id: None,
            sequence: None,
            resume_url: None,
            heartbeat: HeartbeatState::new(),
        }
    }

    #[must_use]
    pub fn shard_id(&self) -> u32 {
        self.shard_id
    }

    #[must_use]
    pub fn status(&self) -> ShardStatus {
        self.status
    }

    pub fn set_status(&mut self, status: ShardStatus) {
        self.status = status;
    }

    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    #[must_use]
    pub fn sequence(&self) -> Option<u64> {
        self.sequence
    }

    #[must_use]
    pub fn latency(&self) -> Option<Duration> {
        self.heartbeat.latency()
    }

    /// A session exists to resume
    #[must_use]
    pub fn can_resume(&self) -> bool {
        self.session_id.is_some()
    }

    /// URL for the next connection: the session's resume host when resuming
    #[must_use]
    pub fn connect_url(&self, config: &GatewayConfig) -> String {
        match (&self.resume_url, self.can_resume()) {
            (Some(url), true) => GatewayConfig::versioned_url(url),
            _ => config.connect_url(),
        }
    }

    /// Keep the highest sequence seen
    pub fn record_sequence(&mut self, sequence: u64) {
        self.sequence = Some(self.sequence.map_or(sequence, |current| current.max(sequence)));
    }

    /// Identify, or Resume when a session exists
    pub fn handshake(&self) -> Result<GatewayMessage, serde_json::Error> {
        match &self.session_id {
            Some(session_id) => GatewayMessage::resume(&ResumePayload {
                token: self.token.expose().to_string(),
                session_id: session_id.clone(),
                seq: self.sequence.unwrap_or(0),
            }),
            None => GatewayMessage::identify(&IdentifyPayload {
                token: self.token.expose().to_string(),
                properties: self.properties.clone(),
                intents: self.intents,
                large_threshold: self.large_threshold,
                shard: (self.shard_count > 1).then_some([self.shard_id, self.shard_count]),
                presence: None,
            }),
        }
    }

    /// React to one inbound frame
    pub fn handle_message(&mut self, message: GatewayMessage, now: Instant) -> Vec<ShardAction> {
        let mut actions = Vec::new();

        if let Some(sequence) = message.s {
            self.record_sequence(sequence);
        }
        if self.emit_raw {
            actions.push(ShardAction::Emit(ClientEvent::ShardRawPayload {
                shard_id: self.shard_id,
                payload: Arc::new(message.clone()),
            }));
        }

        match message.op {
            OpCode::Hello => self.handle_hello(&message, &mut actions),
            OpCode::Heartbeat => {
                // Server-requested beat; does not start a new ack cycle
                actions.push(ShardAction::Send(GatewayMessage::heartbeat(self.sequence)));
            }
            OpCode::HeartbeatAck => {
                if let Some(latency) = self.heartbeat.record_ack(now) {
                    tracing::trace!(
                        shard_id = self.shard_id,
                        latency_ms = latency.as_millis() as u64,
                        "Heartbeat acknowledged"
                    );
                }
            }
            OpCode::Reconnect => actions.push(ShardAction::Reconnect {
                resume: true,
                reason: "server requested reconnect".to_string(),
            }),
            OpCode::InvalidSession => {
                let resumable = message.as_invalid_session().unwrap_or(false);
                actions.push(ShardAction::Reconnect {
                    resume: resumable,
                    reason: format!("invalid session (resumable: {resumable})"),
                });
            }
            OpCode::Dispatch => self.handle_dispatch(message, &mut actions),
            op => {
                tracing::debug!(shard_id = self.shard_id, op = %op, "Ignoring unexpected op code");
            }
        }

        actions
    }

    fn handle_hello(&mut self, message: &GatewayMessage, actions: &mut Vec<ShardAction>) {
        let Some(hello) = message.as_hello() else {
            actions.push(ShardAction::Reconnect {
                resume: true,
                reason: "malformed hello".to_string(),
            });
            return;
        };

        let interval = Duration::from_millis(hello.heartbeat_interval);
        self.heartbeat.start(interval);
        actions.push(ShardAction::StartHeartbeat(interval));

        match self.handshake() {
            Ok(handshake) => {
                tracing::debug!(
                    shard_id = self.shard_id,
                    resume = self.can_resume(),
                    interval_ms = hello.heartbeat_interval,
                    "Hello received, sending handshake"
                );
                actions.push(ShardAction::Send(handshake));
            }
            Err(err) => actions.push(ShardAction::Reconnect {
                resume: false,
                reason: format!("failed to build handshake: {err}"),
            }),
        }
    }

    fn handle_dispatch(&mut self, message: GatewayMessage, actions: &mut Vec<ShardAction>) {
        let Some(event) = message.t else {
            tracing::debug!(shard_id = self.shard_id, "Dispatch without an event name");
            return;
        };
        let data = message.d.unwrap_or_default();

        match GatewayEventType::from_name(&event) {
            Some(GatewayEventType::Ready) => match ReadyEvent::deserialize(&data) {
                Ok(ready) => {
                    self.session_id = Some(ready.session_id.clone());
                    self.resume_url.clone_from(&ready.resume_gateway_url);
                    self.status = ShardStatus::Connected;
                    tracing::info!(
                        shard_id = self.shard_id,
                        session_id = %ready.session_id,
                        guilds = ready.guilds.len(),
                        "Shard ready"
                    );
                    actions.push(ShardAction::Established { resumed: false });
                    actions.push(ShardAction::Emit(ClientEvent::ShardReady {
                        shard_id: self.shard_id,
                        ready: Arc::new(ready),
                    }));
                }
                Err(err) => {
                    actions.push(ShardAction::Reconnect {
                        resume: false,
                        reason: format!("malformed READY: {err}"),
                    });
                    return;
                }
            },
            Some(GatewayEventType::Resumed) => {
                self.status = ShardStatus::Connected;
                tracing::info!(shard_id = self.shard_id, seq = ?self.sequence, "Shard resumed");
                actions.push(ShardAction::Established { resumed: true });
                actions.push(ShardAction::Emit(ClientEvent::ShardResumed {
                    shard_id: self.shard_id,
                }));
            }
            _ => {}
        }

        actions.push(ShardAction::Emit(ClientEvent::Dispatch {
            shard_id: self.shard_id,
            event,
            data: Arc::new(data),
        }));
    }

    /// Heartbeat timer fired
    pub fn on_heartbeat_due(&mut self, now: Instant) -> ShardAction {
        if self.heartbeat.is_zombie() {
            return ShardAction::Reconnect {
                resume: true,
                reason: "heartbeat not acknowledged".to_string(),
            };
        }
        self.heartbeat.record_sent(now);
        ShardAction::Send(GatewayMessage::heartbeat(self.sequence))
    }

    /// Socket closed by the server, or dropped with no close frame
    pub fn on_close(&self, code: Option<u16>) -> ShardAction {
        let Some(code) = code else {
            return ShardAction::Reconnect {
                resume: true,
                reason: "connection lost".to_string(),
            };
        };

        let reason = format!("[{code}] {}", describe_close_code(code));
        match CloseDisposition::from_code(code) {
            CloseDisposition::Fatal => {
                ShardAction::Fatal(GatewayError::fatal_close(self.shard_id, code))
            }
            CloseDisposition::Reidentify => ShardAction::Reconnect {
                resume: false,
                reason,
            },
            CloseDisposition::Resume => ShardAction::Reconnect {
                resume: true,
                reason,
            },
        }
    }

    /// Drop per-connection state; the session survives only when resuming
    pub fn reset(&mut self, resume: bool) {
        self.heartbeat.reset();
        self.status = ShardStatus::Unavailable;
        if !resume {
            self.session_id = None;
            self.sequence = None;
            self.resume_url = None;
        }
    }
}
