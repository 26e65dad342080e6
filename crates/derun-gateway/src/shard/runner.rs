//! Connection task
//!
//! One runner per shard owns the socket and the session. It connects, hands
//! frames to the session, carries out the resulting actions and decides how
//! long to wait before the next attempt.

use super::backoff::Backoff;
use super::heartbeat::first_beat_delay;
use super::session::{ShardAction, ShardSession};
use super::shard::{ShardCommand, ShardState};
use super::socket::{OpenError, ShardSocket, SocketEvent};
use super::status::ShardStatus;
use crate::error::GatewayError;
use crate::events::ClientEvent;
use crate::protocol::CLIENT_RECONNECT_CODE;
use derun_common::GatewayConfig;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep_until, Instant, Interval, MissedTickBehavior};

/// Upper bound of the pause before a requested restart or first reconnect
const RESTART_JITTER_MS: u64 = 1_000;

/// Close code used when the shard is shut down for good
const SHUTDOWN_CLOSE_CODE: u16 = 1000;

/// How a connection ended
#[derive(Debug)]
enum Outcome {
    Reconnect { resume: bool, reason: String },
    /// `reset` with restart
    Restart { resume: bool },
    /// `reset` without restart: wait for further commands
    Idle { resume: bool },
    Fatal(GatewayError),
    Shutdown,
}

enum Control {
    Send(String),
    Stop(Outcome),
}

impl From<Option<ShardCommand>> for Control {
    fn from(command: Option<ShardCommand>) -> Self {
        match command {
            Some(ShardCommand::Send(text)) => Self::Send(text),
            Some(ShardCommand::Reset {
                restart: true,
                resume,
            }) => Self::Stop(Outcome::Restart { resume }),
            Some(ShardCommand::Reset {
                restart: false,
                resume,
            }) => Self::Stop(Outcome::Idle { resume }),
            // Every handle dropped
            Some(ShardCommand::Shutdown) | None => Self::Stop(Outcome::Shutdown),
        }
    }
}

pub(crate) struct ShardRunner {
    session: ShardSession,
    config: GatewayConfig,
    state: Arc<ShardState>,
    commands: mpsc::UnboundedReceiver<ShardCommand>,
    events: mpsc::UnboundedSender<ClientEvent>,
    backoff: Backoff,
    /// Reconnects since the last READY/RESUMED
    failures: u32,
}

impl ShardRunner {
    pub(crate) fn new(
        session: ShardSession,
        config: GatewayConfig,
        state: Arc<ShardState>,
        commands: mpsc::UnboundedReceiver<ShardCommand>,
        events: mpsc::UnboundedSender<ClientEvent>,
    ) -> Self {
        let backoff = Backoff::new(config.reconnect_base_delay(), config.reconnect_max_delay());
        Self {
            session,
            config,
            state,
            commands,
            events,
            backoff,
            failures: 0,
        }
    }

    fn shard_id(&self) -> u32 {
        self.session.shard_id()
    }

    pub(crate) async fn run(mut self) {
        let shard_id = self.shard_id();
        tracing::debug!(shard_id, "Shard task started");

        let mut outcome = self.connect_and_run().await;
        loop {
            outcome = match outcome {
                Outcome::Reconnect { resume, reason } => {
                    let delay = self.prepare_reconnect(resume, &reason);
                    match self.sleep_or_command(delay).await {
                        Some(interrupt) => interrupt,
                        None => self.connect_and_run().await,
                    }
                }
                Outcome::Restart { resume } => {
                    tracing::info!(shard_id, resume, "Restarting shard");
                    self.session.reset(resume);
                    self.publish_state();
                    match self.sleep_or_command(restart_jitter()).await {
                        Some(interrupt) => interrupt,
                        None => self.connect_and_run().await,
                    }
                }
                Outcome::Idle { resume } => {
                    tracing::info!(shard_id, "Shard reset, waiting for restart");
                    self.session.reset(resume);
                    self.publish_state();
                    self.idle().await
                }
                Outcome::Fatal(error) => {
                    tracing::error!(shard_id, error = %error, "Shard stopped");
                    self.session.reset(false);
                    self.publish_state();
                    self.emit(ClientEvent::ShardError {
                        shard_id,
                        error: Arc::new(error),
                    });
                    break;
                }
                Outcome::Shutdown => {
                    tracing::debug!(shard_id, "Shard shut down");
                    self.session.reset(false);
                    self.publish_state();
                    break;
                }
            };
        }

        self.state.set_running(false);
    }

    /// Open the socket, then pump frames until the connection ends
    async fn connect_and_run(&mut self) -> Outcome {
        let shard_id = self.shard_id();
        let url = self.session.connect_url(&self.config);
        let timeout = self.config.connection_timeout();

        self.session.set_status(ShardStatus::Connecting);
        self.publish_state();
        tracing::debug!(shard_id, url = %url, resume = self.session.can_resume(), "Connecting");

        // Socket open and Hello share one deadline
        let state = Arc::clone(&self.state);
        let open = tokio::time::timeout(timeout, async move {
            let mut socket = ShardSocket::connect(shard_id, &url).await?;
            state.set_status(ShardStatus::Handshaking);
            let hello = socket.wait_for_hello().await?;
            Ok::<_, OpenError>((socket, hello))
        });
        tokio::pin!(open);

        // Payloads accepted once the socket is open but before Hello
        let mut deferred = Vec::new();
        let opened = loop {
            tokio::select! {
                result = &mut open => break result,
                command = self.commands.recv() => match Control::from(command) {
                    Control::Send(text) => deferred.push(text),
                    Control::Stop(outcome) => return outcome,
                },
            }
        };

        let (mut socket, hello) = match opened {
            Ok(Ok(opened)) => opened,
            Ok(Err(OpenError::Fatal(reason))) => {
                return Outcome::Fatal(GatewayError::Connect { shard_id, reason });
            }
            Ok(Err(OpenError::Transient(reason))) => {
                return Outcome::Reconnect {
                    resume: true,
                    reason,
                };
            }
            Ok(Err(OpenError::Closed(code))) => return self.close_outcome(code),
            Err(_) => {
                return Outcome::Fatal(GatewayError::ConnectionTimeout { shard_id, timeout });
            }
        };

        self.session.set_status(ShardStatus::Handshaking);
        let mut heartbeat: Option<Interval> = None;

        let outcome = 'connection: {
            let actions = self.session.handle_message(hello, Instant::now());
            if let Some(outcome) = self.process(actions, &mut socket, &mut heartbeat).await {
                break 'connection outcome;
            }
            for text in deferred {
                if let Err(reason) = socket.send_text(text).await {
                    break 'connection Outcome::Reconnect {
                        resume: true,
                        reason,
                    };
                }
            }

            loop {
                tokio::select! {
                    command = self.commands.recv() => match Control::from(command) {
                        Control::Send(text) => {
                            if let Err(reason) = socket.send_text(text).await {
                                break Outcome::Reconnect { resume: true, reason };
                            }
                        }
                        Control::Stop(outcome) => break outcome,
                    },
                    () = next_beat(&mut heartbeat) => {
                        let action = self.session.on_heartbeat_due(Instant::now());
                        if let Some(outcome) = self.process(vec![action], &mut socket, &mut heartbeat).await {
                            break outcome;
                        }
                    },
                    event = socket.recv() => match event {
                        SocketEvent::Message(message) => {
                            let actions = self.session.handle_message(message, Instant::now());
                            if let Some(outcome) = self.process(actions, &mut socket, &mut heartbeat).await {
                                break outcome;
                            }
                        }
                        SocketEvent::Undecodable(reason) => {
                            tracing::warn!(shard_id, reason = %reason, "Dropping undecodable frame");
                        }
                        SocketEvent::Closed(code) => {
                            tracing::debug!(shard_id, code = ?code, "Socket closed by gateway");
                            break self.close_outcome(code);
                        }
                        SocketEvent::Error(reason) => break Outcome::Reconnect { resume: true, reason },
                    },
                }
            }
        };

        let code = match outcome {
            Outcome::Shutdown => SHUTDOWN_CLOSE_CODE,
            _ => CLIENT_RECONNECT_CODE,
        };
        socket.close(code).await;
        outcome
    }

    /// Carry out session actions; stops at the first one that ends the connection
    async fn process(
        &mut self,
        actions: Vec<ShardAction>,
        socket: &mut ShardSocket,
        heartbeat: &mut Option<Interval>,
    ) -> Option<Outcome> {
        let shard_id = self.shard_id();
        self.publish_state();

        for action in actions {
            match action {
                ShardAction::Send(message) => {
                    let text = match message.to_json() {
                        Ok(text) => text,
                        Err(source) => {
                            let error = GatewayError::Serialization { shard_id, source };
                            tracing::warn!(shard_id, error = %error, "Dropping outbound frame");
                            self.emit(ClientEvent::ShardWarn {
                                shard_id,
                                message: error.to_string(),
                            });
                            continue;
                        }
                    };
                    if let Err(reason) = socket.send_text(text).await {
                        return Some(Outcome::Reconnect {
                            resume: true,
                            reason,
                        });
                    }
                }
                ShardAction::StartHeartbeat(period) => {
                    let first = Instant::now() + first_beat_delay(period);
                    let mut interval = interval_at(first, period);
                    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    *heartbeat = Some(interval);
                }
                ShardAction::Established { resumed } => {
                    if self.failures > 0 {
                        tracing::debug!(shard_id, failures = self.failures, resumed, "Reconnect succeeded");
                    }
                    self.failures = 0;
                    self.backoff.reset();
                }
                ShardAction::Reconnect { resume, reason } => {
                    return Some(Outcome::Reconnect { resume, reason });
                }
                ShardAction::Fatal(error) => return Some(Outcome::Fatal(error)),
                ShardAction::Emit(event) => self.emit(event),
            }
        }
        None
    }

    fn close_outcome(&self, code: Option<u16>) -> Outcome {
        match self.session.on_close(code) {
            ShardAction::Fatal(error) => Outcome::Fatal(error),
            ShardAction::Reconnect { resume, reason } => Outcome::Reconnect { resume, reason },
            _ => Outcome::Reconnect {
                resume: true,
                reason: "connection closed".to_string(),
            },
        }
    }

    /// Count the failure, pick resume or identify and return the delay
    fn prepare_reconnect(&mut self, resume: bool, reason: &str) -> Duration {
        let shard_id = self.shard_id();
        self.failures = self.failures.saturating_add(1);

        let mut resume = resume && self.session.can_resume();
        if resume && self.failures >= self.config.max_resume_attempts {
            tracing::warn!(
                shard_id,
                failures = self.failures,
                "Too many failed reconnects, invalidating session"
            );
            resume = false;
        }

        // The first drop after a working session reconnects almost at once
        let delay = if self.failures <= 1 {
            restart_jitter()
        } else {
            self.backoff.next_delay()
        };

        tracing::warn!(
            shard_id,
            reason = %reason,
            resume,
            attempt = self.failures,
            delay_ms = delay.as_millis() as u64,
            "Connection lost, reconnecting"
        );
        self.emit(ClientEvent::ShardWarn {
            shard_id,
            message: format!("reconnecting: {reason}"),
        });

        self.session.reset(resume);
        self.publish_state();
        delay
    }

    /// Sleep unless a command cuts the wait short
    async fn sleep_or_command(&mut self, delay: Duration) -> Option<Outcome> {
        let deadline = Instant::now() + delay;
        loop {
            tokio::select! {
                () = sleep_until(deadline) => return None,
                command = self.commands.recv() => match Control::from(command) {
                    Control::Send(_) => {
                        tracing::debug!(shard_id = self.shard_id(), "Dropping payload while disconnected");
                    }
                    Control::Stop(outcome) => return Some(outcome),
                },
            }
        }
    }

    /// Wait for a restart or shutdown
    async fn idle(&mut self) -> Outcome {
        loop {
            match Control::from(self.commands.recv().await) {
                Control::Send(_) => {
                    tracing::debug!(shard_id = self.shard_id(), "Dropping payload while idle");
                }
                Control::Stop(Outcome::Idle { resume }) => self.session.reset(resume),
                Control::Stop(outcome) => return outcome,
            }
        }
    }

    fn publish_state(&self) {
        self.state.update(&self.session);
    }

    fn emit(&self, event: ClientEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!(shard_id = self.shard_id(), "No event receiver");
        }
    }
}

async fn next_beat(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn restart_jitter() -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(0..RESTART_JITTER_MS))
}
