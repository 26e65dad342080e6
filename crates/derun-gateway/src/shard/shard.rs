//! Shard handle
//!
//! A `Shard` is a cheap, cloneable handle to one connection task. Status and
//! latency are mirrored into atomics so they can be read without talking to
//! the task; everything else goes through the command channel.

use super::runner::ShardRunner;
use super::session::ShardSession;
use super::status::ShardStatus;
use crate::error::{GatewayError, GatewayResult};
use crate::events::ClientEvent;
use chrono::{DateTime, Utc};
use derun_common::{GatewayConfig, Token};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Time allowed for a shard to close its socket on shutdown
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

const NONE: u64 = u64::MAX;

/// Requests from a handle to its task
#[derive(Debug)]
pub(crate) enum ShardCommand {
    /// Serialized frame to write
    Send(String),
    Reset { restart: bool, resume: bool },
    Shutdown,
}

/// State published by the task for handles to read
#[derive(Debug)]
pub(crate) struct ShardState {
    status: AtomicU8,
    latency_ms: AtomicU64,
    sequence: AtomicU64,
    session_id: RwLock<Option<String>>,
    running: AtomicBool,
}

impl ShardState {
    fn new() -> Self {
        Self {
            status: AtomicU8::new(ShardStatus::Unavailable.as_u8()),
            latency_ms: AtomicU64::new(NONE),
            sequence: AtomicU64::new(NONE),
            session_id: RwLock::new(None),
            running: AtomicBool::new(true),
        }
    }

    pub(crate) fn set_status(&self, status: ShardStatus) {
        self.status.store(status.as_u8(), Ordering::Release);
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    /// Mirror the session after it changed
    pub(crate) fn update(&self, session: &ShardSession) {
        self.set_status(session.status());
        if let Some(latency) = session.latency() {
            self.latency_ms.store(latency.as_millis() as u64, Ordering::Relaxed);
        }
        self.sequence
            .store(session.sequence().unwrap_or(NONE), Ordering::Relaxed);

        let session_id = session.session_id();
        if self.session_id.read().as_deref() != session_id {
            *self.session_id.write() = session_id.map(str::to_string);
        }
    }

    fn status(&self) -> ShardStatus {
        ShardStatus::from_u8(self.status.load(Ordering::Acquire)).unwrap_or_default()
    }
}

/// Point-in-time view of a shard
#[derive(Debug, Clone, Serialize)]
pub struct ShardInfo {
    pub id: u32,
    pub status: ShardStatus,
    pub latency_ms: Option<u64>,
    pub session_id: Option<String>,
    pub running: bool,
    pub created_at: DateTime<Utc>,
}

struct ShardInner {
    id: u32,
    state: Arc<ShardState>,
    commands: mpsc::UnboundedSender<ShardCommand>,
    task: Mutex<Option<JoinHandle<()>>>,
    created_at: DateTime<Utc>,
}

/// Handle to one gateway connection
#[derive(Clone)]
pub struct Shard {
    inner: Arc<ShardInner>,
}

impl Shard {
    /// Start the connection task
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn spawn(
        id: u32,
        shard_count: u32,
        token: Token,
        config: GatewayConfig,
        events: mpsc::UnboundedSender<ClientEvent>,
    ) -> Self {
        let state = Arc::new(ShardState::new());
        let (commands, receiver) = mpsc::unbounded_channel();
        let session = ShardSession::new(id, shard_count, token, &config);
        let runner = ShardRunner::new(session, config, Arc::clone(&state), receiver, events);
        let task = tokio::spawn(runner.run());

        tracing::info!(shard_id = id, shard_count, "Shard spawned");

        Self {
            inner: Arc::new(ShardInner {
                id,
                state,
                commands,
                task: Mutex::new(Some(task)),
                created_at: Utc::now(),
            }),
        }
    }

    pub fn id(&self) -> u32 {
        self.inner.id
    }

    pub fn status(&self) -> ShardStatus {
        self.inner.state.status()
    }

    /// Round trip of the last acknowledged heartbeat
    pub fn latency(&self) -> Option<Duration> {
        match self.inner.state.latency_ms.load(Ordering::Relaxed) {
            NONE => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn sequence(&self) -> Option<u64> {
        match self.inner.state.sequence.load(Ordering::Relaxed) {
            NONE => None,
            seq => Some(seq),
        }
    }

    pub fn session_id(&self) -> Option<String> {
        self.inner.state.session_id.read().clone()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    /// False once the task has exited after shutdown or a fatal error
    pub fn is_running(&self) -> bool {
        self.inner.state.running.load(Ordering::Acquire)
    }

    pub fn info(&self) -> ShardInfo {
        ShardInfo {
            id: self.id(),
            status: self.status(),
            latency_ms: self.latency().map(|l| l.as_millis() as u64),
            session_id: self.session_id(),
            running: self.is_running(),
            created_at: self.created_at(),
        }
    }

    /// Queue a payload for the socket
    ///
    /// Fails unless the socket is at least handshaking. Serialization happens
    /// here so the error reaches the caller.
    pub fn send<T: Serialize>(&self, payload: &T) -> GatewayResult<()> {
        let shard_id = self.id();
        if !self.is_running() {
            return Err(GatewayError::Stopped { shard_id });
        }
        if !self.status().can_send() {
            return Err(GatewayError::NotConnected { shard_id });
        }

        let text = serde_json::to_string(payload).map_err(|source| {
            tracing::warn!(shard_id, error = %source, "Failed to serialize payload");
            GatewayError::Serialization { shard_id, source }
        })?;
        self.command(ShardCommand::Send(text))
    }

    /// Drop the connection
    ///
    /// With `restart` the shard reconnects after a short jittered delay,
    /// otherwise it stays idle until reset again. `resume` keeps the session
    /// so the next connection resumes instead of identifying.
    pub fn reset(&self, restart: bool, resume: bool) -> GatewayResult<()> {
        self.command(ShardCommand::Reset { restart, resume })
    }

    /// Close the connection and wait for the task to exit
    pub async fn shutdown(&self) {
        // Already gone if the send fails
        let _ = self.inner.commands.send(ShardCommand::Shutdown);

        let task = self.inner.task.lock().take();
        if let Some(mut task) = task {
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut task).await.is_err() {
                tracing::warn!(shard_id = self.id(), "Shard did not stop in time, aborting");
                task.abort();
            }
        }
        self.inner.state.set_running(false);
    }

    fn command(&self, command: ShardCommand) -> GatewayResult<()> {
        self.inner
            .commands
            .send(command)
            .map_err(|_| GatewayError::Stopped { shard_id: self.id() })
    }
}

impl std::fmt::Debug for Shard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shard")
            .field("id", &self.id())
            .field("status", &self.status())
            .field("running", &self.is_running())
            .finish()
    }
}
