//! Shard manager
//!
//! Owns every shard of the bot, starts them one at a time and fans their
//! events out to subscribers.

use super::error::StartupError;
use crate::error::{GatewayError, GatewayResult};
use crate::events::{ClientEvent, EventKind, ReadyEvent};
use crate::protocol::{OpCode, OutboundMessage, PresenceUpdatePayload};
use crate::shard::{Shard, ShardInfo};
use dashmap::DashMap;
use derun_common::ClientConfig;
use derun_core::{EmitterError, Event, EventEmitter, ListenerId};
use derun_rest::RestDispatcher;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

/// Capacity of the broadcast channel handed out by `subscribe`
const BROADCAST_CAPACITY: usize = 1024;

type StartupSender = Arc<Mutex<Option<mpsc::UnboundedSender<ClientEvent>>>>;

/// Coordinates the shards of one bot
pub struct ShardManager {
    config: ClientConfig,
    rest: Arc<RestDispatcher>,
    shards: DashMap<u32, Shard>,
    /// Fixed for the life of the manager once resolved
    shard_count: OnceLock<u32>,
    max_concurrency: AtomicU32,
    launched: AtomicBool,
    emitter: Arc<EventEmitter<ClientEvent>>,
    broadcaster: broadcast::Sender<ClientEvent>,
    events: mpsc::UnboundedSender<ClientEvent>,
    pending_events: Mutex<Option<mpsc::UnboundedReceiver<ClientEvent>>>,
    /// Forwards readiness and failures to an in-progress `launch`
    startup: StartupSender,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl ShardManager {
    /// Create a manager with its own REST dispatcher
    pub fn new(config: ClientConfig) -> Result<Self, StartupError> {
        let config = config.normalized();
        let rest = RestDispatcher::new(config.token.clone(), config.rest.clone())?;
        Ok(Self::with_rest(config, Arc::new(rest)))
    }

    /// Create a manager sharing an existing dispatcher
    pub fn with_rest(config: ClientConfig, rest: Arc<RestDispatcher>) -> Self {
        let config = config.normalized();
        let (events, receiver) = mpsc::unbounded_channel();
        let (broadcaster, _) = broadcast::channel(BROADCAST_CAPACITY);

        Self {
            emitter: EventEmitter::new_shared(config.max_listeners),
            config,
            rest,
            shards: DashMap::new(),
            shard_count: OnceLock::new(),
            max_concurrency: AtomicU32::new(1),
            launched: AtomicBool::new(false),
            broadcaster,
            events,
            pending_events: Mutex::new(Some(receiver)),
            startup: Arc::new(Mutex::new(None)),
            pump: Mutex::new(None),
        }
    }

    /// Create a manager wrapped in Arc
    pub fn new_shared(config: ClientConfig) -> Result<Arc<Self>, StartupError> {
        Ok(Arc::new(Self::new(config)?))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn rest(&self) -> &Arc<RestDispatcher> {
        &self.rest
    }

    /// Resolved shard count, once `launch` has fetched it
    pub fn shard_count(&self) -> Option<u32> {
        self.shard_count.get().copied()
    }

    /// Identifies the gateway accepts per 5 seconds, as last reported
    pub fn max_concurrency(&self) -> u32 {
        self.max_concurrency.load(Ordering::Relaxed)
    }

    /// Fetch gateway metadata and start every shard in order
    ///
    /// Each shard must report ready before the next is created, with the
    /// configured cooldown in between. A second call is a no-op while a
    /// launch is running or after one succeeded; a failed launch stops the
    /// shards it created and may be retried.
    pub async fn launch(&self) -> Result<(), StartupError> {
        if self.launched.swap(true, Ordering::AcqRel) {
            tracing::debug!("Launch already performed, ignoring");
            return Ok(());
        }

        match self.start_shards().await {
            Ok(()) => Ok(()),
            Err(err) => {
                tracing::error!(error = %err, code = err.code(), "Launch failed");
                *self.startup.lock() = None;
                self.stop_all().await;
                self.launched.store(false, Ordering::Release);
                Err(err)
            }
        }
    }

    async fn start_shards(&self) -> Result<(), StartupError> {
        self.ensure_pump();
        self.rest.start_sweeper();

        let info = self.rest.gateway_bot().await?;
        let limit = &info.session_start_limit;
        let count = *self
            .shard_count
            .get_or_init(|| self.config.gateway.shard_count.resolve(info.shards));
        self.max_concurrency
            .store(limit.max_concurrency.max(1), Ordering::Relaxed);

        if !limit.allows(count) {
            return Err(StartupError::SessionStartLimit {
                remaining: limit.remaining,
                required: count,
                reset_after: limit.reset_duration(),
            });
        }

        tracing::info!(
            shards = count,
            recommended = info.shards,
            remaining_sessions = limit.remaining,
            max_concurrency = limit.max_concurrency,
            "Launching shards"
        );

        let (ready_tx, mut ready_rx) = mpsc::unbounded_channel();
        *self.startup.lock() = Some(ready_tx);

        let cooldown = self.config.gateway.spawn_cooldown();
        for shard_id in 0..count {
            self.spawn_shard(shard_id, count);
            Self::await_ready(shard_id, &mut ready_rx).await?;

            if shard_id + 1 < count {
                tracing::debug!(
                    shard_id,
                    cooldown_ms = cooldown.as_millis() as u64,
                    "Waiting before next shard"
                );
                tokio::time::sleep(cooldown).await;
            }
        }

        *self.startup.lock() = None;
        tracing::info!(shards = count, "All shards ready");
        self.publish(ClientEvent::Ready);
        Ok(())
    }

    async fn await_ready(
        expected: u32,
        ready_rx: &mut mpsc::UnboundedReceiver<ClientEvent>,
    ) -> Result<(), StartupError> {
        loop {
            match ready_rx.recv().await {
                Some(ClientEvent::ShardReady { shard_id, .. }) if shard_id == expected => return Ok(()),
                Some(ClientEvent::ShardReady { shard_id, .. }) => {
                    return Err(StartupError::OutOfOrder {
                        expected,
                        actual: shard_id,
                    });
                }
                Some(ClientEvent::ShardError { shard_id, error }) if shard_id == expected => {
                    return Err(StartupError::ShardFailed { shard_id, error });
                }
                // Failures of earlier shards are left to their own listeners
                Some(_) => {}
                None => return Err(StartupError::Interrupted),
            }
        }
    }

    fn spawn_shard(&self, shard_id: u32, shard_count: u32) -> Shard {
        let shard = Shard::spawn(
            shard_id,
            shard_count,
            self.config.token.clone(),
            self.config.gateway.clone(),
            self.events.clone(),
        );
        self.shards.insert(shard_id, shard.clone());
        shard
    }

    /// Start the task that fans shard events out to subscribers
    fn ensure_pump(&self) {
        let Some(mut receiver) = self.pending_events.lock().take() else {
            return;
        };
        let emitter = Arc::clone(&self.emitter);
        let broadcaster = self.broadcaster.clone();
        let startup = Arc::clone(&self.startup);

        let handle = tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                if matches!(event.kind(), EventKind::ShardReady | EventKind::ShardError) {
                    if let Some(tx) = startup.lock().as_ref() {
                        let _ = tx.send(event.clone());
                    }
                }
                emitter.emit(&event);
                // No subscribers is fine
                let _ = broadcaster.send(event);
            }
            tracing::trace!("Event pump stopped");
        });
        *self.pump.lock() = Some(handle);
    }

    /// Queue a manager-level event behind everything the shards already sent
    fn publish(&self, event: ClientEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("Event pump gone, dropping event");
        }
    }

    /// Get a shard handle
    pub fn shard(&self, shard_id: u32) -> Option<Shard> {
        self.shards.get(&shard_id).map(|s| s.clone())
    }

    /// Every shard handle, ordered by id
    pub fn shards(&self) -> Vec<Shard> {
        let mut shards: Vec<Shard> = self.shards.iter().map(|s| s.clone()).collect();
        shards.sort_by_key(Shard::id);
        shards
    }

    /// Send a payload to one shard
    pub fn send_to<T: Serialize>(&self, shard_id: u32, payload: &T) -> GatewayResult<()> {
        self.shard(shard_id)
            .ok_or(GatewayError::UnknownShard { shard_id })?
            .send(payload)
    }

    /// Send a payload to every shard
    ///
    /// Delivery to one shard does not depend on another; the failures are
    /// returned, empty when every shard accepted the payload.
    pub fn broadcast<T: Serialize>(&self, payload: &T) -> Vec<GatewayError> {
        self.shards()
            .iter()
            .filter_map(|shard| shard.send(payload).err())
            .collect()
    }

    /// Update the bot's presence on one shard, or on all of them
    pub fn edit_status(
        &self,
        presence: &PresenceUpdatePayload,
        shard_id: Option<u32>,
    ) -> Vec<GatewayError> {
        let message = OutboundMessage::new(OpCode::PresenceUpdate, presence);
        match shard_id {
            Some(shard_id) => self.send_to(shard_id, &message).err().into_iter().collect(),
            None => self.broadcast(&message),
        }
    }

    /// Status snapshot of every shard, ordered by id
    pub fn statuses(&self) -> Vec<ShardInfo> {
        self.shards().iter().map(Shard::info).collect()
    }

    /// Mean heartbeat latency over shards that have measured one
    pub fn average_latency(&self) -> Option<Duration> {
        let latencies: Vec<Duration> = self.shards().iter().filter_map(Shard::latency).collect();
        if latencies.is_empty() {
            return None;
        }
        Some(latencies.iter().sum::<Duration>() / latencies.len() as u32)
    }

    /// Replace a shard with a fresh one that identifies from scratch
    ///
    /// Used after a shard stopped on a fatal error.
    pub async fn respawn(&self, shard_id: u32) -> GatewayResult<Shard> {
        let count = self
            .shard_count()
            .filter(|count| shard_id < *count)
            .ok_or(GatewayError::UnknownShard { shard_id })?;

        self.ensure_pump();
        if let Some((_, old)) = self.shards.remove(&shard_id) {
            old.shutdown().await;
        }
        tracing::info!(shard_id, "Respawning shard");
        Ok(self.spawn_shard(shard_id, count))
    }

    /// Close every shard and wait for their tasks to exit
    pub async fn shutdown(&self) {
        tracing::info!(shards = self.shards.len(), "Shutting down shards");
        self.stop_all().await;
        self.rest.stop_sweeper();
    }

    async fn stop_all(&self) {
        let shards = self.shards();
        self.shards.clear();
        futures_util::future::join_all(shards.iter().map(|shard| shard.shutdown())).await;
    }

    // === Subscriptions ===

    /// Register a callback for every event of `kind`
    pub fn on<F>(&self, kind: EventKind, callback: F) -> Result<ListenerId, EmitterError>
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.emitter.on(kind, callback)
    }

    /// Register a callback for the next event of `kind`
    pub fn once<F>(&self, kind: EventKind, callback: F) -> Result<ListenerId, EmitterError>
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.emitter.once(kind, callback)
    }

    /// Remove one listener, or all listeners of `kind`
    pub fn off(&self, kind: EventKind, id: Option<ListenerId>) -> usize {
        self.emitter.off(kind, id)
    }

    pub fn on_ready<F>(&self, callback: F) -> Result<ListenerId, EmitterError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on(EventKind::Ready, move |_| callback())
    }

    pub fn on_shard_ready<F>(&self, callback: F) -> Result<ListenerId, EmitterError>
    where
        F: Fn(u32, &ReadyEvent) + Send + Sync + 'static,
    {
        self.on(EventKind::ShardReady, move |event| {
            if let ClientEvent::ShardReady { shard_id, ready } = event {
                callback(*shard_id, ready);
            }
        })
    }

    pub fn on_shard_error<F>(&self, callback: F) -> Result<ListenerId, EmitterError>
    where
        F: Fn(u32, &GatewayError) + Send + Sync + 'static,
    {
        self.on(EventKind::ShardError, move |event| {
            if let ClientEvent::ShardError { shard_id, error } = event {
                callback(*shard_id, error);
            }
        })
    }

    pub fn on_dispatch<F>(&self, callback: F) -> Result<ListenerId, EmitterError>
    where
        F: Fn(u32, &str, &Value) + Send + Sync + 'static,
    {
        self.on(EventKind::Dispatch, move |event| {
            if let ClientEvent::Dispatch {
                shard_id,
                event: name,
                data,
            } = event
            {
                callback(*shard_id, name, data);
            }
        })
    }

    /// Receive every event on a channel instead of through callbacks
    ///
    /// A receiver that falls more than the channel capacity behind loses the
    /// oldest events.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.broadcaster.subscribe()
    }

    pub fn emitter(&self) -> &Arc<EventEmitter<ClientEvent>> {
        &self.emitter
    }
}

impl Drop for ShardManager {
    fn drop(&mut self) {
        if let Some(handle) = self.pump.lock().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for ShardManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardManager")
            .field("shard_count", &self.shard_count())
            .field("shards", &self.shards.len())
            .field("launched", &self.launched.load(Ordering::Relaxed))
            .finish()
    }
}
