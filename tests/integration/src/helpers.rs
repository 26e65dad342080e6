//! Mock API and gateway server
//!
//! Serves `GET /gateway/bot`, a couple of channel routes with rate-limit
//! headers, and a gateway endpoint that speaks just enough of the protocol
//! to bring a session up: HELLO, READY after IDENTIFY, RESUMED after RESUME
//! and an ack for every heartbeat. Connections can be told to drop or to
//! close with a given code.

use std::borrow::Cow;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use derun_gateway::protocol::{GatewayMessage, OpCode, PresenceUpdatePayload};
use derun_gateway::ClientEvent;
use parking_lot::Mutex;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::fixtures::{gateway_bot_body, ready_body, TEST_TOKEN};

/// Heartbeat interval announced in HELLO
pub const MOCK_HEARTBEAT_INTERVAL: u64 = 45_000;

/// "Going away", used for dropped connections
pub const DROP_CLOSE_CODE: u16 = 1001;

/// Behaviour switches for the mock server
#[derive(Debug, Clone)]
pub struct MockOptions {
    /// Recommended shard count reported by `/gateway/bot`
    pub shards: u32,
    /// Remaining session starts reported by `/gateway/bot`
    pub remaining: u32,
    /// Ask the first connection to reconnect right after READY
    pub reconnect_after_ready: bool,
    /// `x-ratelimit-reset-after` on channel message responses, in seconds
    pub reset_after: f64,
    /// Answer every IDENTIFY by closing with this code instead of READY
    pub close_code: Option<u16>,
    /// Connections below this index close with [`DROP_CLOSE_CODE`] once
    /// READY is sent, or in place of RESUMED
    pub drop_connections: usize,
}

impl Default for MockOptions {
    fn default() -> Self {
        Self {
            shards: 1,
            remaining: 1000,
            reconnect_after_ready: false,
            reset_after: 0.25,
            close_code: None,
            drop_connections: 0,
        }
    }
}

/// What the mock server has seen
#[derive(Debug, Default)]
pub struct MockState {
    addr: Mutex<Option<SocketAddr>>,
    options: Mutex<Option<MockOptions>>,
    connections: AtomicUsize,
    gateway_bot_calls: AtomicUsize,
    heartbeats: AtomicUsize,
    identifies: Mutex<Vec<Option<[u32; 2]>>>,
    resumes: Mutex<Vec<(String, u64)>>,
    presences: Mutex<Vec<PresenceUpdatePayload>>,
    message_hits: Mutex<Vec<Instant>>,
}

impl MockState {
    fn options(&self) -> MockOptions {
        self.options.lock().clone().unwrap_or_default()
    }

    fn addr(&self) -> SocketAddr {
        (*self.addr.lock()).unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 0)))
    }
}

/// Running mock server
pub struct MockServer {
    pub addr: SocketAddr,
    state: Arc<MockState>,
    _handle: JoinHandle<()>,
}

impl MockServer {
    /// Start a server with default options
    pub async fn start() -> Result<Self> {
        Self::start_with(MockOptions::default()).await
    }

    /// Start a server on an ephemeral port
    pub async fn start_with(options: MockOptions) -> Result<Self> {
        let state = Arc::new(MockState::default());
        *state.options.lock() = Some(options);

        let app = Router::new()
            .route("/api/v10/gateway/bot", get(gateway_bot))
            .route("/api/v10/channels/:channel_id/messages", get(channel_messages))
            .route("/api/v10/channels/:channel_id/typing", post(typing))
            .route("/gateway", get(gateway))
            .route("/gateway/", get(gateway))
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
        let addr = listener.local_addr()?;
        *state.addr.lock() = Some(addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Ok(Self {
            addr,
            state,
            _handle: handle,
        })
    }

    /// WebSocket connections accepted so far
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub fn gateway_bot_calls(&self) -> usize {
        self.state.gateway_bot_calls.load(Ordering::SeqCst)
    }

    pub fn heartbeats(&self) -> usize {
        self.state.heartbeats.load(Ordering::SeqCst)
    }

    /// `shard` field of every IDENTIFY, in arrival order
    pub fn identifies(&self) -> Vec<Option<[u32; 2]>> {
        self.state.identifies.lock().clone()
    }

    /// `(session_id, seq)` of every RESUME
    pub fn resumes(&self) -> Vec<(String, u64)> {
        self.state.resumes.lock().clone()
    }

    pub fn presences(&self) -> Vec<PresenceUpdatePayload> {
        self.state.presences.lock().clone()
    }

    /// Arrival times of channel message requests
    pub fn message_hits(&self) -> Vec<Instant> {
        self.state.message_hits.lock().clone()
    }
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bot {TEST_TOKEN}"))
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"message": "401: Unauthorized", "code": 0})),
    )
        .into_response()
}

async fn gateway_bot(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    state.gateway_bot_calls.fetch_add(1, Ordering::SeqCst);
    if !authorized(&headers) {
        return unauthorized();
    }
    let options = state.options();
    Json(gateway_bot_body(state.addr(), options.shards, options.remaining)).into_response()
}

async fn channel_messages(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    state.message_hits.lock().push(Instant::now());
    let reset_after = state.options().reset_after;
    (
        [
            ("x-ratelimit-limit", "1".to_string()),
            ("x-ratelimit-remaining", "0".to_string()),
            ("x-ratelimit-reset-after", format!("{reset_after:.3}")),
        ],
        Json(json!([])),
    )
        .into_response()
}

async fn typing(headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    StatusCode::NO_CONTENT.into_response()
}

async fn gateway(State(state): State<Arc<MockState>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_session(socket, state))
}

async fn send(socket: &mut WebSocket, message: &GatewayMessage) -> Result<()> {
    socket.send(Message::Text(message.to_json()?)).await?;
    Ok(())
}

async fn close(socket: &mut WebSocket, code: u16) {
    let frame = CloseFrame {
        code,
        reason: Cow::Borrowed("mock close"),
    };
    socket.send(Message::Close(Some(frame))).await.ok();
}

async fn run_session(mut socket: WebSocket, state: Arc<MockState>) {
    let connection = state.connections.fetch_add(1, Ordering::SeqCst);
    let options = state.options();
    let resume_url = format!("ws://{}/gateway", state.addr());
    let mut seq = 0u64;
    let dropping = connection < options.drop_connections;

    if send(&mut socket, &GatewayMessage::hello(MOCK_HEARTBEAT_INTERVAL))
        .await
        .is_err()
    {
        return;
    }

    while let Some(Ok(message)) = socket.recv().await {
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let Ok(frame) = GatewayMessage::from_json(&text) else {
            continue;
        };

        let reply = match frame.op {
            OpCode::Heartbeat => {
                state.heartbeats.fetch_add(1, Ordering::SeqCst);
                vec![GatewayMessage::heartbeat_ack()]
            }
            OpCode::Identify => {
                let Some(identify) = frame.as_identify() else {
                    continue;
                };
                state.identifies.lock().push(identify.shard);
                if let Some(code) = options.close_code {
                    close(&mut socket, code).await;
                    return;
                }
                seq += 1;
                let session_id = format!("session-{connection}");
                let mut reply = vec![GatewayMessage::dispatch(
                    "READY",
                    seq,
                    ready_body(&session_id, &resume_url, identify.shard),
                )];
                if options.reconnect_after_ready && connection == 0 {
                    reply.push(GatewayMessage::reconnect());
                }
                if dropping {
                    for message in &reply {
                        if send(&mut socket, message).await.is_err() {
                            return;
                        }
                    }
                    close(&mut socket, DROP_CLOSE_CODE).await;
                    return;
                }
                reply
            }
            OpCode::Resume => {
                let Some(resume) = frame.as_resume() else {
                    continue;
                };
                seq = resume.seq + 1;
                state.resumes.lock().push((resume.session_id, resume.seq));
                if dropping {
                    close(&mut socket, DROP_CLOSE_CODE).await;
                    return;
                }
                vec![GatewayMessage::dispatch("RESUMED", seq, json!({}))]
            }
            OpCode::PresenceUpdate => {
                if let Some(presence) = frame
                    .d
                    .and_then(|d| serde_json::from_value::<PresenceUpdatePayload>(d).ok())
                {
                    state.presences.lock().push(presence);
                }
                continue;
            }
            _ => continue,
        };

        for message in &reply {
            if send(&mut socket, message).await.is_err() {
                return;
            }
        }
    }
}

/// Wait for the first event matching `predicate`, skipping the rest
pub async fn wait_for<F>(
    events: &mut broadcast::Receiver<ClientEvent>,
    timeout: Duration,
    mut predicate: F,
) -> Result<ClientEvent>
where
    F: FnMut(&ClientEvent) -> bool,
{
    tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return Ok(event),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => {
                    anyhow::bail!("event channel closed")
                }
            }
        }
    })
    .await?
}

/// Collect events until one matches `last`, returning all of them
pub async fn collect_until<F>(
    events: &mut broadcast::Receiver<ClientEvent>,
    timeout: Duration,
    mut last: F,
) -> Result<Vec<ClientEvent>>
where
    F: FnMut(&ClientEvent) -> bool,
{
    let mut seen = Vec::new();
    tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let done = last(&event);
                    seen.push(event);
                    if done {
                        return Ok(());
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => {
                    anyhow::bail!("event channel closed")
                }
            }
        }
    })
    .await??;
    Ok(seen)
}
