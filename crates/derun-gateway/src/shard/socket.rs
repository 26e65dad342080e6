//! WebSocket transport for one shard

use crate::protocol::{GatewayMessage, OpCode};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Upper bound on flushing a close frame to a peer that stopped reading
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Something read from the socket
#[derive(Debug)]
pub(crate) enum SocketEvent {
    Message(GatewayMessage),
    /// A frame that is not a valid gateway envelope
    Undecodable(String),
    /// Close frame code, or `None` when the stream ended without one
    Closed(Option<u16>),
    Error(String),
}

/// Why a connection could not be opened
#[derive(Debug)]
pub(crate) enum OpenError {
    /// Retrying cannot help (malformed URL, rejected upgrade)
    Fatal(String),
    Transient(String),
    /// Closed before Hello arrived
    Closed(Option<u16>),
}

pub(crate) struct ShardSocket {
    shard_id: u32,
    writer: SplitSink<WsStream, Message>,
    reader: SplitStream<WsStream>,
}

impl ShardSocket {
    pub(crate) async fn connect(shard_id: u32, url: &str) -> Result<Self, OpenError> {
        let (ws, _response) = connect_async(url).await.map_err(classify_connect_error)?;
        let (writer, reader) = ws.split();
        Ok(Self {
            shard_id,
            writer,
            reader,
        })
    }

    /// Read until Hello, skipping anything sent before it
    pub(crate) async fn wait_for_hello(&mut self) -> Result<GatewayMessage, OpenError> {
        loop {
            match self.recv().await {
                SocketEvent::Message(message) if message.op == OpCode::Hello => return Ok(message),
                SocketEvent::Message(message) => {
                    tracing::debug!(op = %message.op, "Skipping frame received before hello");
                }
                SocketEvent::Undecodable(reason) => {
                    tracing::debug!(reason = %reason, "Skipping undecodable frame before hello");
                }
                SocketEvent::Closed(code) => return Err(OpenError::Closed(code)),
                SocketEvent::Error(reason) => return Err(OpenError::Transient(reason)),
            }
        }
    }

    /// Next gateway frame; control frames are handled by tungstenite
    pub(crate) async fn recv(&mut self) -> SocketEvent {
        let event = self.read().await;
        if let SocketEvent::Message(message) = &event {
            tracing::trace!(
                shard_id = self.shard_id,
                op = %message.op,
                t = ?message.t,
                s = ?message.s,
                "Frame in"
            );
        }
        event
    }

    async fn read(&mut self) -> SocketEvent {
        loop {
            match self.reader.next().await {
                Some(Ok(Message::Text(text))) => {
                    return match GatewayMessage::from_json(&text) {
                        Ok(message) => SocketEvent::Message(message),
                        Err(err) => SocketEvent::Undecodable(err.to_string()),
                    };
                }
                Some(Ok(Message::Binary(bytes))) => {
                    return match serde_json::from_slice(&bytes) {
                        Ok(message) => SocketEvent::Message(message),
                        Err(err) => SocketEvent::Undecodable(err.to_string()),
                    };
                }
                Some(Ok(Message::Close(frame))) => {
                    return SocketEvent::Closed(frame.map(|f| u16::from(f.code)));
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => {
                    return SocketEvent::Closed(None);
                }
                Some(Err(err)) => return SocketEvent::Error(err.to_string()),
            }
        }
    }

    pub(crate) async fn send_text(&mut self, text: String) -> Result<(), String> {
        if tracing::enabled!(tracing::Level::TRACE) {
            tracing::trace!(shard_id = self.shard_id, frame = %redact_frame(&text), "Frame out");
        }
        self.writer
            .send(Message::Text(text.into()))
            .await
            .map_err(|err| err.to_string())
    }

    /// Send a close frame; failures are ignored since the socket is discarded
    pub(crate) async fn close(mut self, code: u16) {
        let frame = CloseFrame {
            code: code.into(),
            reason: "".into(),
        };
        let closing = async {
            self.writer.send(Message::Close(Some(frame))).await?;
            self.writer.close().await
        };
        match tokio::time::timeout(CLOSE_TIMEOUT, closing).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::trace!(code, error = %err, "Close frame not delivered"),
            Err(_) => tracing::debug!(code, "Timed out closing socket"),
        }
    }
}

/// Frame text safe to log, with any `d.token` masked
fn redact_frame(text: &str) -> String {
    match serde_json::from_str::<Value>(text) {
        Ok(mut frame) => {
            if let Some(token) = frame.get_mut("d").and_then(|d| d.get_mut("token")) {
                *token = Value::from("[REDACTED]");
            }
            frame.to_string()
        }
        Err(_) => format!("<{} bytes>", text.len()),
    }
}

fn classify_connect_error(err: WsError) -> OpenError {
    match err {
        WsError::Url(err) => OpenError::Fatal(format!("invalid gateway url: {err}")),
        WsError::Http(response) if response.status().is_client_error() => {
            OpenError::Fatal(format!("upgrade rejected with status {}", response.status()))
        }
        WsError::HttpFormat(err) => OpenError::Fatal(format!("invalid upgrade request: {err}")),
        err => OpenError::Transient(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_malformed_url_is_fatal() {
        match ShardSocket::connect(0, "not a url").await {
            Err(OpenError::Fatal(reason)) => assert!(reason.contains("url") || reason.contains("upgrade")),
            Err(other) => panic!("expected fatal error, got {other:?}"),
            Ok(_) => panic!("connected to an invalid url"),
        }
    }

    #[tokio::test]
    async fn test_refused_connection_is_transient() {
        // Bind then drop to get a port with nothing listening
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        match ShardSocket::connect(0, &format!("ws://127.0.0.1:{port}")).await {
            Err(OpenError::Transient(_)) => {}
            Err(other) => panic!("expected transient error, got {other:?}"),
            Ok(_) => panic!("connected to a closed port"),
        }
    }

    #[test]
    fn test_outgoing_frames_are_logged_without_token() {
        let identify = r#"{"op":2,"d":{"token":"secret","intents":513}}"#;
        let logged = redact_frame(identify);
        assert!(!logged.contains("secret"));
        assert!(logged.contains("[REDACTED]"));
        assert!(logged.contains("513"));

        let heartbeat: Value = serde_json::from_str(&redact_frame(r#"{"op":1,"d":42}"#)).unwrap();
        assert_eq!(heartbeat, serde_json::json!({"op": 1, "d": 42}));

        assert_eq!(redact_frame("not json"), "<8 bytes>");
    }
}
