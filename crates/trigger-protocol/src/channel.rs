// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Framed duplex channel over a persistent byte stream.
//!
//! A channel transports opaque text frames in both directions and surfaces
//! every failure as a close event. The default implementation dials a
//! WebSocket endpoint with bearer authentication; tests swap in the
//! in-memory pair from [`crate::testing`] through the [`Dial`] trait.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use http::header::{AUTHORIZATION, HeaderValue};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::protocol::frame::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Close code used for a user-initiated shutdown.
pub const CLOSE_NORMAL: u16 = 1000;

/// Close code reported when the stream drops without a close handshake.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Capacity of the per-channel frame buffers.
const CHANNEL_BUFFER: usize = 64;

/// Header carrying the stable session id across reconnects.
const SESSION_HEADER: &str = "x-session-id";

/// Errors that can occur while establishing a channel
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("connection timed out after {0}ms")]
    Timeout(u64),

    #[error("dial failed: {0}")]
    Dial(String),
}

/// Events surfaced by a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// An inbound text frame.
    Message(String),
    /// The channel closed; all failures end up here.
    Closed { code: u16, reason: String },
}

/// Handle to an open channel.
///
/// Frames written to `outbound` are delivered in order. `events` yields
/// inbound frames and, as its final item, a close event. Cancelling
/// `closer` shuts the channel down with [`CLOSE_NORMAL`].
pub struct ChannelHandle {
    pub outbound: mpsc::Sender<String>,
    pub events: mpsc::Receiver<ChannelEvent>,
    pub closer: CancellationToken,
}

/// Dialer abstraction so the transport stays pluggable.
#[async_trait]
pub trait Dial: Send + Sync {
    /// Establish a channel, presenting the given session id to the server.
    async fn dial(&self, session_id: &str) -> Result<ChannelHandle, ChannelError>;
}

/// WebSocket dialer with bearer authentication.
#[derive(Debug, Clone)]
pub struct WsDialer {
    /// Endpoint URL (`wss://...`).
    pub endpoint: String,
    /// API key placed in the `Authorization: Bearer` upgrade header.
    pub api_key: String,
    /// Connection timeout in milliseconds (default: 10_000).
    pub connect_timeout_ms: u64,
    /// Client ping interval in milliseconds, 0 to disable (default: 30_000).
    pub ping_interval_ms: u64,
}

impl WsDialer {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            connect_timeout_ms: 10_000,
            ping_interval_ms: 30_000,
        }
    }
}

#[async_trait]
impl Dial for WsDialer {
    async fn dial(&self, session_id: &str) -> Result<ChannelHandle, ChannelError> {
        let mut request = self
            .endpoint
            .as_str()
            .into_client_request()
            .map_err(|e| ChannelError::InvalidEndpoint(e.to_string()))?;

        let auth = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|e| ChannelError::Dial(e.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, auth);

        let session = HeaderValue::from_str(session_id)
            .map_err(|e| ChannelError::Dial(e.to_string()))?;
        request.headers_mut().insert(SESSION_HEADER, session);

        let timeout = Duration::from_millis(self.connect_timeout_ms);
        let (socket, _response) = tokio::time::timeout(timeout, connect_async(request))
            .await
            .map_err(|_| ChannelError::Timeout(self.connect_timeout_ms))??;

        debug!(endpoint = %self.endpoint, "websocket open");

        let (outbound_tx, outbound_rx) = mpsc::channel(CHANNEL_BUFFER);
        let (event_tx, event_rx) = mpsc::channel(CHANNEL_BUFFER);
        let closer = CancellationToken::new();

        tokio::spawn(pump(
            socket,
            outbound_rx,
            event_tx,
            closer.clone(),
            self.ping_interval_ms,
        ));

        Ok(ChannelHandle {
            outbound: outbound_tx,
            events: event_rx,
            closer,
        })
    }
}

/// Bridge the socket to the outbound/event queues until either side closes.
async fn pump<S>(
    socket: tokio_tungstenite::WebSocketStream<S>,
    mut outbound: mpsc::Receiver<String>,
    events: mpsc::Sender<ChannelEvent>,
    closer: CancellationToken,
    ping_interval_ms: u64,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut sink, mut stream) = socket.split();
    // 0 disables pings; a day-long interval never fires in practice.
    let ping_interval = Duration::from_millis(if ping_interval_ms == 0 {
        86_400_000
    } else {
        ping_interval_ms
    });
    let mut ping = tokio::time::interval(ping_interval);
    ping.reset();

    let closed = loop {
        tokio::select! {
            biased;

            _ = closer.cancelled() => {
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code: CloseCode::Normal,
                        reason: "client closing".into(),
                    })))
                    .await;
                break ChannelEvent::Closed {
                    code: CLOSE_NORMAL,
                    reason: "client closing".to_string(),
                };
            }

            frame = outbound.recv() => match frame {
                Some(text) => {
                    if let Err(e) = sink.send(Message::text(text)).await {
                        warn!(error = %e, "websocket write failed");
                        break ChannelEvent::Closed {
                            code: CLOSE_ABNORMAL,
                            reason: e.to_string(),
                        };
                    }
                }
                None => {
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code: CloseCode::Normal,
                            reason: "client closing".into(),
                        })))
                        .await;
                    break ChannelEvent::Closed {
                        code: CLOSE_NORMAL,
                        reason: "client closing".to_string(),
                    };
                }
            },

            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    if events
                        .send(ChannelEvent::Message(text.to_string()))
                        .await
                        .is_err()
                    {
                        break ChannelEvent::Closed {
                            code: CLOSE_NORMAL,
                            reason: "receiver dropped".to_string(),
                        };
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    let _ = sink.send(Message::Pong(payload)).await;
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.to_string()))
                        .unwrap_or((CLOSE_ABNORMAL, String::new()));
                    break ChannelEvent::Closed { code, reason };
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "websocket read failed");
                    break ChannelEvent::Closed {
                        code: CLOSE_ABNORMAL,
                        reason: e.to_string(),
                    };
                }
                None => {
                    break ChannelEvent::Closed {
                        code: CLOSE_ABNORMAL,
                        reason: "connection reset".to_string(),
                    };
                }
            },

            _ = ping.tick() => {
                if let Err(e) = sink.send(Message::Ping(Vec::new().into())).await {
                    warn!(error = %e, "websocket ping failed");
                    break ChannelEvent::Closed {
                        code: CLOSE_ABNORMAL,
                        reason: e.to_string(),
                    };
                }
            }
        }
    };

    debug!(?closed, "websocket pump finished");
    let _ = events.send(closed).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialer_defaults() {
        let dialer = WsDialer::new("wss://example.com/ws", "tr_key");
        assert_eq!(dialer.endpoint, "wss://example.com/ws");
        assert_eq!(dialer.connect_timeout_ms, 10_000);
        assert_eq!(dialer.ping_interval_ms, 30_000);
    }

    #[tokio::test]
    async fn test_dial_invalid_endpoint() {
        let dialer = WsDialer::new("not a url", "tr_key");
        let result = dialer.dial("session-1").await;
        assert!(matches!(result, Err(ChannelError::InvalidEndpoint(_))));
    }

    #[tokio::test]
    async fn test_dial_timeout() {
        // Reserved TEST-NET-1 address; nothing listens there.
        let dialer = WsDialer {
            endpoint: "ws://192.0.2.1:9/ws".to_string(),
            api_key: "tr_key".to_string(),
            connect_timeout_ms: 50,
            ping_interval_ms: 0,
        };
        let result = dialer.dial("session-1").await;
        assert!(result.is_err());
    }
}
