// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory channel scaffolding for tests.
//!
//! [`link`] wires a [`ChannelHandle`] directly to a [`FakeServer`]: frames
//! the client writes appear on the server side, and the server pushes
//! events (messages or closes) straight into the client's event queue. No
//! sockets, no tasks.

use serde_json::Value;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::channel::{ChannelError, ChannelEvent, ChannelHandle, Dial};
use crate::envelope::Envelope;

/// Scripted peer for a linked in-memory channel.
pub struct FakeServer {
    events: mpsc::Sender<ChannelEvent>,
    frames: mpsc::Receiver<String>,
}

/// Create a client channel handle linked to a [`FakeServer`].
pub fn link() -> (ChannelHandle, FakeServer) {
    let (outbound_tx, outbound_rx) = mpsc::channel(64);
    let (event_tx, event_rx) = mpsc::channel(64);

    let handle = ChannelHandle {
        outbound: outbound_tx,
        events: event_rx,
        closer: CancellationToken::new(),
    };
    let server = FakeServer {
        events: event_tx,
        frames: outbound_rx,
    };
    (handle, server)
}

impl FakeServer {
    /// Receive the next frame the client sent, decoded.
    pub async fn recv(&mut self) -> Option<Envelope> {
        let frame = self.frames.recv().await?;
        Some(Envelope::decode(&frame).expect("client sent malformed frame"))
    }

    /// Receive the next frame, asserting it is a request for `method`.
    /// Returns the correlation id and payload.
    pub async fn expect_request(&mut self, method: &str) -> (String, Value) {
        match self.recv().await {
            Some(Envelope::Request {
                id,
                method: got,
                payload,
            }) => {
                assert_eq!(got, method, "expected {method} request, got {got}");
                (id, payload)
            }
            other => panic!("expected {method} request, got {other:?}"),
        }
    }

    /// Receive the next frame, asserting it is a response for `id`.
    pub async fn expect_response(&mut self, id: &str) -> (bool, Option<Value>, Option<String>) {
        match self.recv().await {
            Some(Envelope::Response {
                id: got,
                ok,
                value,
                error,
            }) => {
                assert_eq!(got, id, "response for unexpected request id");
                (ok, value, error)
            }
            other => panic!("expected response for {id}, got {other:?}"),
        }
    }

    /// Send a success response for a request id.
    pub async fn respond_ok(&mut self, id: &str, value: Value) {
        self.push(Envelope::ok(id, value)).await;
    }

    /// Send an error response for a request id.
    pub async fn respond_err(&mut self, id: &str, error: &str) {
        self.push(Envelope::err(id, error)).await;
    }

    /// Send a server-originated request; returns its correlation id.
    pub async fn call(&mut self, method: &str, payload: Value) -> String {
        let id = Uuid::new_v4().to_string();
        self.push(Envelope::Request {
            id: id.clone(),
            method: method.to_string(),
            payload,
        })
        .await;
        id
    }

    /// Close the channel with the given code.
    pub async fn close(&mut self, code: u16, reason: &str) {
        let _ = self
            .events
            .send(ChannelEvent::Closed {
                code,
                reason: reason.to_string(),
            })
            .await;
    }

    async fn push(&mut self, envelope: Envelope) {
        let frame = envelope.encode().expect("test frame encode failed");
        self.events
            .send(ChannelEvent::Message(frame))
            .await
            .expect("client event queue gone");
    }
}

/// Dialer yielding a scripted sequence of pre-linked channels.
///
/// Each successful dial consumes one queued handle; when the queue is empty
/// dialing fails. Session ids presented by the caller are recorded for
/// assertions.
pub struct StaticDialer {
    channels: Mutex<Vec<ChannelHandle>>,
    sessions: std::sync::Mutex<Vec<String>>,
}

impl StaticDialer {
    /// A dialer with no channels; every dial fails.
    pub fn empty() -> Self {
        Self {
            channels: Mutex::new(Vec::new()),
            sessions: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Create a dialer scripted with `n` linked channels, returning the
    /// matching fake servers in dial order.
    pub fn with_channels(n: usize) -> (Self, Vec<FakeServer>) {
        let mut channels = Vec::with_capacity(n);
        let mut servers = Vec::with_capacity(n);
        for _ in 0..n {
            let (handle, server) = link();
            channels.push(handle);
            servers.push(server);
        }
        // Dial pops from the back.
        channels.reverse();
        (
            Self {
                channels: Mutex::new(channels),
                sessions: std::sync::Mutex::new(Vec::new()),
            },
            servers,
        )
    }

    /// Session ids seen so far, in dial order.
    pub fn sessions(&self) -> Vec<String> {
        self.sessions
            .lock()
            .expect("session log lock poisoned")
            .clone()
    }
}

#[async_trait::async_trait]
impl Dial for StaticDialer {
    async fn dial(&self, session_id: &str) -> Result<ChannelHandle, ChannelError> {
        self.sessions
            .lock()
            .expect("session log lock poisoned")
            .push(session_id.to_string());
        self.channels
            .lock()
            .await
            .pop()
            .ok_or_else(|| ChannelError::Dial("no scripted channel left".to_string()))
    }
}
