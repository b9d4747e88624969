// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Schema-validated bidirectional RPC multiplexed over a framed channel.
//!
//! Outbound calls are validated against their method's request type,
//! correlated by a fresh id, and awaited with a timeout. Inbound requests
//! are dispatched in arrival order to registered handlers; handlers run
//! concurrently and may complete out of order. Rebinding to a new channel
//! keeps registered resolvers alive so in-flight calls can time out and be
//! retried by the caller.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::channel::{ChannelEvent, ChannelHandle};
use crate::envelope::{Envelope, FrameError};
use crate::methods::{ClientMethod, ServerMethod};

/// Default timeout for outbound request/response pairs.
pub const DEFAULT_RPC_TIMEOUT_MS: u64 = 15_000;

/// Errors that can occur in the RPC layer
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("rpc layer not bound to a channel")]
    NotBound,

    #[error("channel closed")]
    ChannelClosed,

    #[error("request timed out after {0}ms")]
    Timeout(u64),

    #[error("remote error: {0}")]
    Remote(String),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("invalid {method} request payload: {source}")]
    Encode {
        method: &'static str,
        source: serde_json::Error,
    },

    #[error("invalid {method} response payload: {source}")]
    Decode {
        method: &'static str,
        source: serde_json::Error,
    },
}

impl RpcError {
    /// True for failures that a higher layer may retry against the same or
    /// a reconnected channel.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RpcError::Timeout(_) | RpcError::ChannelClosed | RpcError::NotBound
        )
    }
}

/// Details of the most recent channel close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
}

type HandlerFn = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, String>> + Send + Sync>;
type PendingMap = HashMap<String, oneshot::Sender<Result<Value, RpcError>>>;

/// Bidirectional RPC endpoint.
///
/// Cheap to clone; all clones share the same pending table, handler set and
/// channel binding.
#[derive(Clone)]
pub struct Rpc {
    inner: Arc<RpcInner>,
}

struct RpcInner {
    timeout: Duration,
    pending: Mutex<PendingMap>,
    handlers: Mutex<HashMap<&'static str, HandlerFn>>,
    outbound: Mutex<Option<mpsc::Sender<String>>>,
    closed_tx: watch::Sender<Option<CloseInfo>>,
}

impl Rpc {
    pub fn new(timeout: Duration) -> Self {
        let (closed_tx, _) = watch::channel(None);
        Self {
            inner: Arc::new(RpcInner {
                timeout,
                pending: Mutex::new(HashMap::new()),
                handlers: Mutex::new(HashMap::new()),
                outbound: Mutex::new(None),
                closed_tx,
            }),
        }
    }

    /// Register the handler for an inbound method.
    ///
    /// The handler returns a boolean acknowledgement; an `Err` is reported
    /// to the server as an error response frame.
    pub fn on<M, F, Fut>(&self, handler: F)
    where
        M: ServerMethod,
        F: Fn(M::Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, String>> + Send + 'static,
    {
        let wrapped: HandlerFn = Arc::new(move |payload: Value| {
            match serde_json::from_value::<M::Request>(payload) {
                Ok(request) => {
                    let fut = handler(request);
                    Box::pin(async move { fut.await.map(Value::Bool) })
                }
                Err(e) => {
                    let message = format!("invalid {} payload: {e}", M::NAME);
                    Box::pin(async move { Err(message) })
                }
            }
        });

        self.inner
            .handlers
            .lock()
            .expect("handler table lock poisoned")
            .insert(M::NAME, wrapped);
    }

    /// Bind (or rebind) the RPC layer to a channel.
    ///
    /// Registered resolvers survive a rebind; requests in flight across the
    /// switch will time out and can be retried by the caller.
    pub fn bind(&self, mut channel: ChannelHandle) {
        *self
            .inner
            .outbound
            .lock()
            .expect("outbound lock poisoned") = Some(channel.outbound.clone());

        let inner = self.inner.clone();
        let reply_to = channel.outbound.clone();
        tokio::spawn(async move {
            let close = loop {
                match channel.events.recv().await {
                    Some(ChannelEvent::Message(text)) => inner.dispatch(text, &reply_to),
                    Some(ChannelEvent::Closed { code, reason }) => {
                        break CloseInfo { code, reason };
                    }
                    None => {
                        break CloseInfo {
                            code: crate::channel::CLOSE_ABNORMAL,
                            reason: "channel terminated".to_string(),
                        };
                    }
                }
            };
            debug!(code = close.code, reason = %close.reason, "rpc channel closed");
            let _ = inner.closed_tx.send(Some(close));
        });
    }

    /// Observe channel closes. Each close (voluntary or not) is published
    /// here; the current value is the most recent close.
    pub fn closed(&self) -> watch::Receiver<Option<CloseInfo>> {
        self.inner.closed_tx.subscribe()
    }

    /// Send a request and await its correlated response.
    #[instrument(skip(self, payload), fields(method = M::NAME))]
    pub async fn send<M: ClientMethod>(
        &self,
        payload: &M::Request,
    ) -> Result<M::Response, RpcError> {
        let value = serde_json::to_value(payload).map_err(|source| RpcError::Encode {
            method: M::NAME,
            source,
        })?;

        let id = Uuid::new_v4().to_string();
        let frame = Envelope::Request {
            id: id.clone(),
            method: M::NAME.to_string(),
            payload: value,
        }
        .encode()?;

        let (tx, rx) = oneshot::channel();
        self.inner
            .pending
            .lock()
            .expect("pending table lock poisoned")
            .insert(id.clone(), tx);

        if let Err(e) = self.write(frame).await {
            self.remove_pending(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.inner.timeout, rx).await {
            Err(_) => {
                self.remove_pending(&id);
                Err(RpcError::Timeout(self.inner.timeout.as_millis() as u64))
            }
            Ok(Err(_)) => Err(RpcError::ChannelClosed),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Ok(Ok(value))) => {
                serde_json::from_value(value).map_err(|source| RpcError::Decode {
                    method: M::NAME,
                    source,
                })
            }
        }
    }

    /// Send a request without awaiting a response (fire-and-forget).
    ///
    /// The frame still carries a correlation id; any response the server
    /// sends for it is discarded.
    #[instrument(skip(self, payload), fields(method = M::NAME))]
    pub async fn notify<M: ClientMethod>(&self, payload: &M::Request) -> Result<(), RpcError> {
        let value = serde_json::to_value(payload).map_err(|source| RpcError::Encode {
            method: M::NAME,
            source,
        })?;

        let frame = Envelope::Request {
            id: Uuid::new_v4().to_string(),
            method: M::NAME.to_string(),
            payload: value,
        }
        .encode()?;

        self.write(frame).await
    }

    async fn write(&self, frame: String) -> Result<(), RpcError> {
        let outbound = self
            .inner
            .outbound
            .lock()
            .expect("outbound lock poisoned")
            .clone();
        let Some(outbound) = outbound else {
            return Err(RpcError::NotBound);
        };
        outbound
            .send(frame)
            .await
            .map_err(|_| RpcError::ChannelClosed)
    }

    fn remove_pending(&self, id: &str) {
        self.inner
            .pending
            .lock()
            .expect("pending table lock poisoned")
            .remove(id);
    }
}

impl RpcInner {
    /// Handle one inbound frame. Requests spawn their handler; responses
    /// fulfil the matching resolver.
    fn dispatch(&self, text: String, reply_to: &mpsc::Sender<String>) {
        let envelope = match Envelope::decode(&text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "discarding malformed frame");
                return;
            }
        };

        match envelope {
            Envelope::Request {
                id,
                method,
                payload,
            } => {
                let handler = self
                    .handlers
                    .lock()
                    .expect("handler table lock poisoned")
                    .get(method.as_str())
                    .cloned();
                let reply_to = reply_to.clone();

                match handler {
                    Some(handler) => {
                        tokio::spawn(async move {
                            let response = match handler(payload).await {
                                Ok(value) => Envelope::ok(id, value),
                                Err(error) => Envelope::err(id, error),
                            };
                            if let Ok(frame) = response.encode() {
                                let _ = reply_to.send(frame).await;
                            }
                        });
                    }
                    None => {
                        warn!(%method, "no handler registered for inbound method");
                        let response = Envelope::err(id, format!("unknown method: {method}"));
                        tokio::spawn(async move {
                            if let Ok(frame) = response.encode() {
                                let _ = reply_to.send(frame).await;
                            }
                        });
                    }
                }
            }
            Envelope::Response {
                id,
                ok,
                value,
                error,
            } => {
                let resolver = self
                    .pending
                    .lock()
                    .expect("pending table lock poisoned")
                    .remove(&id);
                match resolver {
                    Some(tx) => {
                        let result = if ok {
                            Ok(value.unwrap_or(Value::Null))
                        } else {
                            Err(RpcError::Remote(
                                error.unwrap_or_else(|| "unknown error".to_string()),
                            ))
                        };
                        let _ = tx.send(result);
                    }
                    None => {
                        debug!(%id, "response for unknown or timed-out request");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(RpcError::Timeout(1000).is_transient());
        assert!(RpcError::ChannelClosed.is_transient());
        assert!(RpcError::NotBound.is_transient());
        assert!(!RpcError::Remote("boom".to_string()).is_transient());
    }

    #[tokio::test]
    async fn test_send_unbound() {
        let rpc = Rpc::new(Duration::from_millis(100));
        let result = rpc
            .send::<crate::methods::StartWorkflowRun>(&crate::methods::StartRunPayload {
                run_id: "r1".to_string(),
            })
            .await;
        assert!(matches!(result, Err(RpcError::NotBound)));
    }
}
