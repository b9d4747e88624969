// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Host-specific error types.

use thiserror::Error;
use trigger_protocol::methods::WorkflowError;
use trigger_protocol::{ChannelError, RpcError};

/// Boxed error type returned by user workflow code and runOnce callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur in the workflow host.
#[derive(Debug, Error)]
pub enum HostError {
    /// Configuration error (missing or invalid option/environment variable)
    #[error("configuration error: {0}")]
    Config(String),

    /// Dialing or channel establishment failed
    #[error("connection error: {0}")]
    Connection(#[from] ChannelError),

    /// RPC failure on the host-level outbound path
    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError),

    /// The registration handshake was rejected by the server
    #[error("registration failed: {0}")]
    Registration(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The host was closed
    #[error("host closed")]
    Closed,
}

/// Type alias for host results.
pub type Result<T> = std::result::Result<T, HostError>;

/// Errors surfaced at the suspension point of a journaled context call.
#[derive(Debug, Error)]
pub enum RunError {
    /// The server rejected the journaled call
    #[error("operation rejected: {0}")]
    Rejected(String),

    /// A response body did not conform to the supplied schema
    #[error("response schema mismatch: {0}")]
    Schema(String),

    /// A runOnce callback failed
    #[error("callback failed: {0}")]
    Callback(String),

    /// The connection closed while the call was suspended
    #[error("connection closed")]
    Closed,

    /// Non-transient RPC failure while journaling the call
    #[error("rpc failure: {0}")]
    Rpc(String),

    /// The operation requires run-scoped ambient state and none is installed
    #[error("no ambient run state: {0}")]
    NoAmbient(&'static str),

    /// Payload serialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<RpcError> for RunError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::Remote(message) => RunError::Rejected(message),
            RpcError::ChannelClosed | RpcError::NotBound => RunError::Closed,
            other => RunError::Rpc(other.to_string()),
        }
    }
}

/// Normalize an arbitrary error into the wire error shape.
///
/// A [`WorkflowError`] passes through unchanged, so user code can fail a run
/// with an explicit name/message/stack. Any other error is reported under
/// the generic `Error` name with its display text; an error with no display
/// text at all collapses to `UnknownError`.
pub fn normalize_error(err: &(dyn std::error::Error + 'static)) -> WorkflowError {
    if let Some(shaped) = err.downcast_ref::<WorkflowError>() {
        return shaped.clone();
    }

    let message = err.to_string();
    if message.is_empty() {
        WorkflowError {
            name: "UnknownError".to_string(),
            message: "An unknown error occurred".to_string(),
            stack_trace: None,
        }
    } else {
        WorkflowError {
            name: "Error".to_string(),
            message,
            stack_trace: None,
        }
    }
}
