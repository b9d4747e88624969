// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Reconnecting host connection.
//!
//! Wraps a [`Dial`] implementation with session semantics: a stable session
//! id presented on every dial, and the distinction between a user-initiated
//! close (never retried) and an involuntary close (retried by the owner of
//! the connection). The retry loop itself lives with the caller so it can
//! rebind the RPC layer and re-issue the registration handshake between
//! attempts.

use std::sync::Arc;
use std::sync::Mutex;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::channel::{ChannelError, ChannelHandle, Dial};

/// Persistent connection to the orchestrator.
pub struct HostConnection {
    dialer: Arc<dyn Dial>,
    session_id: String,
    user_close: CancellationToken,
    /// Closer of the currently open channel, if any.
    current: Mutex<Option<CancellationToken>>,
}

impl HostConnection {
    /// Create a connection. The session id is reused on every reconnect so
    /// the server can resume state; a fresh one is generated when not
    /// supplied.
    pub fn new(dialer: Arc<dyn Dial>, session_id: Option<String>) -> Self {
        Self {
            dialer,
            session_id: session_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            user_close: CancellationToken::new(),
            current: Mutex::new(None),
        }
    }

    /// The stable session id presented on every dial.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Dial the endpoint; resolves once the channel is open.
    #[instrument(skip(self), fields(session_id = %self.session_id))]
    pub async fn connect(&self) -> Result<ChannelHandle, ChannelError> {
        if self.user_close.is_cancelled() {
            return Err(ChannelError::Dial("connection closed by user".to_string()));
        }

        let handle = self.dialer.dial(&self.session_id).await?;
        *self.current.lock().expect("connection closer lock poisoned") =
            Some(handle.closer.clone());
        info!("connection established");
        Ok(handle)
    }

    /// Tear down the connection and suppress any further reconnects.
    pub fn close(&self) {
        self.user_close.cancel();
        if let Some(closer) = self
            .current
            .lock()
            .expect("connection closer lock poisoned")
            .take()
        {
            closer.cancel();
        }
        info!(session_id = %self.session_id, "connection closed by user");
    }

    /// True once [`close`](Self::close) has been called.
    pub fn is_user_closed(&self) -> bool {
        self.user_close.is_cancelled()
    }

    /// Resolves when the user closes the connection.
    pub async fn user_closed(&self) {
        self.user_close.cancelled().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StaticDialer;

    #[test]
    fn test_generates_session_id() {
        let connection = HostConnection::new(Arc::new(StaticDialer::empty()), None);
        assert!(!connection.session_id().is_empty());
    }

    #[test]
    fn test_keeps_supplied_session_id() {
        let connection = HostConnection::new(
            Arc::new(StaticDialer::empty()),
            Some("session-7".to_string()),
        );
        assert_eq!(connection.session_id(), "session-7");
    }

    #[tokio::test]
    async fn test_connect_after_close_fails() {
        let connection = HostConnection::new(Arc::new(StaticDialer::empty()), None);
        connection.close();
        assert!(connection.is_user_closed());
        assert!(connection.connect().await.is_err());
    }

    #[tokio::test]
    async fn test_connect_records_session_id_with_dialer() {
        let (dialer, _servers) = StaticDialer::with_channels(1);
        let connection = HostConnection::new(Arc::new(dialer), Some("s1".to_string()));
        let handle = connection.connect().await.unwrap();
        drop(handle);
        // The dialer remembers which session ids it saw.
        let (dialer2, _servers2) = StaticDialer::with_channels(1);
        let dialer2 = Arc::new(dialer2);
        let connection = HostConnection::new(dialer2.clone(), Some("s2".to_string()));
        let _ = connection.connect().await.unwrap();
        assert_eq!(dialer2.sessions(), vec!["s2".to_string()]);
    }
}
