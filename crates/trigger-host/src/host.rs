// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The workflow host.
//!
//! Owns the connection, the RPC layer, the pending-call registry and the
//! registered workflow. `listen()` connects, registers and returns; runs
//! then execute in background tasks as `TRIGGER_WORKFLOW` messages arrive.
//! An involuntary disconnect triggers an unbounded fixed-backoff reconnect
//! loop that rebinds the RPC layer and re-issues the registration handshake
//! before queued outbound workflow RPCs are allowed through.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};
use trigger_protocol::methods::{ClientMethod, RegistrationRecord};
use trigger_protocol::{Dial, HostConnection, Rpc, WsDialer};

use crate::config::HostConfig;
use crate::error::{HostError, Result, RunError};
use crate::metadata::{MetadataProbe, NoProbe};
use crate::pending::PendingCalls;
use crate::registration;
use crate::workflow::Workflow;
use crate::executor;

/// State shared between the host handle, the executor and live runs.
pub(crate) struct HostShared {
    pub(crate) config: HostConfig,
    pub(crate) workflow: Workflow,
    pub(crate) rpc: Rpc,
    pub(crate) pending: Arc<PendingCalls>,
    pub(crate) connection: HostConnection,
    pub(crate) probe: Arc<dyn MetadataProbe>,
    registration: RwLock<Option<RegistrationRecord>>,
    /// False while disconnected or mid-handshake; host-level outbound RPCs
    /// wait on it.
    ready: watch::Sender<bool>,
}

impl HostShared {
    pub(crate) fn registration(&self) -> Option<RegistrationRecord> {
        self.registration
            .read()
            .expect("registration lock poisoned")
            .clone()
    }

    fn set_registration(&self, record: RegistrationRecord) {
        *self
            .registration
            .write()
            .expect("registration lock poisoned") = Some(record);
    }

    /// Wait until the host is connected and registered, or closed.
    async fn wait_ready(&self) -> std::result::Result<(), RunError> {
        let mut ready = self.ready.subscribe();
        loop {
            if self.connection.is_user_closed() {
                return Err(RunError::Closed);
            }
            if *ready.borrow() {
                return Ok(());
            }
            tokio::select! {
                _ = self.connection.user_closed() => return Err(RunError::Closed),
                changed = ready.changed() => changed.map_err(|_| RunError::Closed)?,
            }
        }
    }

    /// Send a host-level outbound RPC, retrying transient failures
    /// (timeouts, disconnects) indefinitely with fixed backoff.
    pub(crate) async fn send_with_retry<M: ClientMethod>(
        &self,
        payload: &M::Request,
    ) -> std::result::Result<M::Response, RunError> {
        let backoff = Duration::from_millis(self.config.retry_backoff_ms);
        loop {
            self.wait_ready().await?;
            match self.rpc.send::<M>(payload).await {
                Err(e) if e.is_transient() => {
                    warn!(method = M::NAME, error = %e, "outbound rpc failed; retrying");
                    tokio::time::sleep(backoff).await;
                }
                other => return other.map_err(RunError::from),
            }
        }
    }

    /// Send a fire-and-forget RPC; a delivery failure is logged, not
    /// surfaced.
    pub(crate) async fn fire_and_forget<M: ClientMethod>(&self, payload: &M::Request) {
        if let Err(e) = self.rpc.notify::<M>(payload).await {
            warn!(method = M::NAME, error = %e, "fire-and-forget rpc dropped");
        }
    }
}

/// Client-side workflow host.
///
/// # Example
///
/// ```ignore
/// use serde::Deserialize;
/// use serde_json::{Value, json};
/// use trigger_host::{HostConfig, Workflow, WorkflowHost};
///
/// #[derive(Deserialize)]
/// struct OrderPlaced { order_id: String }
///
/// #[tokio::main]
/// async fn main() -> trigger_host::Result<()> {
///     let workflow = Workflow::new("order-pipeline", "Order pipeline")
///         .on_event::<OrderPlaced, _, _>(|event, ctx| async move {
///             ctx.wait_for("cooldown", trigger_host::WaitPeriod::seconds(5)).await?;
///             ctx.logger.info("processed", json!({"order": event.order_id})).await;
///             Ok(json!({"ok": true}))
///         });
///
///     let host = WorkflowHost::new(workflow, HostConfig::from_env()?);
///     let registration = host.listen().await?;
///     println!("runs at {}", registration.url);
///
///     // ... keep the process alive; runs execute in the background
///     Ok(())
/// }
/// ```
pub struct WorkflowHost {
    shared: Arc<HostShared>,
}

impl WorkflowHost {
    /// Create a host that dials the configured WebSocket endpoint.
    pub fn new(workflow: Workflow, config: HostConfig) -> Self {
        let dialer = Arc::new(WsDialer::new(
            config.endpoint.clone(),
            config.api_key.clone(),
        ));
        Self::with_parts(workflow, config, dialer, Arc::new(NoProbe))
    }

    /// Create a host over a custom transport.
    pub fn with_dialer(workflow: Workflow, config: HostConfig, dialer: Arc<dyn Dial>) -> Self {
        Self::with_parts(workflow, config, dialer, Arc::new(NoProbe))
    }

    /// Create a host with a custom transport and metadata probe.
    pub fn with_parts(
        workflow: Workflow,
        config: HostConfig,
        dialer: Arc<dyn Dial>,
        probe: Arc<dyn MetadataProbe>,
    ) -> Self {
        let rpc = Rpc::new(Duration::from_millis(config.rpc_timeout_ms));
        let connection = HostConnection::new(dialer, config.host_id.clone());
        let (ready, _) = watch::channel(false);

        let shared = Arc::new(HostShared {
            config,
            workflow,
            rpc,
            pending: Arc::new(PendingCalls::new()),
            connection,
            probe,
            registration: RwLock::new(None),
            ready,
        });
        executor::install(&shared);

        Self { shared }
    }

    /// The stable session id presented on every dial.
    pub fn session_id(&self) -> &str {
        self.shared.connection.session_id()
    }

    /// The registration record of the current session, once registered.
    pub fn registration(&self) -> Option<RegistrationRecord> {
        self.shared.registration()
    }

    /// Connect, register and start serving runs.
    ///
    /// Returns once the registration completes; runs execute in background
    /// tasks afterwards. An error logs and closes the host.
    #[instrument(skip(self), fields(workflow_id = %self.shared.workflow.id, session_id = %self.shared.connection.session_id()))]
    pub async fn listen(&self) -> Result<RegistrationRecord> {
        match self.listen_inner().await {
            Ok(record) => Ok(record),
            Err(e) => {
                error!(error = %e, "listen failed");
                self.close().await;
                Err(e)
            }
        }
    }

    async fn listen_inner(&self) -> Result<RegistrationRecord> {
        eprintln!("DEBUG listen_inner start");
        let shared = &self.shared;

        let channel = shared.connection.connect().await?;
        eprintln!("DEBUG connected");
        shared.rpc.bind(channel);
        eprintln!("DEBUG bound");
        // Subscribe before the handshake so a close racing it is not missed.
        let closed = shared.rpc.closed();

        let record = registration::register(shared).await?;
        eprintln!("DEBUG registered");
        shared.set_registration(record.clone());
        let _ = shared.ready.send(true);

        tokio::spawn(supervise(shared.clone(), closed));

        info!(url = %record.url, "host listening");
        eprintln!("DEBUG listen_inner done");
        Ok(record)
    }

    /// Tear down the connection and suppress reconnection. Journaled calls
    /// still suspended observe [`RunError::Closed`].
    pub async fn close(&self) {
        let _ = self.shared.ready.send(false);
        self.shared.connection.close();
    }
}

/// Watch for involuntary closes and drive the reconnect loop: fixed
/// backoff, unbounded retries, same session id, handshake before the ready
/// gate reopens. Pending callbacks are left untouched across reconnects.
async fn supervise(
    shared: Arc<HostShared>,
    mut closed: watch::Receiver<Option<trigger_protocol::CloseInfo>>,
) {
    let backoff = Duration::from_millis(shared.config.retry_backoff_ms);

    loop {
        if closed.changed().await.is_err() {
            return;
        }
        let Some(info) = closed.borrow_and_update().clone() else {
            continue;
        };

        if shared.connection.is_user_closed() {
            debug!("connection closed by user; not reconnecting");
            return;
        }

        let _ = shared.ready.send(false);
        warn!(code = info.code, reason = %info.reason, "connection lost; reconnecting");

        loop {
            tokio::select! {
                _ = shared.connection.user_closed() => return,
                _ = tokio::time::sleep(backoff) => {}
            }

            match shared.connection.connect().await {
                Ok(channel) => {
                    shared.rpc.bind(channel);
                    match registration::register(&shared).await {
                        Ok(record) => {
                            shared.set_registration(record);
                            let _ = shared.ready.send(true);
                            info!(
                                session_id = %shared.connection.session_id(),
                                "reconnected and re-registered"
                            );
                            break;
                        }
                        Err(HostError::Registration(message)) => {
                            error!(%message, "re-registration rejected; closing host");
                            shared.connection.close();
                            return;
                        }
                        Err(e) => {
                            warn!(error = %e, "re-registration failed; retrying");
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "reconnect attempt failed");
                }
            }
        }
    }
}
