// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Client-side workflow host.
//!
//! This crate lets a user-written workflow function execute inside an
//! ordinary application process while behaving as a durable, resumable,
//! server-orchestrated job. The remote orchestrator owns all durable state
//! (run history, delay timers, idempotency records, persisted key/value
//! data, fetch-result caches); this host journals the workflow's context
//! operations to it over a persistent connection and resumes each suspended
//! call when the matching resolution arrives.
//!
//! # Quick Start
//!
//! ```ignore
//! use serde::Deserialize;
//! use serde_json::json;
//! use trigger_host::{HostConfig, WaitPeriod, Workflow, WorkflowHost};
//!
//! #[derive(Deserialize)]
//! struct UserSignedUp { email: String }
//!
//! #[tokio::main]
//! async fn main() -> trigger_host::Result<()> {
//!     let workflow = Workflow::new("welcome-drip", "Welcome drip")
//!         .on_event::<UserSignedUp, _, _>(|event, ctx| async move {
//!             // Journaled fetch: executed by the orchestrator, cached per key.
//!             let profile = ctx
//!                 .fetch("load-profile", &format!("https://api.example.com/users/{}", event.email), Default::default())
//!                 .await?;
//!
//!             // Durable delay: survives restarts of this process.
//!             ctx.wait_for("drip-1", WaitPeriod::days(1)).await?;
//!
//!             // At-most-once side effect across retries.
//!             let receipt = ctx
//!                 .run_once("send-mail", |idempotency_key| async move {
//!                     Ok(json!({"sent": true, "key": idempotency_key}))
//!                 })
//!                 .await?;
//!
//!             ctx.logger.info("drip sent", json!({"status": profile.status})).await;
//!             Ok(receipt)
//!         });
//!
//!     let host = WorkflowHost::new(workflow, HostConfig::from_env()?);
//!     let registration = host.listen().await?;
//!     tracing::info!(url = %registration.url, "workflow registered");
//!
//!     tokio::signal::ctrl_c().await.ok();
//!     host.close().await;
//!     Ok(())
//! }
//! ```
//!
//! # Journaled calls and resumption
//!
//! Every context operation except the fire-and-forget ones (`send_event`,
//! logger lines) emits exactly one intent RPC and suspends until the
//! orchestrator resolves or rejects it. The user-chosen key per call site
//! is the correlation handle: it must be stable across replays, because a
//! restarted host re-journals the same keys and the orchestrator re-delivers
//! the stored results instead of re-executing the effects.
//!
//! # Connection lifecycle
//!
//! The host keeps one WebSocket to the orchestrator, authenticated with the
//! bearer API key. Involuntary disconnects reconnect forever with fixed
//! backoff under the same session id; pending suspended calls survive the
//! reconnect and are fulfilled once the server re-delivers resolutions.
//! [`WorkflowHost::close`] suppresses reconnection.

pub mod ambient;
mod clock;
mod config;
mod context;
mod error;
mod executor;
mod host;
mod kv;
mod logger;
mod metadata;
mod pending;
mod registration;
mod workflow;

pub use config::{API_KEY_ENV, DEFAULT_ENDPOINT, ENDPOINT_ENV, HostConfig};
pub use context::{FetchOptions, RunContext, WaitPeriod};
pub use error::{BoxError, HostError, Result, RunError, normalize_error};
pub use host::WorkflowHost;
pub use kv::KvStore;
pub use logger::RunLogger;
pub use metadata::{MetadataProbe, NoProbe};
pub use workflow::Workflow;

// Wire types user code touches directly.
pub use trigger_protocol::methods::{
    FetchResponse, GitMetadata, RegistrationRecord, WorkflowError,
};
