// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Run-scoped ambient state.
//!
//! A task-local bundle of per-run capabilities (performRequest, sendEvent,
//! fetch, ids) installed for the duration of the user's run function. Any
//! future awaited inside the scope observes the same bundle without
//! explicit parameter passing; [`spawn`] extends that to spawned tasks.
//! Concurrent runs hold disjoint bundles.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use trigger_protocol::methods::FetchResponse;

use crate::context::{FetchOptions, RunInner};
use crate::error::RunError;

tokio::task_local! {
    static AMBIENT: RunAmbient;
}

/// Per-run capability bundle retrievable from any asynchronously linked
/// descendant of the run function.
#[derive(Clone)]
pub struct RunAmbient {
    pub(crate) inner: Arc<RunInner>,
}

impl RunAmbient {
    /// The run id.
    pub fn id(&self) -> &str {
        &self.inner.run_id
    }

    pub fn workflow_id(&self) -> &str {
        &self.inner.descriptor.workflow_id
    }

    pub fn app_origin(&self) -> Option<&str> {
        self.inner.descriptor.app_origin.as_deref()
    }

    /// Journal a request against a connected service.
    pub async fn perform_request(
        &self,
        key: &str,
        service: &str,
        endpoint: &str,
        params: Value,
        version: Option<&str>,
    ) -> Result<Value, RunError> {
        self.inner
            .perform_request_op(key, service, endpoint, params, version)
            .await
    }

    /// Emit a custom event (fire-and-forget).
    pub async fn send_event<E: Serialize>(&self, event: &E) -> Result<(), RunError> {
        self.inner.send_event_op(event).await
    }

    /// Journal an HTTP fetch executed by the orchestrator.
    pub async fn fetch(
        &self,
        key: &str,
        url: &str,
        options: FetchOptions,
    ) -> Result<FetchResponse, RunError> {
        self.inner.fetch_op(key, url, options).await
    }
}

/// Enter a frame in which `bundle` is the ambient run state for `fut` and
/// everything it awaits. The binding is discarded when the future settles.
pub async fn scope<F: Future>(bundle: RunAmbient, fut: F) -> F::Output {
    AMBIENT.scope(bundle, fut).await
}

/// The ambient bundle of the current run, if inside one.
pub fn try_current() -> Option<RunAmbient> {
    AMBIENT.try_with(|ambient| ambient.clone()).ok()
}

/// Spawn a task that inherits the current ambient bundle.
///
/// Plain `tokio::spawn` does not carry task-locals across; this re-scopes
/// the bundle into the child so transitively spawned work still observes
/// the run it came from.
pub fn spawn<F>(fut: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    match try_current() {
        Some(bundle) => tokio::spawn(AMBIENT.scope(bundle, fut)),
        None => tokio::spawn(fut),
    }
}

/// Journal a request through the current run's ambient bundle.
pub async fn perform_request(
    key: &str,
    service: &str,
    endpoint: &str,
    params: Value,
    version: Option<&str>,
) -> Result<Value, RunError> {
    let ambient = try_current().ok_or(RunError::NoAmbient("performRequest"))?;
    ambient
        .perform_request(key, service, endpoint, params, version)
        .await
}

/// Emit an event through the current run's ambient bundle.
pub async fn send_event<E: Serialize>(event: &E) -> Result<(), RunError> {
    let ambient = try_current().ok_or(RunError::NoAmbient("sendEvent"))?;
    ambient.send_event(event).await
}

/// Journal a fetch through the current run's ambient bundle.
pub async fn fetch(key: &str, url: &str, options: FetchOptions) -> Result<FetchResponse, RunError> {
    let ambient = try_current().ok_or(RunError::NoAmbient("fetch"))?;
    ambient.fetch(key, url, options).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_ambient_outside_scope() {
        assert!(try_current().is_none());
        assert!(matches!(
            send_event(&serde_json::json!({})).await,
            Err(RunError::NoAmbient("sendEvent"))
        ));
    }
}
