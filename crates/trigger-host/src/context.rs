// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-run execution context.
//!
//! Every context operation follows the journaled-intent pattern: allocate a
//! completion pair in the pending-call registry under `(runId, userKey)`,
//! send the intent RPC with a monotonic timestamp, then suspend until the
//! matching `RESOLVE_*`/`REJECT_*` arrives. The user key must be stable
//! across replays; it is how a resumed run reattaches to results the
//! orchestrator already holds.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use trigger_protocol::methods::{
    ClientMethod, CompleteRunOnce, CompleteRunOncePayload, FetchRequest, FetchResponse,
    InitializeDelay, InitializeDelayPayload, InitializeRunOnce, InitializeRunOncePayload,
    RunDescriptor, RunOnceMode, RunOnceResult, SendEvent, SendEventPayload, SendFetch,
    SendFetchPayload, SendRequest, SendRequestPayload, Wait,
};

use crate::clock;
use crate::error::{BoxError, RunError};
use crate::host::HostShared;
use crate::kv::KvStore;
use crate::logger::RunLogger;
use crate::pending::CallKind;

/// Relative delay for [`RunContext::wait_for`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WaitPeriod {
    pub seconds: Option<u64>,
    pub minutes: Option<u64>,
    pub hours: Option<u64>,
    pub days: Option<u64>,
}

impl WaitPeriod {
    pub fn seconds(seconds: u64) -> Self {
        Self {
            seconds: Some(seconds),
            ..Self::default()
        }
    }

    pub fn minutes(minutes: u64) -> Self {
        Self {
            minutes: Some(minutes),
            ..Self::default()
        }
    }

    pub fn hours(hours: u64) -> Self {
        Self {
            hours: Some(hours),
            ..Self::default()
        }
    }

    pub fn days(days: u64) -> Self {
        Self {
            days: Some(days),
            ..Self::default()
        }
    }

    fn into_wait(self) -> Wait {
        Wait::Delay {
            seconds: self.seconds,
            minutes: self.minutes,
            hours: self.hours,
            days: self.days,
        }
    }
}

/// Options for a journaled fetch.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// HTTP method (default: GET).
    pub method: Option<String>,
    pub headers: Option<BTreeMap<String, String>>,
    pub body: Option<Value>,
    /// Opaque retry policy forwarded to the orchestrator.
    pub retry: Option<Value>,
}

/// Shared per-run state behind the context, the ambient bundle and the
/// namespaced kv handles.
pub(crate) struct RunInner {
    pub(crate) host: Arc<HostShared>,
    pub(crate) run_id: String,
    pub(crate) descriptor: RunDescriptor,
}

impl RunInner {
    /// Journal one intent: register the completion pair, send the intent
    /// RPC (retrying on transient failures) and await the resolution.
    pub(crate) async fn journal<M: ClientMethod>(
        &self,
        kind: CallKind,
        user_key: &str,
        payload: &M::Request,
    ) -> Result<Value, RunError> {
        let rx = self.host.pending.register(kind, &self.run_id, user_key);
        if let Err(e) = self.host.send_with_retry::<M>(payload).await {
            self.host.pending.discard(kind, &self.run_id, user_key);
            return Err(e);
        }
        rx.await.map_err(|_| RunError::Closed)?
    }

    pub(crate) async fn fetch_op(
        &self,
        key: &str,
        url: &str,
        options: FetchOptions,
    ) -> Result<FetchResponse, RunError> {
        let payload = SendFetchPayload {
            run_id: self.run_id.clone(),
            key: key.to_string(),
            fetch: FetchRequest {
                url: url.to_string(),
                method: options.method.unwrap_or_else(|| "GET".to_string()),
                headers: options.headers,
                body: options.body,
                retry: options.retry,
            },
            timestamp: clock::nanos_since_start(),
        };
        let value = self
            .journal::<SendFetch>(CallKind::Fetch, key, &payload)
            .await?;
        serde_json::from_value(value).map_err(|e| RunError::Schema(e.to_string()))
    }

    pub(crate) async fn perform_request_op(
        &self,
        key: &str,
        service: &str,
        endpoint: &str,
        params: Value,
        version: Option<&str>,
    ) -> Result<Value, RunError> {
        let payload = SendRequestPayload {
            run_id: self.run_id.clone(),
            key: key.to_string(),
            service: service.to_string(),
            endpoint: endpoint.to_string(),
            params,
            version: version.map(str::to_string),
            timestamp: clock::nanos_since_start(),
        };
        self.journal::<SendRequest>(CallKind::Request, key, &payload)
            .await
    }

    pub(crate) async fn send_event_op<E: Serialize>(&self, event: &E) -> Result<(), RunError> {
        // Round-trip through a JSON value; anything non-serializable fails
        // here instead of on the wire.
        let event = serde_json::to_value(event)?;
        let payload = SendEventPayload {
            run_id: Some(self.run_id.clone()),
            event,
            timestamp: clock::nanos_since_start(),
        };
        self.host.fire_and_forget::<SendEvent>(&payload).await;
        Ok(())
    }
}

/// Context handed to the user's run function.
///
/// Cloneable; all clones observe the same run. Invalid once the run has
/// completed (journaled calls fail with [`RunError::Closed`]).
#[derive(Clone)]
pub struct RunContext {
    pub(crate) inner: Arc<RunInner>,
    /// Key/value store scoped `workflow:<id>`.
    pub kv: KvStore,
    /// Key/value store scoped `org:<id>`.
    pub global_kv: KvStore,
    /// Key/value store scoped `run:<id>`.
    pub run_kv: KvStore,
    /// Run logger; lines are journaled to the orchestrator.
    pub logger: RunLogger,
}

impl RunContext {
    pub(crate) fn new(inner: Arc<RunInner>) -> Self {
        let workflow_scope = format!("workflow:{}", inner.descriptor.workflow_id);
        let org_scope = format!(
            "org:{}",
            inner.descriptor.organization_id.as_deref().unwrap_or("")
        );
        let run_scope = format!("run:{}", inner.run_id);
        Self {
            kv: KvStore::new(inner.clone(), workflow_scope),
            global_kv: KvStore::new(inner.clone(), org_scope),
            run_kv: KvStore::new(inner.clone(), run_scope),
            logger: RunLogger::new(inner.clone()),
            inner,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.inner.run_id
    }

    pub fn workflow_id(&self) -> &str {
        &self.inner.descriptor.workflow_id
    }

    pub fn attempt(&self) -> u32 {
        self.inner.descriptor.attempt
    }

    pub fn is_test(&self) -> bool {
        self.inner.descriptor.is_test
    }

    pub fn environment(&self) -> Option<&str> {
        self.inner.descriptor.environment.as_deref()
    }

    pub fn organization_id(&self) -> Option<&str> {
        self.inner.descriptor.organization_id.as_deref()
    }

    pub fn app_origin(&self) -> Option<&str> {
        self.inner.descriptor.app_origin.as_deref()
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

    /// Journal a fetch and validate the response body against `T`.
    ///
    /// Rejects with [`RunError::Schema`] when the body does not conform.
    pub async fn fetch_json<T: DeserializeOwned>(
        &self,
        key: &str,
        url: &str,
        options: FetchOptions,
    ) -> Result<T, RunError> {
        let response = self.inner.fetch_op(key, url, options).await?;
        let body = response.body.unwrap_or(Value::Null);
        serde_json::from_value(body).map_err(|e| RunError::Schema(e.to_string()))
    }

    /// Suspend the run for a relative period.
    pub async fn wait_for(&self, key: &str, period: WaitPeriod) -> Result<(), RunError> {
        self.wait(key, period.into_wait()).await
    }

    /// Suspend the run until an absolute instant.
    pub async fn wait_until(&self, key: &str, when: DateTime<Utc>) -> Result<(), RunError> {
        self.wait(
            key,
            Wait::ScheduleFor {
                schedule_for: when.to_rfc3339_opts(SecondsFormat::Millis, true),
            },
        )
        .await
    }

    async fn wait(&self, key: &str, wait: Wait) -> Result<(), RunError> {
        let payload = InitializeDelayPayload {
            run_id: self.inner.run_id.clone(),
            key: key.to_string(),
            wait,
            timestamp: clock::nanos_since_start(),
        };
        self.inner
            .journal::<InitializeDelay>(CallKind::Wait, key, &payload)
            .await?;
        Ok(())
    }

    /// Run `callback` at most once across all attempts of this run.
    ///
    /// When the orchestrator already holds an output for `key`, the callback
    /// is skipped and the stored output returned. Otherwise the callback
    /// runs locally, its output is journaled, and the result returned.
    pub async fn run_once<F, Fut>(&self, key: &str, callback: F) -> Result<Value, RunError>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<Value, BoxError>>,
    {
        let outcome = self.initialize_run_once(key, RunOnceMode::Remote).await?;
        if outcome.has_run {
            return Ok(outcome.output.unwrap_or(Value::Null));
        }

        let output = callback(outcome.idempotency_key.clone())
            .await
            .map_err(|e| RunError::Callback(e.to_string()))?;

        let serialized = if output.is_null() {
            None
        } else {
            Some(serde_json::to_string(&output)?)
        };
        self.inner
            .host
            .send_with_retry::<CompleteRunOnce>(&CompleteRunOncePayload {
                run_id: self.inner.run_id.clone(),
                key: key.to_string(),
                idempotency_key: outcome.idempotency_key,
                output: serialized,
                timestamp: clock::nanos_since_start(),
            })
            .await?;
        Ok(output)
    }

    /// Like [`run_once`](Self::run_once), but the orchestrator only issues
    /// the idempotency key; the callback always runs and its output is not
    /// cached remotely.
    pub async fn run_once_local_only<F, Fut>(
        &self,
        key: &str,
        callback: F,
    ) -> Result<Value, RunError>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<Value, BoxError>>,
    {
        let outcome = self
            .initialize_run_once(key, RunOnceMode::LocalOnly)
            .await?;
        callback(outcome.idempotency_key)
            .await
            .map_err(|e| RunError::Callback(e.to_string()))
    }

    async fn initialize_run_once(
        &self,
        key: &str,
        mode: RunOnceMode,
    ) -> Result<RunOnceResult, RunError> {
        let payload = InitializeRunOncePayload {
            run_id: self.inner.run_id.clone(),
            key: key.to_string(),
            mode,
            timestamp: clock::nanos_since_start(),
        };
        let value = self
            .inner
            .journal::<InitializeRunOnce>(CallKind::RunOnce, key, &payload)
            .await?;
        serde_json::from_value(value).map_err(|e| RunError::Schema(e.to_string()))
    }

    /// Emit a custom event (fire-and-forget).
    pub async fn send_event<E: Serialize>(&self, event: &E) -> Result<(), RunError> {
        self.inner.send_event_op(event).await
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

    /// Journal a request and validate the output against `T`.
    pub async fn perform_request_json<T: DeserializeOwned>(
        &self,
        key: &str,
        service: &str,
        endpoint: &str,
        params: Value,
        version: Option<&str>,
    ) -> Result<T, RunError> {
        let output = self
            .inner
            .perform_request_op(key, service, endpoint, params, version)
            .await?;
        serde_json::from_value(output).map_err(|e| RunError::Schema(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wait_period_helpers() {
        assert_eq!(WaitPeriod::seconds(5).seconds, Some(5));
        assert_eq!(WaitPeriod::minutes(2).minutes, Some(2));
        assert_eq!(WaitPeriod::hours(1).hours, Some(1));
        assert_eq!(WaitPeriod::days(7).days, Some(7));
    }

    #[test]
    fn test_wait_period_wire_shape() {
        let wait = WaitPeriod::seconds(5).into_wait();
        assert_eq!(
            serde_json::to_value(&wait).unwrap(),
            json!({"type": "DELAY", "seconds": 5})
        );
    }

    #[test]
    fn test_fetch_options_default_method_is_get() {
        let options = FetchOptions::default();
        assert!(options.method.is_none());
        let request = FetchRequest {
            url: "https://api.example.com".to_string(),
            method: options.method.unwrap_or_else(|| "GET".to_string()),
            headers: None,
            body: None,
            retry: None,
        };
        assert_eq!(request.method, "GET");
    }
}
