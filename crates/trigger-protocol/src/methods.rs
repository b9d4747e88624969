// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The two directional RPC method catalogues.
//!
//! Each method is a marker type tying a wire name to its typed request (and,
//! for client-originated calls, response) payload. Validation is the serde
//! round-trip: a payload that does not deserialize into the method's request
//! type is rejected before it reaches a handler.
//!
//! Client→Server methods journal workflow intents and lifecycle events;
//! Server→Client methods trigger runs and resolve or reject suspended
//! journaled calls. Server→Client handlers return a boolean acknowledgement.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A client-originated request/response method.
pub trait ClientMethod {
    const NAME: &'static str;
    type Request: Serialize + Send + Sync;
    type Response: DeserializeOwned + Send;
}

/// A server-originated method handled by the client.
pub trait ServerMethod {
    const NAME: &'static str;
    type Request: DeserializeOwned + Send + 'static;
}

macro_rules! client_method {
    ($(#[$doc:meta])* $ty:ident, $name:literal, $request:ty, $response:ty) => {
        $(#[$doc])*
        pub enum $ty {}

        impl ClientMethod for $ty {
            const NAME: &'static str = $name;
            type Request = $request;
            type Response = $response;
        }
    };
}

macro_rules! server_method {
    ($(#[$doc:meta])* $ty:ident, $name:literal, $request:ty) => {
        $(#[$doc])*
        pub enum $ty {}

        impl ServerMethod for $ty {
            const NAME: &'static str = $name;
            type Request = $request;
        }
    };
}

// ============================================================================
// Shared payload fragments
// ============================================================================

/// Run routing metadata attached to every server→client resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMeta {
    pub run_id: String,
}

/// Wire shape of a normalized workflow error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowError {
    pub name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
}

impl std::fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl std::error::Error for WorkflowError {}

/// An id/slug pair in the registration record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slugged {
    pub id: String,
    pub slug: String,
}

/// Identifiers returned by the registration handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRecord {
    pub workflow: Slugged,
    pub environment: Slugged,
    pub organization: Slugged,
    pub is_new: bool,
    pub url: String,
}

/// Git metadata attached to the registration handshake, when probed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitMetadata {
    pub sha: String,
    pub branch: String,
    pub committer: String,
    pub committer_date: String,
    pub commit_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

/// Environment metadata envelope carried by `INITIALIZE_HOST_V2`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<GitMetadata>,
    pub package_metadata: Value,
    pub env: BTreeMap<String, String>,
}

// ============================================================================
// Client → Server payloads
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeHostPayload {
    pub api_key: String,
    pub workflow_id: String,
    pub workflow_name: String,
    pub trigger: Value,
    pub package_name: String,
    pub package_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_ttl: Option<u64>,
    pub metadata: HostMetadata,
}

/// Registration result: either the identifiers or a fatal message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum InitializeHostResponse {
    #[serde(rename = "success")]
    Success { data: RegistrationRecord },
    #[serde(rename = "error")]
    Error { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRunPayload {
    pub run_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRunPayload {
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowErrorPayload {
    pub run_id: String,
    pub error: WorkflowError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequestPayload {
    pub run_id: String,
    pub key: String,
    pub service: String,
    pub endpoint: String,
    pub params: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub timestamp: String,
}

/// Request half of a journaled fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchRequest {
    pub url: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<Value>,
}

/// Response half of a journaled fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchResponse {
    pub status: u16,
    pub ok: bool,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendFetchPayload {
    pub run_id: String,
    pub key: String,
    pub fetch: FetchRequest,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendEventPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub event: Value,
    pub timestamp: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendLogPayload {
    pub run_id: String,
    pub level: LogLevel,
    pub message: String,
    pub properties: Value,
    pub timestamp: String,
}

/// Delay form: relative period or absolute instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Wait {
    #[serde(rename = "DELAY", rename_all = "camelCase")]
    Delay {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seconds: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        minutes: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hours: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        days: Option<u64>,
    },
    #[serde(rename = "SCHEDULE_FOR", rename_all = "camelCase")]
    ScheduleFor { schedule_for: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeDelayPayload {
    pub run_id: String,
    pub key: String,
    pub wait: Wait,
    pub timestamp: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOnceMode {
    #[serde(rename = "REMOTE")]
    Remote,
    #[serde(rename = "LOCAL_ONLY")]
    LocalOnly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeRunOncePayload {
    pub run_id: String,
    pub key: String,
    #[serde(rename = "type")]
    pub mode: RunOnceMode,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRunOncePayload {
    pub run_id: String,
    pub key: String,
    pub idempotency_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KvGetPayload {
    pub run_id: String,
    /// Call key: the user-supplied idempotency key.
    pub key: String,
    pub namespace: String,
    /// Name of the stored item.
    pub item: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KvSetPayload {
    pub run_id: String,
    pub key: String,
    pub namespace: String,
    pub item: String,
    pub value: Value,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KvDeletePayload {
    pub run_id: String,
    pub key: String,
    pub namespace: String,
    pub item: String,
    pub timestamp: String,
}

// ============================================================================
// Client → Server methods
// ============================================================================

client_method!(
    /// One-shot registration handshake issued after every (re)connect.
    InitializeHostV2,
    "INITIALIZE_HOST_V2",
    InitializeHostPayload,
    InitializeHostResponse
);
client_method!(StartWorkflowRun, "START_WORKFLOW_RUN", StartRunPayload, bool);
client_method!(
    CompleteWorkflowRun,
    "COMPLETE_WORKFLOW_RUN",
    CompleteRunPayload,
    bool
);
client_method!(
    SendWorkflowError,
    "SEND_WORKFLOW_ERROR",
    WorkflowErrorPayload,
    bool
);
client_method!(SendRequest, "SEND_REQUEST", SendRequestPayload, bool);
client_method!(SendFetch, "SEND_FETCH", SendFetchPayload, bool);
client_method!(SendEvent, "SEND_EVENT", SendEventPayload, bool);
client_method!(SendLog, "SEND_LOG", SendLogPayload, bool);
client_method!(
    InitializeDelay,
    "INITIALIZE_DELAY",
    InitializeDelayPayload,
    bool
);
client_method!(
    InitializeRunOnce,
    "INITIALIZE_RUN_ONCE",
    InitializeRunOncePayload,
    bool
);
client_method!(
    CompleteRunOnce,
    "COMPLETE_RUN_ONCE",
    CompleteRunOncePayload,
    bool
);
client_method!(SendKvGet, "SEND_KV_GET", KvGetPayload, bool);
client_method!(SendKvSet, "SEND_KV_SET", KvSetPayload, bool);
client_method!(SendKvDelete, "SEND_KV_DELETE", KvDeletePayload, bool);

// ============================================================================
// Server → Client payloads
// ============================================================================

/// Raw trigger event wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerPayload {
    pub input: Value,
}

/// Run descriptor attached to `TRIGGER_WORKFLOW`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunDescriptor {
    pub workflow_id: String,
    #[serde(default)]
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub is_test: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_origin: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerWorkflowMessage {
    /// The run id.
    pub id: String,
    pub trigger: TriggerPayload,
    pub meta: RunDescriptor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveDelayMessage {
    pub meta: RunMeta,
    pub key: String,
}

/// Idempotency outcome reported for a runOnce journal entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOnceResult {
    pub idempotency_key: String,
    pub has_run: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveRunOnceMessage {
    pub meta: RunMeta,
    pub key: String,
    #[serde(flatten)]
    pub result: RunOnceResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveRequestMessage {
    pub meta: RunMeta,
    pub key: String,
    pub output: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectRequestMessage {
    pub meta: RunMeta,
    pub key: String,
    pub error: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveFetchMessage {
    pub meta: RunMeta,
    pub key: String,
    pub response: FetchResponse,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectFetchMessage {
    pub meta: RunMeta,
    pub key: String,
    pub error: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveKvGetMessage {
    pub meta: RunMeta,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveKvSetMessage {
    pub meta: RunMeta,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveKvDeleteMessage {
    pub meta: RunMeta,
    pub key: String,
}

// ============================================================================
// Server → Client methods
// ============================================================================

server_method!(
    /// Start a workflow run for an incoming event.
    TriggerWorkflow,
    "TRIGGER_WORKFLOW",
    TriggerWorkflowMessage
);
server_method!(ResolveDelay, "RESOLVE_DELAY", ResolveDelayMessage);
server_method!(ResolveRunOnce, "RESOLVE_RUN_ONCE", ResolveRunOnceMessage);
server_method!(ResolveRequest, "RESOLVE_REQUEST", ResolveRequestMessage);
server_method!(RejectRequest, "REJECT_REQUEST", RejectRequestMessage);
server_method!(
    ResolveFetchRequest,
    "RESOLVE_FETCH_REQUEST",
    ResolveFetchMessage
);
server_method!(
    RejectFetchRequest,
    "REJECT_FETCH_REQUEST",
    RejectFetchMessage
);
server_method!(ResolveKvGet, "RESOLVE_KV_GET", ResolveKvGetMessage);
server_method!(ResolveKvSet, "RESOLVE_KV_SET", ResolveKvSetMessage);
server_method!(ResolveKvDelete, "RESOLVE_KV_DELETE", ResolveKvDeleteMessage);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wait_delay_wire_shape() {
        let wait = Wait::Delay {
            seconds: Some(5),
            minutes: None,
            hours: None,
            days: None,
        };
        assert_eq!(
            serde_json::to_value(&wait).unwrap(),
            json!({"type": "DELAY", "seconds": 5})
        );
    }

    #[test]
    fn test_wait_schedule_for_wire_shape() {
        let wait = Wait::ScheduleFor {
            schedule_for: "2026-01-02T03:04:05Z".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&wait).unwrap(),
            json!({"type": "SCHEDULE_FOR", "scheduleFor": "2026-01-02T03:04:05Z"})
        );
    }

    #[test]
    fn test_run_once_mode_wire_shape() {
        let payload = InitializeRunOncePayload {
            run_id: "r1".to_string(),
            key: "k".to_string(),
            mode: RunOnceMode::Remote,
            timestamp: "0".to_string(),
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["type"], "REMOTE");
        assert_eq!(value["runId"], "r1");
    }

    #[test]
    fn test_initialize_host_response_tagged_union() {
        let success: InitializeHostResponse = serde_json::from_value(json!({
            "type": "success",
            "data": {
                "workflow": {"id": "w1", "slug": "w1"},
                "environment": {"id": "e", "slug": "e"},
                "organization": {"id": "o", "slug": "o"},
                "isNew": true,
                "url": "https://x/"
            }
        }))
        .unwrap();
        match success {
            InitializeHostResponse::Success { data } => {
                assert_eq!(data.workflow.id, "w1");
                assert!(data.is_new);
            }
            InitializeHostResponse::Error { .. } => panic!("expected success"),
        }

        let error: InitializeHostResponse =
            serde_json::from_value(json!({"type": "error", "message": "bad key"})).unwrap();
        assert!(matches!(error, InitializeHostResponse::Error { message } if message == "bad key"));
    }

    #[test]
    fn test_trigger_workflow_decodes_sparse_meta() {
        let message: TriggerWorkflowMessage = serde_json::from_value(json!({
            "id": "r1",
            "trigger": {"input": {"n": 1}},
            "meta": {"attempt": 0, "workflowId": "w1"}
        }))
        .unwrap();
        assert_eq!(message.id, "r1");
        assert_eq!(message.meta.workflow_id, "w1");
        assert_eq!(message.meta.attempt, 0);
        assert!(!message.meta.is_test);
        assert!(message.meta.app_origin.is_none());
    }

    #[test]
    fn test_workflow_error_omits_absent_stack() {
        let error = WorkflowError {
            name: "Error".to_string(),
            message: "boom".to_string(),
            stack_trace: None,
        };
        let value = serde_json::to_value(&error).unwrap();
        assert!(value.get("stackTrace").is_none());

        let error = WorkflowError {
            stack_trace: Some("at main".to_string()),
            ..error
        };
        let value = serde_json::to_value(&error).unwrap();
        assert_eq!(value["stackTrace"], "at main");
    }

    #[test]
    fn test_log_level_wire_shape() {
        assert_eq!(serde_json::to_value(LogLevel::Warn).unwrap(), json!("warn"));
        assert_eq!(serde_json::to_value(LogLevel::Debug).unwrap(), json!("debug"));
    }
}
