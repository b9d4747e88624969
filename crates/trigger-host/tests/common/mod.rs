// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared scaffolding: a host wired to a scripted fake orchestrator.
#![allow(dead_code)]

use std::sync::Arc;

use serde_json::{Value, json};

use trigger_host::{HostConfig, Workflow, WorkflowHost};
use trigger_protocol::Envelope;
use trigger_protocol::testing::{FakeServer, StaticDialer};

/// Host configuration with test-friendly timeouts.
pub fn test_config() -> HostConfig {
    HostConfig::new("tr_test_key")
        .unwrap()
        .with_endpoint("wss://test.invalid/ws")
        .with_rpc_timeout_ms(1_000)
        .with_retry_backoff_ms(20)
}

/// The registration record every handshake in these tests returns.
pub fn registration_json() -> Value {
    json!({
        "type": "success",
        "data": {
            "workflow": {"id": "w1", "slug": "w1"},
            "environment": {"id": "e", "slug": "e"},
            "organization": {"id": "o", "slug": "o"},
            "isNew": true,
            "url": "https://x/"
        }
    })
}

/// Answer one `INITIALIZE_HOST_V2`; returns the handshake payload.
pub async fn serve_handshake(server: &mut FakeServer) -> Value {
    let (id, payload) = server.expect_request("INITIALIZE_HOST_V2").await;
    server.respond_ok(&id, registration_json()).await;
    payload
}

/// Build a host over scripted channels and complete the initial handshake.
/// Returns the host, the live fake server, and the dialer (for session-id
/// assertions and later channels).
pub async fn start_host(
    workflow: Workflow,
    channels: usize,
) -> (WorkflowHost, Vec<FakeServer>, Arc<StaticDialer>) {
    let (dialer, mut servers) = StaticDialer::with_channels(channels);
    let dialer = Arc::new(dialer);
    let host = WorkflowHost::with_dialer(workflow, test_config(), dialer.clone());

    let first = &mut servers[0];
    let (listened, _payload) = tokio::join!(host.listen(), serve_handshake(first));
    listened.expect("listen failed");

    (host, servers, dialer)
}

/// Next request frame the client sends, skipping interleaved response acks.
pub async fn next_request(server: &mut FakeServer) -> (String, String, Value) {
    loop {
        match server.recv().await.expect("channel ended unexpectedly") {
            Envelope::Request {
                id,
                method,
                payload,
            } => return (id, method, payload),
            Envelope::Response { .. } => continue,
        }
    }
}

/// Next request frame, asserting its method. Returns `(id, payload)`.
pub async fn expect_request(server: &mut FakeServer, method: &str) -> (String, Value) {
    let (id, got, payload) = next_request(server).await;
    assert_eq!(got, method, "unexpected outbound method");
    (id, payload)
}

/// Assert no further request goes out within 100ms.
pub async fn expect_quiet(server: &mut FakeServer) {
    let waited =
        tokio::time::timeout(std::time::Duration::from_millis(100), next_request(server)).await;
    if let Ok((_, method, payload)) = waited {
        panic!("expected no outbound request, got {method} {payload}");
    }
}

/// Fire a `TRIGGER_WORKFLOW` for the given run id and input.
pub async fn trigger_run(server: &mut FakeServer, run_id: &str, input: Value) {
    trigger_run_attempt(server, run_id, input, 0).await;
}

pub async fn trigger_run_attempt(server: &mut FakeServer, run_id: &str, input: Value, attempt: u32) {
    server
        .call(
            "TRIGGER_WORKFLOW",
            json!({
                "id": run_id,
                "trigger": {"input": input},
                "meta": {"attempt": attempt, "workflowId": "w1"}
            }),
        )
        .await;
}

/// Answer the `START_WORKFLOW_RUN` announcement for a run.
pub async fn serve_start(server: &mut FakeServer, run_id: &str) {
    let (id, payload) = expect_request(server, "START_WORKFLOW_RUN").await;
    assert_eq!(payload, json!({"runId": run_id}));
    server.respond_ok(&id, json!(true)).await;
}
