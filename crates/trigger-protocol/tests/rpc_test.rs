// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! RPC correlation, timeout and dispatch tests over the in-memory channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::json;

use trigger_protocol::methods::{
    CompleteRunPayload, CompleteWorkflowRun, ResolveDelay, StartRunPayload, StartWorkflowRun,
};
use trigger_protocol::rpc::{Rpc, RpcError};
use trigger_protocol::testing;

fn rpc_with_server(timeout_ms: u64) -> (Rpc, testing::FakeServer) {
    let rpc = Rpc::new(Duration::from_millis(timeout_ms));
    let (handle, server) = testing::link();
    rpc.bind(handle);
    (rpc, server)
}

#[tokio::test]
async fn test_outbound_call_resolves_with_response() {
    let (rpc, mut server) = rpc_with_server(1_000);

    let send = tokio::spawn({
        let rpc = rpc.clone();
        async move {
            rpc.send::<StartWorkflowRun>(&StartRunPayload {
                run_id: "r1".to_string(),
            })
            .await
        }
    });

    let (id, payload) = server.expect_request("START_WORKFLOW_RUN").await;
    assert_eq!(payload, json!({"runId": "r1"}));
    server.respond_ok(&id, json!(true)).await;

    assert!(send.await.unwrap().unwrap());
}

#[tokio::test]
async fn test_outbound_call_rejects_with_remote_error() {
    let (rpc, mut server) = rpc_with_server(1_000);

    let send = tokio::spawn({
        let rpc = rpc.clone();
        async move {
            rpc.send::<CompleteWorkflowRun>(&CompleteRunPayload {
                run_id: "r1".to_string(),
                output: None,
            })
            .await
        }
    });

    let (id, _) = server.expect_request("COMPLETE_WORKFLOW_RUN").await;
    server.respond_err(&id, "run not found").await;

    match send.await.unwrap() {
        Err(RpcError::Remote(message)) => assert_eq!(message, "run not found"),
        other => panic!("expected remote error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_outbound_call_times_out() {
    let (rpc, mut server) = rpc_with_server(50);

    let result = rpc
        .send::<StartWorkflowRun>(&StartRunPayload {
            run_id: "r1".to_string(),
        })
        .await;
    assert!(matches!(result, Err(RpcError::Timeout(50))));

    // The request still went out.
    let (_, payload) = server.expect_request("START_WORKFLOW_RUN").await;
    assert_eq!(payload["runId"], "r1");
}

#[tokio::test]
async fn test_late_response_after_timeout_is_discarded() {
    let (rpc, mut server) = rpc_with_server(50);

    let result = rpc
        .send::<StartWorkflowRun>(&StartRunPayload {
            run_id: "r1".to_string(),
        })
        .await;
    assert!(matches!(result, Err(RpcError::Timeout(_))));

    let (id, _) = server.expect_request("START_WORKFLOW_RUN").await;
    // Nothing blows up when the response arrives for a timed-out call.
    server.respond_ok(&id, json!(true)).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
}

#[tokio::test]
async fn test_response_schema_mismatch_rejects() {
    let (rpc, mut server) = rpc_with_server(1_000);

    let send = tokio::spawn({
        let rpc = rpc.clone();
        async move {
            rpc.send::<StartWorkflowRun>(&StartRunPayload {
                run_id: "r1".to_string(),
            })
            .await
        }
    });

    let (id, _) = server.expect_request("START_WORKFLOW_RUN").await;
    server.respond_ok(&id, json!({"not": "a bool"})).await;

    assert!(matches!(
        send.await.unwrap(),
        Err(RpcError::Decode { method: "START_WORKFLOW_RUN", .. })
    ));
}

#[tokio::test]
async fn test_inbound_request_dispatches_and_acks() {
    let (rpc, mut server) = rpc_with_server(1_000);

    let seen = Arc::new(AtomicUsize::new(0));
    rpc.on::<ResolveDelay, _, _>({
        let seen = seen.clone();
        move |message| {
            let seen = seen.clone();
            async move {
                assert_eq!(message.meta.run_id, "r1");
                assert_eq!(message.key, "d1");
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            }
        }
    });

    let id = server
        .call(
            "RESOLVE_DELAY",
            json!({"meta": {"runId": "r1"}, "key": "d1"}),
        )
        .await;

    let (ok, value, _) = server.expect_response(&id).await;
    assert!(ok);
    assert_eq!(value, Some(json!(true)));
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_inbound_unknown_method_reports_error() {
    let (_rpc, mut server) = rpc_with_server(1_000);

    let id = server.call("NO_SUCH_METHOD", json!({})).await;
    let (ok, _, error) = server.expect_response(&id).await;
    assert!(!ok);
    assert!(error.unwrap().contains("unknown method"));
}

#[tokio::test]
async fn test_inbound_malformed_payload_reports_error() {
    let (rpc, mut server) = rpc_with_server(1_000);
    rpc.on::<ResolveDelay, _, _>(|_| async { Ok(true) });

    let id = server.call("RESOLVE_DELAY", json!({"key": 42})).await;
    let (ok, _, error) = server.expect_response(&id).await;
    assert!(!ok);
    assert!(error.unwrap().contains("invalid RESOLVE_DELAY payload"));
}

#[tokio::test]
async fn test_rebind_keeps_pending_resolvers() {
    let rpc = Rpc::new(Duration::from_millis(2_000));
    let (handle1, mut server1) = testing::link();
    rpc.bind(handle1);

    let send = tokio::spawn({
        let rpc = rpc.clone();
        async move {
            rpc.send::<StartWorkflowRun>(&StartRunPayload {
                run_id: "r1".to_string(),
            })
            .await
        }
    });

    let (id, _) = server1.expect_request("START_WORKFLOW_RUN").await;

    // Rebind to a fresh channel, then answer through the OLD reader: the
    // resolver must still be registered.
    let (handle2, _server2) = testing::link();
    rpc.bind(handle2);
    server1.respond_ok(&id, json!(true)).await;

    assert!(send.await.unwrap().unwrap());
}

#[tokio::test]
async fn test_close_is_published() {
    let (rpc, mut server) = rpc_with_server(1_000);
    let mut closed = rpc.closed();

    server.close(1006, "going away").await;
    closed.changed().await.unwrap();

    let info = closed.borrow().clone().unwrap();
    assert_eq!(info.code, 1006);
    assert_eq!(info.reason, "going away");
}

#[tokio::test]
async fn test_notify_sends_without_waiting() {
    let (rpc, mut server) = rpc_with_server(1_000);

    rpc.notify::<StartWorkflowRun>(&StartRunPayload {
        run_id: "r1".to_string(),
    })
    .await
    .unwrap();

    let (_, payload) = server.expect_request("START_WORKFLOW_RUN").await;
    assert_eq!(payload["runId"], "r1");
}

#[tokio::test]
async fn test_sends_are_fifo() {
    let (rpc, mut server) = rpc_with_server(1_000);

    for i in 0..5 {
        rpc.notify::<StartWorkflowRun>(&StartRunPayload {
            run_id: format!("r{i}"),
        })
        .await
        .unwrap();
    }

    for i in 0..5 {
        let (_, payload) = server.expect_request("START_WORKFLOW_RUN").await;
        assert_eq!(payload["runId"], format!("r{i}"));
    }
}
