// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Run executor.
//!
//! Handles `TRIGGER_WORKFLOW` and the resolution handlers for journaled
//! calls. Each run executes in its own task: validate the event, announce
//! the run with `START_WORKFLOW_RUN`, invoke the user function under its
//! ambient bundle, then report `COMPLETE_WORKFLOW_RUN` or
//! `SEND_WORKFLOW_ERROR` (never both) and clear any pending calls.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{debug, error, info, instrument, warn};
use trigger_protocol::methods::{
    CompleteRunPayload, CompleteWorkflowRun, RejectFetchRequest, RejectRequest, ResolveDelay,
    ResolveFetchRequest, ResolveKvDelete, ResolveKvGet, ResolveKvSet, ResolveRequest,
    ResolveRunOnce, SendWorkflowError, StartRunPayload, StartWorkflowRun, TriggerWorkflow,
    TriggerWorkflowMessage, WorkflowError, WorkflowErrorPayload,
};

use crate::ambient::{self, RunAmbient};
use crate::context::{RunContext, RunInner};
use crate::error::normalize_error;
use crate::host::HostShared;
use crate::pending::{CallKind, PendingCalls};

/// Render a server-supplied rejection payload as an error message.
fn error_text(error: &Value) -> String {
    match error {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Register the server→client handlers.
pub(crate) fn install(host: &Arc<HostShared>) {
    let weak = Arc::downgrade(host);
    host.rpc.on::<TriggerWorkflow, _, _>(move |message| {
        let weak = weak.clone();
        async move {
            let Some(host) = weak.upgrade() else {
                return Err("host shut down".to_string());
            };
            handle_trigger(host, message).await
        }
    });

    install_resolutions(&host.rpc, host.pending.clone());
}

/// Resolution handlers fulfil suspended calls by `(runId, key)`. A
/// resolution for an unknown key still acks `true`: the host may have been
/// restarted and not yet re-journaled the matching call.
fn install_resolutions(rpc: &trigger_protocol::Rpc, pending: Arc<PendingCalls>) {
    let p = pending.clone();
    rpc.on::<ResolveDelay, _, _>(move |m| {
        let p = p.clone();
        async move {
            p.resolve(CallKind::Wait, &m.meta.run_id, &m.key, Value::Null);
            Ok(true)
        }
    });

    let p = pending.clone();
    rpc.on::<ResolveRunOnce, _, _>(move |m| {
        let p = p.clone();
        async move {
            let outcome = serde_json::to_value(&m.result).map_err(|e| e.to_string())?;
            p.resolve(CallKind::RunOnce, &m.meta.run_id, &m.key, outcome);
            Ok(true)
        }
    });

    let p = pending.clone();
    rpc.on::<ResolveRequest, _, _>(move |m| {
        let p = p.clone();
        async move {
            p.resolve(CallKind::Request, &m.meta.run_id, &m.key, m.output);
            Ok(true)
        }
    });

    let p = pending.clone();
    rpc.on::<RejectRequest, _, _>(move |m| {
        let p = p.clone();
        async move {
            p.reject(CallKind::Request, &m.meta.run_id, &m.key, error_text(&m.error));
            Ok(true)
        }
    });

    let p = pending.clone();
    rpc.on::<ResolveFetchRequest, _, _>(move |m| {
        let p = p.clone();
        async move {
            let response = serde_json::to_value(&m.response).map_err(|e| e.to_string())?;
            p.resolve(CallKind::Fetch, &m.meta.run_id, &m.key, response);
            Ok(true)
        }
    });

    let p = pending.clone();
    rpc.on::<RejectFetchRequest, _, _>(move |m| {
        let p = p.clone();
        async move {
            p.reject(CallKind::Fetch, &m.meta.run_id, &m.key, error_text(&m.error));
            Ok(true)
        }
    });

    let p = pending.clone();
    rpc.on::<ResolveKvGet, _, _>(move |m| {
        let p = p.clone();
        async move {
            p.resolve(
                CallKind::KvGet,
                &m.meta.run_id,
                &m.key,
                m.value.unwrap_or(Value::Null),
            );
            Ok(true)
        }
    });

    let p = pending.clone();
    rpc.on::<ResolveKvSet, _, _>(move |m| {
        let p = p.clone();
        async move {
            p.resolve(CallKind::KvSet, &m.meta.run_id, &m.key, Value::Null);
            Ok(true)
        }
    });

    let p = pending;
    rpc.on::<ResolveKvDelete, _, _>(move |m| {
        let p = p.clone();
        async move {
            p.resolve(CallKind::KvDelete, &m.meta.run_id, &m.key, Value::Null);
            Ok(true)
        }
    });
}

/// Handle one `TRIGGER_WORKFLOW`: validate, then hand the run to its own
/// task and ack. Runs are independent; any number may be live at once.
#[instrument(skip(host, message), fields(run_id = %message.id, attempt = message.meta.attempt))]
async fn handle_trigger(
    host: Arc<HostShared>,
    message: TriggerWorkflowMessage,
) -> Result<bool, String> {
    let run_id = message.id;
    eprintln!("DEBUG handle_trigger run_id={run_id}");
    debug!("workflow triggered");

    if let Err(validation) = (host.workflow.validator)(&message.trigger.input) {
        warn!(error = %validation, "event failed validation");
        let error = WorkflowError {
            name: "Event validation error".to_string(),
            message: validation,
            stack_trace: None,
        };
        if let Err(e) = host
            .send_with_retry::<SendWorkflowError>(&WorkflowErrorPayload {
                run_id: run_id.clone(),
                error,
            })
            .await
        {
            error!(error = %e, "failed to report validation error");
        }
        return Ok(true);
    }

    let run = Arc::new(RunInner {
        host: host.clone(),
        run_id,
        descriptor: message.meta,
    });
    tokio::spawn(execute_run(run, message.trigger.input));
    Ok(true)
}

/// Drive one run to completion.
async fn execute_run(run: Arc<RunInner>, input: Value) {
    let host = run.host.clone();
    let run_id = run.run_id.clone();

    // The run is announced before any user code executes.
    eprintln!("DEBUG execute_run before StartWorkflowRun run_id={run_id}");
    if let Err(e) = host
        .send_with_retry::<StartWorkflowRun>(&StartRunPayload {
            run_id: run_id.clone(),
        })
        .await
    {
        error!(run_id, error = %e, "failed to start workflow run");
        let _ = host
            .send_with_retry::<SendWorkflowError>(&WorkflowErrorPayload {
                run_id: run_id.clone(),
                error: normalize_error(&e),
            })
            .await;
        host.pending.clear(&run_id);
        return;
    }

    if run.descriptor.attempt == 0
        && let Some(record) = host.registration()
    {
        info!(run_id, url = %record.url, "workflow run started");
    }

    eprintln!("DEBUG execute_run after StartWorkflowRun run_id={run_id}");
    let context = RunContext::new(run.clone());
    let bundle = RunAmbient { inner: run.clone() };
    let result = ambient::scope(bundle, (host.workflow.run_fn)(input, context)).await;
    eprintln!("DEBUG execute_run after run_fn run_id={run_id}");

    match result {
        Ok(output) => {
            let serialized = serde_json::to_string(&output)
                .unwrap_or_else(|_| json!(null).to_string());
            if let Err(e) = host
                .send_with_retry::<CompleteWorkflowRun>(&CompleteRunPayload {
                    run_id: run_id.clone(),
                    output: Some(serialized),
                })
                .await
            {
                error!(run_id, error = %e, "failed to complete workflow run");
            } else {
                info!(run_id, "workflow run completed");
            }
        }
        Err(failure) => {
            let error = normalize_error(failure.as_ref());
            warn!(run_id, error = %error, "workflow run failed");
            if let Err(e) = host
                .send_with_retry::<SendWorkflowError>(&WorkflowErrorPayload {
                    run_id: run_id.clone(),
                    error,
                })
                .await
            {
                error!(run_id, error = %e, "failed to report workflow error");
            }
        }
    }

    host.pending.clear(&run_id);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_text_renders_strings_verbatim() {
        assert_eq!(error_text(&json!("boom")), "boom");
    }

    #[test]
    fn test_error_text_renders_objects_as_json() {
        assert_eq!(
            error_text(&json!({"name": "HttpError", "status": 500})),
            r#"{"name":"HttpError","status":500}"#
        );
    }
}
