// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Registration handshake.
//!
//! After every (re)connect the host issues `INITIALIZE_HOST_V2` advertising
//! the workflow identity, trigger metadata, package version and environment
//! metadata, and receives back the workflow/environment/organization
//! identifiers plus the dashboard URL. A timeout retries forever with fixed
//! backoff; a server-side rejection is fatal.

use std::time::Duration;

use tracing::{info, warn};
use trigger_protocol::RpcError;
use trigger_protocol::methods::{
    InitializeHostPayload, InitializeHostResponse, InitializeHostV2, RegistrationRecord,
};

use crate::error::{HostError, Result};
use crate::host::HostShared;
use crate::metadata;

pub(crate) fn build_payload(host: &HostShared) -> InitializeHostPayload {
    InitializeHostPayload {
        api_key: host.config.api_key.clone(),
        workflow_id: host.workflow.id.clone(),
        workflow_name: host.workflow.name.clone(),
        trigger: host.workflow.trigger.clone(),
        package_name: host.workflow.package_name.clone(),
        package_version: host.workflow.package_version.clone(),
        trigger_ttl: host.config.trigger_ttl,
        metadata: metadata::collect(host.probe.as_ref()),
    }
}

/// Issue the handshake against the currently bound channel.
pub(crate) async fn register(host: &HostShared) -> Result<RegistrationRecord> {
    let payload = build_payload(host);
    let backoff = Duration::from_millis(host.config.retry_backoff_ms);

    loop {
        match host.rpc.send::<InitializeHostV2>(&payload).await {
            Ok(InitializeHostResponse::Success { data }) => {
                info!(
                    workflow = %data.workflow.slug,
                    environment = %data.environment.slug,
                    is_new = data.is_new,
                    "workflow registered"
                );
                return Ok(data);
            }
            Ok(InitializeHostResponse::Error { message }) => {
                return Err(HostError::Registration(message));
            }
            Err(RpcError::Timeout(ms)) => {
                warn!(timeout_ms = ms, "registration timed out; retrying");
                tokio::time::sleep(backoff).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
}
