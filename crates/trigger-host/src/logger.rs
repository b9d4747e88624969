// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Run logger.
//!
//! Lines are mirrored to the local `tracing` subscriber and journaled to
//! the orchestrator as fire-and-forget `SEND_LOG` calls, ordered only with
//! respect to each other.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, info, warn};
use trigger_protocol::methods::{LogLevel, SendLog, SendLogPayload};

use crate::clock;
use crate::context::RunInner;

/// Logger bound to one run.
#[derive(Clone)]
pub struct RunLogger {
    inner: Arc<RunInner>,
}

impl RunLogger {
    pub(crate) fn new(inner: Arc<RunInner>) -> Self {
        Self { inner }
    }

    pub async fn debug(&self, message: &str, properties: Value) {
        self.log(LogLevel::Debug, message, properties).await;
    }

    pub async fn info(&self, message: &str, properties: Value) {
        self.log(LogLevel::Info, message, properties).await;
    }

    pub async fn warn(&self, message: &str, properties: Value) {
        self.log(LogLevel::Warn, message, properties).await;
    }

    pub async fn error(&self, message: &str, properties: Value) {
        self.log(LogLevel::Error, message, properties).await;
    }

    async fn log(&self, level: LogLevel, message: &str, properties: Value) {
        let run_id = self.inner.run_id.as_str();
        match level {
            LogLevel::Debug => debug!(run_id, %properties, "{message}"),
            LogLevel::Info => info!(run_id, %properties, "{message}"),
            LogLevel::Warn => warn!(run_id, %properties, "{message}"),
            LogLevel::Error => error!(run_id, %properties, "{message}"),
        }

        let payload = SendLogPayload {
            run_id: run_id.to_string(),
            level,
            message: message.to_string(),
            properties,
            timestamp: clock::nanos_since_start(),
        };
        self.inner.host.fire_and_forget::<SendLog>(&payload).await;
    }
}
