// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Namespaced key/value handles over the orchestrator's persisted store.
//!
//! Three namespaces are pre-bound on every context: `workflow:<id>`,
//! `org:<id>` and `run:<id>`. Each operation is journaled with the
//! user-supplied idempotency key as the call key, so replays reattach to
//! results the orchestrator already holds.

use std::sync::Arc;

use serde_json::Value;
use trigger_protocol::methods::{
    KvDeletePayload, KvGetPayload, KvSetPayload, SendKvDelete, SendKvGet, SendKvSet,
};

use crate::clock;
use crate::context::RunInner;
use crate::error::RunError;
use crate::pending::CallKind;

/// A key/value store bound to one namespace.
#[derive(Clone)]
pub struct KvStore {
    inner: Arc<RunInner>,
    namespace: String,
}

impl KvStore {
    pub(crate) fn new(inner: Arc<RunInner>, namespace: String) -> Self {
        Self { inner, namespace }
    }

    /// The namespace this handle is bound to.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Read an item. Returns `None` when the item does not exist.
    pub async fn get(&self, idempotency_key: &str, item: &str) -> Result<Option<Value>, RunError> {
        let payload = KvGetPayload {
            run_id: self.inner.run_id.clone(),
            key: idempotency_key.to_string(),
            namespace: self.namespace.clone(),
            item: item.to_string(),
            timestamp: clock::nanos_since_start(),
        };
        let value = self
            .inner
            .journal::<SendKvGet>(CallKind::KvGet, idempotency_key, &payload)
            .await?;
        Ok(match value {
            Value::Null => None,
            value => Some(value),
        })
    }

    /// Write an item.
    pub async fn set(
        &self,
        idempotency_key: &str,
        item: &str,
        value: Value,
    ) -> Result<(), RunError> {
        let payload = KvSetPayload {
            run_id: self.inner.run_id.clone(),
            key: idempotency_key.to_string(),
            namespace: self.namespace.clone(),
            item: item.to_string(),
            value,
            timestamp: clock::nanos_since_start(),
        };
        self.inner
            .journal::<SendKvSet>(CallKind::KvSet, idempotency_key, &payload)
            .await?;
        Ok(())
    }

    /// Delete an item.
    pub async fn delete(&self, idempotency_key: &str, item: &str) -> Result<(), RunError> {
        let payload = KvDeletePayload {
            run_id: self.inner.run_id.clone(),
            key: idempotency_key.to_string(),
            namespace: self.namespace.clone(),
            item: item.to_string(),
            timestamp: clock::nanos_since_start(),
        };
        self.inner
            .journal::<SendKvDelete>(CallKind::KvDelete, idempotency_key, &payload)
            .await?;
        Ok(())
    }
}
