// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Pending-call registry.
//!
//! One logical correlation table per journaled operation kind, keyed by
//! `(runId, userKey)`. Registering a call yields the receiving half of a
//! completion pair; the matching `RESOLVE_*`/`REJECT_*` handler fulfils it.
//! A resolution for an unknown key is not an error: the host may have been
//! restarted and not yet reached the matching call site, and the server
//! will re-deliver after the call is re-journaled.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::RunError;

/// Journaled operation kinds, one correlation table each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    Wait,
    RunOnce,
    Request,
    Fetch,
    KvGet,
    KvSet,
    KvDelete,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CallKey {
    kind: CallKind,
    run_id: String,
    user_key: String,
}

type Completion = oneshot::Sender<Result<Value, RunError>>;

/// Correlation tables for suspended journaled calls.
#[derive(Default)]
pub struct PendingCalls {
    table: Mutex<HashMap<CallKey, Completion>>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a completion pair for `(kind, runId, userKey)` and return the
    /// receiver backing the suspended call.
    ///
    /// At most one entry exists per key; re-registering replaces the
    /// previous entry (whose waiter observes a closed channel) and is
    /// logged, since user keys are expected to be unique per call site.
    pub fn register(
        &self,
        kind: CallKind,
        run_id: &str,
        user_key: &str,
    ) -> oneshot::Receiver<Result<Value, RunError>> {
        let (tx, rx) = oneshot::channel();
        let key = CallKey {
            kind,
            run_id: run_id.to_string(),
            user_key: user_key.to_string(),
        };
        let replaced = self
            .table
            .lock()
            .expect("pending call table lock poisoned")
            .insert(key, tx);
        if replaced.is_some() {
            warn!(?kind, run_id, user_key, "replaced pending call with duplicate key");
        }
        rx
    }

    /// Fulfil a suspended call. Returns false when no entry matches.
    pub fn resolve(&self, kind: CallKind, run_id: &str, user_key: &str, value: Value) -> bool {
        self.complete(kind, run_id, user_key, Ok(value))
    }

    /// Fail a suspended call. Returns false when no entry matches.
    pub fn reject(&self, kind: CallKind, run_id: &str, user_key: &str, error: String) -> bool {
        self.complete(kind, run_id, user_key, Err(RunError::Rejected(error)))
    }

    /// Reject every still-pending call of a run. Invoked at run teardown.
    pub fn clear(&self, run_id: &str) {
        let drained: Vec<(CallKey, Completion)> = {
            let mut table = self
                .table
                .lock()
                .expect("pending call table lock poisoned");
            let keys: Vec<CallKey> = table
                .keys()
                .filter(|key| key.run_id == run_id)
                .cloned()
                .collect();
            keys.into_iter()
                .filter_map(|key| table.remove(&key).map(|tx| (key, tx)))
                .collect()
        };

        for (key, tx) in drained {
            debug!(kind = ?key.kind, run_id, user_key = %key.user_key, "rejecting pending call at run teardown");
            let _ = tx.send(Err(RunError::Closed));
        }
    }

    /// Drop an entry without completing it. Used when journaling the intent
    /// itself failed and the suspended call is surfacing that error instead.
    pub fn discard(&self, kind: CallKind, run_id: &str, user_key: &str) {
        let key = CallKey {
            kind,
            run_id: run_id.to_string(),
            user_key: user_key.to_string(),
        };
        self.table
            .lock()
            .expect("pending call table lock poisoned")
            .remove(&key);
    }

    /// Number of pending entries for a run (test observability).
    pub fn len(&self, run_id: &str) -> usize {
        self.table
            .lock()
            .expect("pending call table lock poisoned")
            .keys()
            .filter(|key| key.run_id == run_id)
            .count()
    }

    fn complete(
        &self,
        kind: CallKind,
        run_id: &str,
        user_key: &str,
        result: Result<Value, RunError>,
    ) -> bool {
        let key = CallKey {
            kind,
            run_id: run_id.to_string(),
            user_key: user_key.to_string(),
        };
        let entry = self
            .table
            .lock()
            .expect("pending call table lock poisoned")
            .remove(&key);
        match entry {
            Some(tx) => {
                let _ = tx.send(result);
                true
            }
            None => {
                debug!(?kind, run_id, user_key, "resolution for unknown pending call");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_register_resolve_round_trip() {
        let pending = PendingCalls::new();
        let rx = pending.register(CallKind::Wait, "r1", "d1");

        assert!(pending.resolve(CallKind::Wait, "r1", "d1", json!(null)));
        assert_eq!(rx.await.unwrap().unwrap(), json!(null));
        // Entry is gone once resolved.
        assert_eq!(pending.len("r1"), 0);
    }

    #[tokio::test]
    async fn test_reject_surfaces_error() {
        let pending = PendingCalls::new();
        let rx = pending.register(CallKind::Fetch, "r1", "f1");

        assert!(pending.reject(CallKind::Fetch, "r1", "f1", "upstream 500".to_string()));
        match rx.await.unwrap() {
            Err(RunError::Rejected(message)) => assert_eq!(message, "upstream 500"),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_key_is_tolerated() {
        let pending = PendingCalls::new();
        assert!(!pending.resolve(CallKind::Wait, "r99", "d9", json!(null)));
        assert!(!pending.reject(CallKind::Wait, "r99", "d9", "x".to_string()));
    }

    #[test]
    fn test_kinds_are_disjoint() {
        let pending = PendingCalls::new();
        let _rx = pending.register(CallKind::KvGet, "r1", "k1");

        // Same run and key under a different kind does not match.
        assert!(!pending.resolve(CallKind::KvSet, "r1", "k1", json!(null)));
        assert_eq!(pending.len("r1"), 1);
    }

    #[test]
    fn test_runs_are_disjoint() {
        let pending = PendingCalls::new();
        let _rx = pending.register(CallKind::Wait, "r1", "d1");

        assert!(!pending.resolve(CallKind::Wait, "r2", "d1", json!(null)));
        assert_eq!(pending.len("r1"), 1);
    }

    #[tokio::test]
    async fn test_clear_rejects_leftovers() {
        let pending = PendingCalls::new();
        let rx1 = pending.register(CallKind::Wait, "r1", "d1");
        let rx2 = pending.register(CallKind::Request, "r1", "q1");
        let rx_other = pending.register(CallKind::Wait, "r2", "d1");

        pending.clear("r1");

        assert!(matches!(rx1.await.unwrap(), Err(RunError::Closed)));
        assert!(matches!(rx2.await.unwrap(), Err(RunError::Closed)));
        assert_eq!(pending.len("r1"), 0);
        assert_eq!(pending.len("r2"), 1);
        drop(rx_other);
    }

    #[tokio::test]
    async fn test_at_most_one_entry_per_key() {
        let pending = PendingCalls::new();
        let rx1 = pending.register(CallKind::Wait, "r1", "d1");
        let rx2 = pending.register(CallKind::Wait, "r1", "d1");

        assert_eq!(pending.len("r1"), 1);
        // The replaced waiter observes a dropped sender.
        assert!(rx1.await.is_err());

        assert!(pending.resolve(CallKind::Wait, "r1", "d1", json!(1)));
        assert_eq!(rx2.await.unwrap().unwrap(), json!(1));
    }
}
