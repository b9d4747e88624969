// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Workflow definition.
//!
//! A workflow ties an identity (id, name, trigger descriptor) to a typed run
//! handler. The event type's serde implementation is the trigger schema: an
//! event that fails to deserialize is reported back to the orchestrator as a
//! validation error without starting the run.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::context::RunContext;
use crate::error::BoxError;

pub(crate) type RunFn =
    Arc<dyn Fn(Value, RunContext) -> BoxFuture<'static, Result<Value, BoxError>> + Send + Sync>;
pub(crate) type Validator = Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

/// A user workflow hosted by this process.
#[derive(Clone)]
pub struct Workflow {
    /// Stable workflow identifier advertised during registration.
    pub id: String,
    /// Human-readable workflow name.
    pub name: String,
    /// Trigger descriptor forwarded verbatim in the registration handshake.
    pub trigger: Value,
    /// Package name advertised during registration.
    pub package_name: String,
    /// Package version advertised during registration.
    pub package_version: String,
    pub(crate) validator: Validator,
    pub(crate) run_fn: RunFn,
}

impl Workflow {
    /// Create a workflow with the given id and name. Attach the run handler
    /// with [`on_event`](Self::on_event).
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            trigger: Value::Object(serde_json::Map::new()),
            package_name: env!("CARGO_PKG_NAME").to_string(),
            package_version: env!("CARGO_PKG_VERSION").to_string(),
            validator: Arc::new(|_| Ok(())),
            run_fn: Arc::new(|_, _| Box::pin(async { Ok(Value::Null) })),
        }
    }

    /// Set the trigger descriptor advertised during registration.
    pub fn with_trigger(mut self, descriptor: Value) -> Self {
        self.trigger = descriptor;
        self
    }

    /// Override the package identity advertised during registration.
    pub fn with_package(
        mut self,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        self.package_name = name.into();
        self.package_version = version.into();
        self
    }

    /// Attach the typed run handler.
    ///
    /// `T` doubles as the trigger schema: incoming events are deserialized
    /// into it before the run starts, and a mismatch becomes an
    /// `Event validation error` reported to the orchestrator.
    pub fn on_event<T, F, Fut>(mut self, handler: F) -> Self
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(T, RunContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        self.validator = Arc::new(|input: &Value| {
            serde_json::from_value::<T>(input.clone())
                .map(|_| ())
                .map_err(|e| e.to_string())
        });

        let handler = Arc::new(handler);
        self.run_fn = Arc::new(move |input, context| {
            let handler = handler.clone();
            Box::pin(async move {
                let event: T = serde_json::from_value(input)
                    .map_err(|e| Box::new(e) as BoxError)?;
                handler(event, context).await
            })
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize)]
    struct OrderPlaced {
        #[allow(dead_code)]
        n: u64,
    }

    #[test]
    fn test_defaults() {
        let workflow = Workflow::new("orders", "Order pipeline");
        assert_eq!(workflow.id, "orders");
        assert_eq!(workflow.name, "Order pipeline");
        assert_eq!(workflow.trigger, json!({}));
        assert!(!workflow.package_name.is_empty());
        // The default validator accepts anything.
        assert!((workflow.validator)(&json!("whatever")).is_ok());
    }

    #[test]
    fn test_typed_validator() {
        let workflow = Workflow::new("orders", "Order pipeline").on_event::<OrderPlaced, _, _>(
            |_event, _ctx| async { Ok(Value::Null) },
        );

        assert!((workflow.validator)(&json!({"n": 1})).is_ok());
        assert!((workflow.validator)(&json!({"n": "x"})).is_err());
    }

    #[test]
    fn test_with_package_override() {
        let workflow = Workflow::new("w", "w").with_package("my-app", "2.1.0");
        assert_eq!(workflow.package_name, "my-app");
        assert_eq!(workflow.package_version, "2.1.0");
    }
}
