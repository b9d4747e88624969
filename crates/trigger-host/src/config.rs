// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Host configuration.

use std::env;

use crate::error::{HostError, Result};

/// Default orchestrator endpoint.
pub const DEFAULT_ENDPOINT: &str = "wss://wss.trigger.dev/ws";

/// Environment variable holding the API key.
pub const API_KEY_ENV: &str = "TRIGGER_API_KEY";

/// Environment variable overriding the endpoint.
pub const ENDPOINT_ENV: &str = "TRIGGER_WSS_URL";

/// Configuration for the workflow host.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// API key (required) - presented as the bearer token on dial and in the
    /// registration handshake
    pub api_key: String,
    /// Orchestrator endpoint (default: [`DEFAULT_ENDPOINT`])
    pub endpoint: String,
    /// Stable host/session id; generated when absent
    pub host_id: Option<String>,
    /// Log level hint forwarded to run loggers (opaque to the host)
    pub log_level: Option<String>,
    /// Trigger TTL in seconds, forwarded in the registration handshake
    pub trigger_ttl: Option<u64>,
    /// Request timeout for outbound RPCs in milliseconds (default: 15_000)
    pub rpc_timeout_ms: u64,
    /// Fixed backoff for reconnects and timeout retries in milliseconds
    /// (default: 3_000)
    pub retry_backoff_ms: u64,
}

impl HostConfig {
    /// Create a configuration with the given API key and defaults for
    /// everything else.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(HostError::Config("api key must not be empty".to_string()));
        }
        Ok(Self {
            api_key,
            endpoint: env::var(ENDPOINT_ENV).unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string()),
            host_id: None,
            log_level: None,
            trigger_ttl: None,
            rpc_timeout_ms: 15_000,
            retry_backoff_ms: 3_000,
        })
    }

    /// Load configuration from environment variables.
    ///
    /// # Required Environment Variables
    /// - `TRIGGER_API_KEY` - API key for the orchestrator
    ///
    /// # Optional Environment Variables
    /// - `TRIGGER_WSS_URL` - Orchestrator endpoint (default: `wss://wss.trigger.dev/ws`)
    pub fn from_env() -> Result<Self> {
        let api_key = env::var(API_KEY_ENV)
            .map_err(|_| HostError::Config(format!("{API_KEY_ENV} is required")))?;
        Self::new(api_key)
    }

    /// Set the orchestrator endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Set the stable host/session id.
    pub fn with_host_id(mut self, host_id: impl Into<String>) -> Self {
        self.host_id = Some(host_id.into());
        self
    }

    /// Set the log level hint.
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = Some(level.into());
        self
    }

    /// Set the trigger TTL forwarded during registration.
    pub fn with_trigger_ttl(mut self, seconds: u64) -> Self {
        self.trigger_ttl = Some(seconds);
        self
    }

    /// Set the outbound RPC timeout.
    pub fn with_rpc_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.rpc_timeout_ms = timeout_ms;
        self
    }

    /// Set the fixed retry/reconnect backoff.
    pub fn with_retry_backoff_ms(mut self, backoff_ms: u64) -> Self {
        self.retry_backoff_ms = backoff_ms;
        self
    }
}
