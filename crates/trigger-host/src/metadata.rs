// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Registration metadata: forwarded environment, package metadata and the
//! optional git probe.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use tracing::debug;
use trigger_protocol::methods::{GitMetadata, HostMetadata};

use crate::config::API_KEY_ENV;

/// Environment prefix forwarded to the orchestrator.
const FORWARD_PREFIX: &str = "TRIGGER_";

/// Variable naming a package manifest file with a `triggerdotdev` section.
const MANIFEST_ENV: &str = "npm_package_json";

/// Prefix of flattened package metadata entries.
const PACKAGE_PREFIX: &str = "npm_package_triggerdotdev_";

/// Probe for repository metadata attached to the registration handshake.
///
/// Probing is an optional external concern; the default implementation
/// reports nothing.
pub trait MetadataProbe: Send + Sync {
    fn git(&self) -> Option<GitMetadata> {
        None
    }
}

/// Probe that reports no metadata.
pub struct NoProbe;

impl MetadataProbe for NoProbe {}

/// Collect the environment entries forwarded during registration: every
/// `TRIGGER_*` variable except the API key, with the prefix stripped.
pub fn filtered_env(
    vars: impl IntoIterator<Item = (String, String)>,
) -> BTreeMap<String, String> {
    vars.into_iter()
        .filter(|(name, _)| name.starts_with(FORWARD_PREFIX) && name != API_KEY_ENV)
        .map(|(name, value)| (name[FORWARD_PREFIX.len()..].to_string(), value))
        .collect()
}

/// Project package metadata out of the environment.
///
/// Prefers the `triggerdotdev` section of the manifest named by
/// `npm_package_json`; falls back to a flattened object built from
/// `npm_package_triggerdotdev_*` entries. Returns an empty object when
/// neither source yields anything.
pub fn package_metadata(vars: impl IntoIterator<Item = (String, String)>) -> Value {
    let mut manifest_path = None;
    let mut flattened = Map::new();

    for (name, value) in vars {
        if name == MANIFEST_ENV {
            manifest_path = Some(value);
        } else if let Some(rest) = name.strip_prefix(PACKAGE_PREFIX) {
            flattened.insert(rest.to_string(), Value::String(value));
        }
    }

    if let Some(path) = manifest_path
        && let Some(section) = manifest_section(&path)
    {
        return section;
    }

    Value::Object(flattened)
}

fn manifest_section(path: &str) -> Option<Value> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            debug!(path, error = %e, "package manifest unreadable");
            return None;
        }
    };
    let manifest: Value = match serde_json::from_str(&contents) {
        Ok(manifest) => manifest,
        Err(e) => {
            debug!(path, error = %e, "package manifest is not valid JSON");
            return None;
        }
    };
    manifest.get("triggerdotdev").cloned()
}

/// Build the metadata envelope for the registration handshake from the
/// current process environment and the given probe.
pub fn collect(probe: &dyn MetadataProbe) -> HostMetadata {
    HostMetadata {
        git: probe.git(),
        package_metadata: package_metadata(std::env::vars()),
        env: filtered_env(std::env::vars()),
    }
}
