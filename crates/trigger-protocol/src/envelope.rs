// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wire format for message framing.
//!
//! Every frame on the socket is a single JSON document, tagged by `kind`:
//! - `{"kind":"request","id":...,"method":...,"payload":...}`
//! - `{"kind":"response","id":...,"ok":true,"value":...}`
//! - `{"kind":"response","id":...,"ok":false,"error":...}`
//!
//! Message boundaries are provided by the underlying transport; this module
//! only encodes and decodes the JSON envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Maximum frame size (4 MB).
pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// Errors that can occur during frame encoding/decoding
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame too large: {0} bytes (max: {MAX_FRAME_SIZE})")]
    FrameTooLarge(usize),

    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// A framed message: either a correlated request or its response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Envelope {
    Request {
        id: String,
        method: String,
        payload: Value,
    },
    Response {
        id: String,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl Envelope {
    /// Create a success response for the given request id.
    pub fn ok(id: impl Into<String>, value: Value) -> Self {
        Envelope::Response {
            id: id.into(),
            ok: true,
            value: Some(value),
            error: None,
        }
    }

    /// Create an error response for the given request id.
    pub fn err(id: impl Into<String>, error: impl Into<String>) -> Self {
        Envelope::Response {
            id: id.into(),
            ok: false,
            value: None,
            error: Some(error.into()),
        }
    }

    /// Encode the envelope to a text frame.
    pub fn encode(&self) -> Result<String, FrameError> {
        let text = serde_json::to_string(self)?;
        if text.len() > MAX_FRAME_SIZE {
            return Err(FrameError::FrameTooLarge(text.len()));
        }
        Ok(text)
    }

    /// Decode an envelope from a text frame.
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        if text.len() > MAX_FRAME_SIZE {
            return Err(FrameError::FrameTooLarge(text.len()));
        }
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_round_trip() {
        let envelope = Envelope::Request {
            id: "abc".to_string(),
            method: "SEND_FETCH".to_string(),
            payload: json!({"runId": "r1", "key": "f1"}),
        };

        let encoded = envelope.encode().unwrap();
        let decoded = Envelope::decode(&encoded).unwrap();
        assert_eq!(envelope, decoded);
    }

    #[test]
    fn test_response_round_trip() {
        let envelope = Envelope::ok("abc", json!(true));
        let encoded = envelope.encode().unwrap();
        assert_eq!(Envelope::decode(&encoded).unwrap(), envelope);

        let envelope = Envelope::err("abc", "boom");
        let encoded = envelope.encode().unwrap();
        assert_eq!(Envelope::decode(&encoded).unwrap(), envelope);
    }

    #[test]
    fn test_request_wire_shape() {
        let envelope = Envelope::Request {
            id: "1".to_string(),
            method: "SEND_LOG".to_string(),
            payload: json!({}),
        };
        let value: Value = serde_json::from_str(&envelope.encode().unwrap()).unwrap();
        assert_eq!(value["kind"], "request");
        assert_eq!(value["method"], "SEND_LOG");
    }

    #[test]
    fn test_response_omits_absent_fields() {
        let encoded = Envelope::ok("1", json!(true)).encode().unwrap();
        let value: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value["kind"], "response");
        assert!(value.get("error").is_none());

        let encoded = Envelope::err("1", "nope").encode().unwrap();
        let value: Value = serde_json::from_str(&encoded).unwrap();
        assert!(value.get("value").is_none());
        assert_eq!(value["error"], "nope");
    }

    #[test]
    fn test_decode_malformed() {
        assert!(matches!(
            Envelope::decode("not json"),
            Err(FrameError::Malformed(_))
        ));
        assert!(matches!(
            Envelope::decode(r#"{"kind":"banana"}"#),
            Err(FrameError::Malformed(_))
        ));
    }

    #[test]
    fn test_encode_oversize() {
        let envelope = Envelope::Request {
            id: "1".to_string(),
            method: "SEND_EVENT".to_string(),
            payload: Value::String("x".repeat(MAX_FRAME_SIZE)),
        };
        assert!(matches!(
            envelope.encode(),
            Err(FrameError::FrameTooLarge(_))
        ));
    }
}
