//! JSON-RPC envelopes as they arrive on `/mcp`.
//!
//! Payloads inside the envelope are `rmcp::model` types. The envelope itself
//! stays loose so that rejections can echo whatever id the client sent,
//! including `null`, which `rmcp::model::RequestId` cannot represent.

use rmcp::model::{ErrorCode, ErrorData};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// Error codes beyond the standard JSON-RPC set in [`ErrorCode`].
pub mod codes {
    use rmcp::model::ErrorCode;

    /// Missing/unknown session id, or HTTP method not allowed.
    pub const SESSION_ERROR: ErrorCode = ErrorCode(-32000);
    /// Unknown tool or resource.
    pub const NOT_FOUND: ErrorCode = ErrorCode(-32004);
}

/// A JSON-RPC request. Without an `id` member it is a notification; an
/// explicit `"id": null` still asks for a response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// Maps a present member to `Some`, `null` included. Absent members take the
/// field default.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<Value>, method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id: Some(id.into()),
            method: method.into(),
            params,
        }
    }

    pub fn notification(method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id: None,
            method: method.into(),
            params,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// A JSON-RPC response: exactly one of `result` / `error` is set.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorData>,
    #[serde(default)]
    pub id: Value,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn failure(id: Value, error: ErrorData) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            result: None,
            error: Some(error),
            id,
        }
    }

    /// Collapse the envelope into its result or its error.
    pub fn into_result(self) -> Result<Value, ErrorData> {
        match (self.error, self.result) {
            (Some(error), _) => Err(error),
            (None, Some(result)) => Ok(result),
            (None, None) => Err(ErrorData::new(
                ErrorCode::INTERNAL_ERROR,
                "Response carries neither result nor error",
                None,
            )),
        }
    }
}
