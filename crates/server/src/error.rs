use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rmcp::model::{ErrorCode, ErrorData};
use serde_json::Value;

use toolrelay_common::ToolRelayError;

use crate::jsonrpc::{codes, JsonRpcResponse};

/// An HTTP-level rejection, sent as a JSON-RPC error envelope.
#[derive(Debug)]
pub struct McpHttpError {
    status: StatusCode,
    error: ErrorData,
    id: Value,
}

impl McpHttpError {
    pub fn new(status: StatusCode, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status,
            error: ErrorData::new(code, message.into(), None),
            id: Value::Null,
        }
    }

    /// Missing or unknown session id on a request that needs one.
    pub fn no_session() -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            codes::SESSION_ERROR,
            "Bad Request: No valid session ID provided",
        )
    }

    pub fn method_not_allowed() -> Self {
        Self::new(
            StatusCode::METHOD_NOT_ALLOWED,
            codes::SESSION_ERROR,
            "Method not allowed.",
        )
    }

    pub fn parse_error(detail: impl std::fmt::Display) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            ErrorCode::PARSE_ERROR,
            format!("Parse error: {}", detail),
        )
    }

    pub fn invalid_request(detail: impl std::fmt::Display) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            ErrorCode::INVALID_REQUEST,
            format!("Invalid Request: {}", detail),
        )
    }

    pub fn internal() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::INTERNAL_ERROR,
            "Internal server error",
        )
    }

    /// Echo the request id in the envelope.
    pub fn with_id(mut self, id: Option<Value>) -> Self {
        self.id = id.unwrap_or(Value::Null);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<ToolRelayError> for McpHttpError {
    fn from(e: ToolRelayError) -> Self {
        match e {
            ToolRelayError::SessionNotFound(_) => Self::no_session(),
            other => {
                tracing::error!(error = %other, "Error handling tool request");
                Self::internal()
            }
        }
    }
}

impl IntoResponse for McpHttpError {
    fn into_response(self) -> Response {
        metrics::counter!("mcp.requests.rejected", "status" => self.status.as_u16().to_string())
            .increment(1);
        let body = JsonRpcResponse::failure(self.id, self.error);
        (self.status, Json(body)).into_response()
    }
}
