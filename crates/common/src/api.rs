//! HTTP surface shared by the tool server and its clients. Protocol payloads
//! themselves are `rmcp::model` types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Header carrying the session id on requests and on the `initialize` response.
pub const SESSION_ID_HEADER: &str = "mcp-session-id";

/// GET /health response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
}
