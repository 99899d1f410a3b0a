//! Session-oriented tool server.
//!
//! A single logical endpoint (`/mcp`, trailing slash equivalent) speaks
//! JSON-RPC over POST; in stateful mode GET opens a session's notification
//! stream and DELETE ends the session. MCP payloads are `rmcp::model` types.

pub mod error;
pub mod jsonrpc;
pub mod protocol;
pub mod routes;
pub mod session;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;

use toolrelay_common::config::{ServerConfig, SessionMode};
use toolrelay_common::ToolRelayError;
use toolrelay_tools::ToolHandlerContext;

pub use error::McpHttpError;
pub use protocol::ToolServer;
pub use session::{CloseOnDrop, SessionStore, SessionTransport};

/// Builds a fresh tool server: one per session, or one per request when stateless.
pub type ToolServerFactory = Arc<dyn Fn() -> Result<ToolServer, ToolRelayError> + Send + Sync>;

/// Shared application state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    mode: SessionMode,
    sessions: Arc<SessionStore>,
    factory: ToolServerFactory,
    metrics_handle: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(mode: SessionMode, factory: ToolServerFactory) -> Self {
        Self {
            mode,
            sessions: SessionStore::new(),
            factory,
            metrics_handle: None,
        }
    }

    /// State serving the built-in tools with the given server config.
    pub fn builtin(config: &ServerConfig) -> Self {
        let context = ToolHandlerContext::from_config(config);
        tracing::info!(notes_dir = %context.notes_dir.display(), mode = ?config.mode, "Tool server configured");
        Self::new(
            config.mode,
            Arc::new(move || ToolServer::builtin(context.clone())),
        )
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn metrics_handle(&self) -> Option<&PrometheusHandle> {
        self.metrics_handle.as_ref()
    }

    pub fn new_tool_server(&self) -> Result<ToolServer, ToolRelayError> {
        (self.factory)()
    }
}

/// Build the HTTP router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/mcp",
            post(routes::handle_post)
                .get(routes::handle_get)
                .delete(routes::handle_delete),
        )
        .route(
            "/mcp/",
            post(routes::handle_post)
                .get(routes::handle_get)
                .delete(routes::handle_delete),
        )
        .route("/health", get(routes::health))
        .route("/metrics", get(routes::metrics))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use axum::response::Response;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use rmcp::model::ErrorCode;

    use toolrelay_common::api::{HealthResponse, SESSION_ID_HEADER};

    use crate::jsonrpc::codes;

    fn state(mode: SessionMode) -> AppState {
        AppState::builtin(&ServerConfig {
            mode,
            notes_dir: Some(std::env::temp_dir()),
            ..ServerConfig::default()
        })
    }

    fn rpc(id: i64, method: &str, params: Value) -> Value {
        json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params})
    }

    fn initialize() -> Value {
        rpc(
            0,
            "initialize",
            json!({
                "protocolVersion": "2025-06-18",
                "capabilities": {},
                "clientInfo": {"name": "test", "version": "0"}
            }),
        )
    }

    async fn post(state: &AppState, path: &str, session: Option<&str>, body: Value) -> Response {
        let mut builder = Request::post(path)
            .header("content-type", "application/json")
            .header("accept", "application/json, text/event-stream");
        if let Some(id) = session {
            builder = builder.header(SESSION_ID_HEADER, id);
        }
        let request = builder.body(Body::from(body.to_string())).unwrap();
        router(state.clone()).oneshot(request).await.unwrap()
    }

    async fn send(state: &AppState, method: &str, session: Option<&str>) -> Response {
        let mut builder = Request::builder().method(method).uri("/mcp");
        if let Some(id) = session {
            builder = builder.header(SESSION_ID_HEADER, id);
        }
        router(state.clone())
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn session_id(response: &Response) -> String {
        response
            .headers()
            .get(SESSION_ID_HEADER)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string()
    }

    async fn open_session(state: &AppState) -> String {
        let response = post(state, "/mcp", None, initialize()).await;
        assert_eq!(response.status(), StatusCode::OK);
        session_id(&response)
    }

    #[tokio::test]
    async fn test_initialize_mints_session() {
        let state = state(SessionMode::Stateful);
        let response = post(&state, "/mcp", None, initialize()).await;

        assert_eq!(response.status(), StatusCode::OK);
        let id = session_id(&response);
        assert!(!id.is_empty());

        let body = json_body(response).await;
        assert_eq!(body["id"], 0);
        assert_eq!(body["result"]["serverInfo"]["name"], "toolrelay-server");
        assert_eq!(body["result"]["protocolVersion"], "2025-06-18");
        assert_eq!(state.sessions().len(), 1);
    }

    #[tokio::test]
    async fn test_session_is_reused() {
        let state = state(SessionMode::Stateful);
        let id = open_session(&state).await;

        let response = post(&state, "/mcp", Some(&id), rpc(1, "tools/list", json!({}))).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(session_id(&response), id);

        let body = json_body(response).await;
        assert_eq!(body["result"]["tools"][0]["name"], "add_numbers");
        assert!(body["result"]["tools"][0]["outputSchema"].is_object());
        assert_eq!(state.sessions().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_session_is_rejected() {
        let state = state(SessionMode::Stateful);
        let response = post(&state, "/mcp", Some("no-such-session"), rpc(4, "tools/list", json!({}))).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], codes::SESSION_ERROR.0);
        assert_eq!(body["id"], 4);
        assert!(state.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_missing_session_is_rejected_without_creating_one() {
        let state = state(SessionMode::Stateful);
        let response = post(&state, "/mcp", None, rpc(1, "tools/call", json!({"name": "add_numbers"}))).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], codes::SESSION_ERROR.0);
        assert_eq!(body["error"]["message"], "Bad Request: No valid session ID provided");
        assert!(state.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_initialize_with_unknown_session_is_rejected() {
        let state = state(SessionMode::Stateful);
        let response = post(&state, "/mcp", Some("stale"), initialize()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(state.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_delete_closes_session_for_good() {
        let state = state(SessionMode::Stateful);
        let id = open_session(&state).await;

        let response = send(&state, "DELETE", Some(&id)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(state.sessions().is_empty());

        let response = post(&state, "/mcp", Some(&id), rpc(2, "ping", json!({}))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"]["code"], codes::SESSION_ERROR.0);

        let response = send(&state, "DELETE", Some(&id)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_notification_is_accepted() {
        let state = state(SessionMode::Stateful);
        let id = open_session(&state).await;

        let notification = json!({"jsonrpc": "2.0", "method": "notifications/initialized"});
        let response = post(&state, "/mcp", Some(&id), notification).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_trailing_slash_is_equivalent() {
        let state = state(SessionMode::Stateful);
        let response = post(&state, "/mcp/", None, initialize()).await;
        assert_eq!(response.status(), StatusCode::OK);
        let id = session_id(&response);

        let call = rpc(
            1,
            "tools/call",
            json!({"name": "add_numbers", "arguments": {"a": 3, "b": 5}}),
        );
        let response = post(&state, "/mcp", Some(&id), call).await;
        let body = json_body(response).await;
        assert_eq!(
            body["result"]["structuredContent"],
            json!({"input": {"a": 3, "b": 5}, "output": 8})
        );
        assert_eq!(body["result"]["content"][0]["type"], "text");
    }

    #[tokio::test]
    async fn test_get_requires_session() {
        let state = state(SessionMode::Stateful);
        let response = send(&state, "GET", None).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let id = open_session(&state).await;
        let response = send(&state, "GET", Some(&id)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "text/event-stream"
        );
    }

    #[tokio::test]
    async fn test_dropped_event_stream_ends_session() {
        let state = state(SessionMode::Stateful);
        let id = open_session(&state).await;

        let stream = send(&state, "GET", Some(&id)).await;
        assert_eq!(stream.status(), StatusCode::OK);
        assert_eq!(state.sessions().len(), 1);

        drop(stream);
        assert!(state.sessions().is_empty());

        let response = post(&state, "/mcp", Some(&id), rpc(1, "ping", json!({}))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_null_id_is_answered_not_accepted() {
        let state = state(SessionMode::Stateful);
        let id = open_session(&state).await;

        let request = json!({"jsonrpc": "2.0", "id": null, "method": "tools/list"});
        let response = post(&state, "/mcp", Some(&id), request).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert!(body.get("id").is_some_and(Value::is_null));
        assert_eq!(body["result"]["tools"][0]["name"], "add_numbers");
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let state = state(SessionMode::Stateful);
        let request = Request::post("/mcp")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = router(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"]["code"], ErrorCode::PARSE_ERROR.0);
    }

    #[tokio::test]
    async fn test_stateless_mode() {
        let state = state(SessionMode::Stateless);
        let call = rpc(
            7,
            "tools/call",
            json!({"name": "add_numbers", "arguments": {"a": "2", "b": "2"}}),
        );
        let response = post(&state, "/mcp", None, call).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(SESSION_ID_HEADER).is_none());
        assert_eq!(json_body(response).await["result"]["structuredContent"]["output"], 4);

        for method in ["GET", "DELETE"] {
            let response = send(&state, method, Some("anything")).await;
            assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
            assert_eq!(json_body(response).await["error"]["code"], codes::SESSION_ERROR.0);
        }
        assert!(state.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_health_is_independent_of_sessions() {
        let state = state(SessionMode::Stateful);
        let _ = open_session(&state).await;

        let request = Request::get("/health").body(Body::empty()).unwrap();
        let response = router(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let health: HealthResponse = serde_json::from_value(json_body(response).await).unwrap();
        assert_eq!(health.status, "ok");
    }
}
