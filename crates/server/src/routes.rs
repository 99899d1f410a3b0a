use std::convert::Infallible;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::{ACCEPT, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::Value;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

use toolrelay_common::api::{HealthResponse, SESSION_ID_HEADER};
use toolrelay_common::config::SessionMode;
use toolrelay_common::SessionId;

use crate::error::McpHttpError;
use crate::jsonrpc::{JsonRpcRequest, JsonRpcResponse};
use crate::protocol::methods;
use crate::session::SessionTransport;
use crate::AppState;

/// Keep-alive interval of the notification stream.
const KEEP_ALIVE: Duration = Duration::from_secs(15);

/// POST /mcp
pub async fn handle_post(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, McpHttpError> {
    let request = match parse_request(&body) {
        Ok(request) => request,
        Err(e) => {
            log_request(&Method::POST, &uri, &headers, None);
            return Err(e);
        }
    };
    log_request(&Method::POST, &uri, &headers, Some(&request));

    match state.mode() {
        SessionMode::Stateless => stateless_post(&state, request).await,
        SessionMode::Stateful => stateful_post(&state, &headers, request).await,
    }
}

/// GET /mcp: the session's notification stream. The session is closed when
/// the stream's connection goes away.
pub async fn handle_get(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, McpHttpError> {
    log_request(&Method::GET, &uri, &headers, None);
    let transport = require_session(&state, &headers)?;
    tracing::info!(session_id = %transport.id(), "Notification stream opened");

    let session_id = transport.id().clone();
    let guard = transport.close_on_drop();
    let stream = BroadcastStream::new(transport.subscribe())
        .filter_map(move |message| match message {
            Ok(notification) => match serde_json::to_string(&notification) {
                Ok(data) => Some(Event::default().event("message").data(data)),
                Err(e) => {
                    tracing::warn!(session_id = %session_id, error = %e, "Dropping unencodable notification");
                    None
                }
            },
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                tracing::warn!(session_id = %session_id, skipped, "Notification stream lagged");
                None
            }
        })
        .map(move |event| {
            let _ = &guard;
            Ok::<_, Infallible>(event)
        });

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE).text("keep-alive")))
}

/// DELETE /mcp: terminate the session.
pub async fn handle_delete(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
) -> Result<StatusCode, McpHttpError> {
    log_request(&Method::DELETE, &uri, &headers, None);
    let transport = require_session(&state, &headers)?;
    transport.close();
    Ok(StatusCode::OK)
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        timestamp: chrono::Utc::now(),
    })
}

/// Prometheus metrics endpoint.
pub async fn metrics(State(state): State<AppState>) -> Response {
    match state.metrics_handle() {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn stateful_post(
    state: &AppState,
    headers: &HeaderMap,
    request: JsonRpcRequest,
) -> Result<Response, McpHttpError> {
    let transport = match session_header(headers) {
        Some(id) => state.sessions().lookup(&id).ok_or_else(|| {
            tracing::warn!(session_id = %id, method = %request.method, "Unknown session");
            McpHttpError::no_session().with_id(request.id.clone())
        })?,
        None if request.method == methods::INITIALIZE => {
            let server = state.new_tool_server()?;
            state.sessions().create(server)
        }
        None => {
            tracing::warn!(method = %request.method, "Request without session id");
            return Err(McpHttpError::no_session().with_id(request.id.clone()));
        }
    };

    let id = request.id.clone();
    let response = transport
        .handle(request)
        .await
        .map_err(|e| McpHttpError::from(e).with_id(id))?;

    let mut http = rpc_response(response);
    let header = HeaderValue::from_str(transport.id().as_str()).map_err(|e| {
        tracing::error!(error = %e, "Session id is not a valid header value");
        McpHttpError::internal()
    })?;
    http.headers_mut().insert(SESSION_ID_HEADER, header);
    Ok(http)
}

/// Stateless mode: a fresh tool server for every request, no session.
async fn stateless_post(state: &AppState, request: JsonRpcRequest) -> Result<Response, McpHttpError> {
    let id = request.id.clone();
    let server = state
        .new_tool_server()
        .map_err(|e| McpHttpError::from(e).with_id(id))?;
    Ok(rpc_response(server.handle(request).await))
}

fn rpc_response(response: Option<JsonRpcResponse>) -> Response {
    match response {
        Some(body) => Json(body).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

fn parse_request(body: &[u8]) -> Result<JsonRpcRequest, McpHttpError> {
    let value: Value = serde_json::from_slice(body).map_err(McpHttpError::parse_error)?;
    let id = value.get("id").cloned();
    serde_json::from_value(value).map_err(|e| McpHttpError::invalid_request(e).with_id(id))
}

/// GET and DELETE need a live session, and a session-ful server.
fn require_session(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<std::sync::Arc<SessionTransport>, McpHttpError> {
    if state.mode() == SessionMode::Stateless {
        return Err(McpHttpError::method_not_allowed());
    }
    session_header(headers)
        .and_then(|id| state.sessions().lookup(&id))
        .ok_or_else(McpHttpError::no_session)
}

fn session_header(headers: &HeaderMap) -> Option<SessionId> {
    headers
        .get(SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(SessionId::from)
}

fn log_request(method: &Method, uri: &Uri, headers: &HeaderMap, rpc: Option<&JsonRpcRequest>) {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-")
            .to_string()
    };
    tracing::info!(
        http_method = %method,
        path = %uri.path(),
        session_id = %header(SESSION_ID_HEADER),
        accept = %header(ACCEPT.as_str()),
        content_type = %header(CONTENT_TYPE.as_str()),
        rpc_method = rpc.map(|r| r.method.as_str()).unwrap_or("-"),
        rpc_id = %rpc.and_then(|r| r.id.as_ref()).map(serde_json::Value::to_string).unwrap_or_else(|| "-".into()),
        "MCP request"
    );
}
