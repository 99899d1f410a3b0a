//! Client side of the tool server transport, on rmcp's streamable HTTP client.
//!
//! Each invocation opens its own session, makes one `tools/call`, and cancels
//! the session again before returning, whatever the outcome.

use std::future::Future;
use std::time::{Duration, Instant};

use rmcp::model::{
    CallToolRequestParams, CallToolResult, ClientCapabilities, ClientInfo, Implementation, Tool,
};
use rmcp::service::RunningService;
use rmcp::transport::StreamableHttpClientTransport;
use rmcp::{RoleClient, ServiceError, ServiceExt};

use toolrelay_common::config::RemoteConfig;
use toolrelay_common::{ToolRelayError, ValidatedInput, ValidatedOutput};
use toolrelay_tools::RegisteredTool;

/// Errors talking to a remote tool server.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("Connection to {url} failed: {message}")]
    Connection { url: String, message: String },

    #[error("Tool server error {code}: {message}")]
    Rpc { code: i32, message: String },

    #[error("Tool server did not answer within {0:?}")]
    Timeout(Duration),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl From<ServiceError> for RemoteError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::McpError(error) => RemoteError::Rpc {
                code: error.code.0,
                message: error.message.to_string(),
            },
            other => RemoteError::Protocol(other.to_string()),
        }
    }
}

impl From<RemoteError> for ToolRelayError {
    fn from(e: RemoteError) -> Self {
        ToolRelayError::Transport(e.to_string())
    }
}

/// Invokes tools on a remote tool server.
#[derive(Clone, Debug)]
pub struct RemoteToolClient {
    endpoint: String,
    timeout: Duration,
    client_info: ClientInfo,
}

impl RemoteToolClient {
    pub fn new(config: &RemoteConfig) -> Result<Self, RemoteError> {
        reqwest::Url::parse(&config.url).map_err(|e| RemoteError::Connection {
            url: config.url.clone(),
            message: e.to_string(),
        })?;

        let client_info = ClientInfo {
            meta: None,
            protocol_version: Default::default(),
            capabilities: ClientCapabilities::default(),
            client_info: Implementation {
                name: config.client_name.clone(),
                title: None,
                version: env!("CARGO_PKG_VERSION").to_string(),
                website_url: None,
                icons: None,
            },
        };

        Ok(Self {
            endpoint: config.url.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            client_info,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Run one tool call remotely and validate the structured result against
    /// the tool's local output contract.
    pub async fn invoke(
        &self,
        tool: &RegisteredTool,
        input: &ValidatedInput,
    ) -> Result<ValidatedOutput, ToolRelayError> {
        let name = tool.name().to_string();
        let start = Instant::now();
        tracing::info!(tool = %name, endpoint = %self.endpoint, "Remote tool call started");

        let result = self.call_once(&name, input).await;

        let latency = start.elapsed().as_secs_f64();
        metrics::histogram!("tools.execution.latency", "tool" => name.clone()).record(latency);
        metrics::counter!("tools.execution.count", "tool" => name.clone()).increment(1);

        let outcome = result.map_err(ToolRelayError::from).and_then(|result| {
            if result.is_error == Some(true) {
                return Err(ToolRelayError::ToolExecution {
                    tool: name.clone(),
                    message: text_content(&result),
                });
            }
            let structured = result
                .structured_content
                .ok_or_else(|| ToolRelayError::MissingStructuredContent { tool: name.clone() })?;
            tool.parse_output(&structured)
        });

        match &outcome {
            Ok(_) => tracing::info!(tool = %name, latency_s = latency, "Remote tool call succeeded"),
            Err(e) => {
                metrics::counter!("tools.execution.errors", "tool" => name.clone()).increment(1);
                tracing::warn!(tool = %name, latency_s = latency, error = %e, "Remote tool call failed");
            }
        }
        outcome
    }

    async fn call_once(
        &self,
        name: &str,
        input: &ValidatedInput,
    ) -> Result<CallToolResult, RemoteError> {
        let session = self.connect().await?;
        let result = session.call_tool(name, input).await;
        session.close().await;
        result
    }

    /// Open a session: `initialize`, then `notifications/initialized`.
    pub async fn connect(&self) -> Result<RemoteSession, RemoteError> {
        let transport = StreamableHttpClientTransport::from_uri(self.endpoint.as_str());
        let service = within(self.timeout, self.client_info.clone().serve(transport))
            .await?
            .map_err(|e| RemoteError::Connection {
                url: self.endpoint.clone(),
                message: e.to_string(),
            })?;

        let session = RemoteSession {
            service,
            endpoint: self.endpoint.clone(),
            timeout: self.timeout,
        };
        tracing::info!(
            endpoint = %self.endpoint,
            server = session.server_info().map(|info| info.name.as_str()).unwrap_or("-"),
            "Remote session opened"
        );
        Ok(session)
    }
}

/// An open session on the tool server. Consumed by [`RemoteSession::close`].
pub struct RemoteSession {
    service: RunningService<RoleClient, ClientInfo>,
    endpoint: String,
    timeout: Duration,
}

impl RemoteSession {
    pub fn server_info(&self) -> Option<&Implementation> {
        self.service.peer_info().map(|info| &info.server_info)
    }

    pub async fn list_tools(&self) -> Result<Vec<Tool>, RemoteError> {
        let result = within(self.timeout, self.service.list_tools(Default::default())).await??;
        Ok(result.tools)
    }

    pub async fn call_tool(
        &self,
        name: &str,
        arguments: &ValidatedInput,
    ) -> Result<CallToolResult, RemoteError> {
        let params = CallToolRequestParams {
            meta: None,
            name: name.to_owned().into(),
            arguments: arguments.to_value().as_object().cloned(),
            task: None,
        };
        Ok(within(self.timeout, self.service.call_tool(params)).await??)
    }

    /// Terminate the session. Failures are logged, never returned.
    pub async fn close(self) {
        match self.service.cancel().await {
            Ok(reason) => {
                tracing::info!(endpoint = %self.endpoint, reason = ?reason, "Remote session closed");
            }
            Err(e) => {
                tracing::warn!(endpoint = %self.endpoint, error = %e, "Failed to close remote session");
            }
        }
    }
}

async fn within<F: Future>(limit: Duration, future: F) -> Result<F::Output, RemoteError> {
    tokio::time::timeout(limit, future)
        .await
        .map_err(|_| RemoteError::Timeout(limit))
}

/// Text items of a tool result, newline-joined. Other content kinds are skipped.
fn text_content(result: &CallToolResult) -> String {
    result
        .content
        .iter()
        .filter_map(|item| item.raw.as_text())
        .map(|text| text.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmcp::model::{ErrorCode, ErrorData};
    use serde_json::json;

    #[test]
    fn test_mixed_content_result_decodes() {
        let result: CallToolResult = serde_json::from_value(json!({
            "content": [
                {"type": "text", "text": "8"},
                {"type": "image", "data": "AAAA", "mimeType": "image/png"}
            ],
            "structuredContent": {"input": {"a": 3, "b": 5}, "output": 8}
        }))
        .unwrap();

        assert_eq!(text_content(&result), "8");
        assert_eq!(result.structured_content.unwrap()["output"], 8);
    }

    #[test]
    fn test_server_error_keeps_code_and_message() {
        let err = RemoteError::from(ServiceError::McpError(ErrorData::new(
            ErrorCode(-32004),
            "Tool not found: no_such_tool",
            None,
        )));
        assert!(matches!(err, RemoteError::Rpc { code: -32004, .. }));

        match ToolRelayError::from(err) {
            ToolRelayError::Transport(message) => {
                assert!(message.contains("-32004"));
                assert!(message.contains("no_such_tool"));
            }
            other => panic!("Expected Transport, got {:?}", other),
        }
    }

    #[test]
    fn test_bad_endpoint_is_rejected_up_front() {
        let err = RemoteToolClient::new(&RemoteConfig {
            url: "not a url".into(),
            ..RemoteConfig::default()
        })
        .unwrap_err();
        assert!(matches!(err, RemoteError::Connection { .. }));
    }

    #[tokio::test]
    async fn test_connection_failure_surfaces_as_is() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = RemoteToolClient::new(&RemoteConfig {
            url: format!("http://{}/mcp", addr),
            timeout_secs: 2,
            ..RemoteConfig::default()
        })
        .unwrap();

        let err = client.connect().await.err().unwrap();
        assert!(matches!(err, RemoteError::Connection { .. }));
    }
}
