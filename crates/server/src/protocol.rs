//! JSON-RPC method handling for one tool server instance.

use std::sync::Arc;

use rmcp::model::{
    AnnotateAble, CallToolRequestParams, CallToolResult, Content, ErrorCode, ErrorData,
    Implementation, InitializeResult, JsonObject, ListResourcesResult, ListToolsResult,
    LoggingLevel, ProtocolVersion, RawResource, ResourceContents, ServerCapabilities, Tool,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::broadcast;

use toolrelay_common::{ToolRelayError, ValidatedOutput};
use toolrelay_tools::{builtin_registry, ToolHandlerContext, ToolRegistry};

use crate::jsonrpc::{codes, JsonRpcRequest, JsonRpcResponse};

pub const SERVER_NAME: &str = "toolrelay-server";

/// JSON-RPC method names.
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "notifications/initialized";
    pub const PING: &str = "ping";
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";
    pub const RESOURCES_LIST: &str = "resources/list";
    pub const RESOURCES_READ: &str = "resources/read";
    pub const LOG_MESSAGE: &str = "notifications/message";
}

const HELLO_URI: &str = "local://hello";
const HELLO_TEXT: &str = "hello world";

/// Serves the tool protocol over a [`ToolRegistry`].
///
/// In stateful mode each session gets its own instance, connected to the
/// session's notification channel before the first request is handled.
pub struct ToolServer {
    registry: ToolRegistry,
    info: Implementation,
    notifier: Option<broadcast::Sender<JsonRpcRequest>>,
}

impl ToolServer {
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            registry,
            info: Implementation {
                name: SERVER_NAME.to_string(),
                title: Some("toolrelay".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                website_url: None,
                icons: None,
            },
            notifier: None,
        }
    }

    /// A server offering the built-in tools.
    pub fn builtin(context: ToolHandlerContext) -> Result<Self, ToolRelayError> {
        Ok(Self::new(builtin_registry(context)?))
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Route server-initiated notifications into `notifier`.
    pub fn connect(&mut self, notifier: broadcast::Sender<JsonRpcRequest>) {
        self.notifier = Some(notifier);
    }

    pub fn is_connected(&self) -> bool {
        self.notifier.is_some()
    }

    /// Handle one message. Notifications produce no response.
    pub async fn handle(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        if request.is_notification() {
            tracing::debug!(method = %request.method, "Notification received");
            return None;
        }

        let id = request.id.clone().unwrap_or(Value::Null);
        let result = self.dispatch(&request.method, request.params).await;
        Some(match result {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(error) => {
                tracing::warn!(method = %request.method, code = error.code.0, error = %error.message, "Request failed");
                JsonRpcResponse::failure(id, error)
            }
        })
    }

    async fn dispatch(&self, method: &str, params: Option<Value>) -> Result<Value, ErrorData> {
        match method {
            methods::INITIALIZE => to_result(self.initialize(params.as_ref())),
            methods::PING => Ok(json!({})),
            methods::TOOLS_LIST => to_result(self.list_tools()),
            methods::TOOLS_CALL => {
                let params: CallToolRequestParams = parse_params(params)?;
                to_result(self.call_tool(params).await?)
            }
            methods::RESOURCES_LIST => to_result(list_resources()),
            methods::RESOURCES_READ => {
                let uri = params
                    .as_ref()
                    .and_then(|p| p.get("uri"))
                    .and_then(Value::as_str)
                    .ok_or_else(|| ErrorData::invalid_params("Missing resource uri", None))?;
                read_resource(uri)
            }
            other => Err(ErrorData::new(
                ErrorCode::METHOD_NOT_FOUND,
                format!("Method not found: {}", other),
                None,
            )),
        }
    }

    /// Answers with the client's protocol revision when it names one.
    fn initialize(&self, params: Option<&Value>) -> InitializeResult {
        let protocol_version = params
            .and_then(|p| p.get("protocolVersion"))
            .and_then(|v| serde_json::from_value::<ProtocolVersion>(v.clone()).ok())
            .unwrap_or(ProtocolVersion::V_2025_06_18);
        InitializeResult {
            protocol_version,
            capabilities: ServerCapabilities::builder()
                .enable_logging()
                .enable_resources()
                .enable_tools()
                .build(),
            server_info: self.info.clone(),
            instructions: None,
        }
    }

    fn list_tools(&self) -> ListToolsResult {
        let tools = self
            .registry
            .tools()
            .map(|tool| {
                let descriptor = tool.descriptor();
                let mut listed = Tool::new(
                    descriptor.name.clone(),
                    descriptor.description.clone(),
                    schema_object(descriptor.contract.input.describe()),
                );
                listed.title = descriptor.title.clone();
                listed.output_schema =
                    Some(Arc::new(schema_object(descriptor.contract.output.describe())));
                listed
            })
            .collect();
        ListToolsResult::with_all_items(tools)
    }

    async fn call_tool(&self, params: CallToolRequestParams) -> Result<CallToolResult, ErrorData> {
        let tool = self.registry.lookup(&params.name).ok_or_else(|| {
            ErrorData::new(
                codes::NOT_FOUND,
                format!("Tool not found: {}", params.name),
                None,
            )
        })?;

        let arguments = Value::Object(params.arguments.unwrap_or_default());
        let input = tool.parse_input(&arguments).map_err(invalid_params)?;

        match self.registry.execute(tool.name(), input).await {
            Ok(output) => {
                tool.store_output(output.clone());
                self.notify_tool_result(tool.name(), &output);
                Ok(CallToolResult::structured(output.to_value()))
            }
            Err(ToolRelayError::ToolExecution { message, .. }) => {
                Ok(CallToolResult::error(vec![Content::text(message)]))
            }
            Err(e) => Err(ErrorData::internal_error(e.to_string(), None)),
        }
    }

    fn notify_tool_result(&self, tool: &str, output: &ValidatedOutput) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        let params = json!({
            "level": LoggingLevel::Info,
            "logger": SERVER_NAME,
            "data": {"tool": tool, "output": output},
        });
        let notification = JsonRpcRequest::notification(methods::LOG_MESSAGE, Some(params));
        // No subscribers is normal: nobody has the event stream open.
        let _ = notifier.send(notification);
    }
}

fn schema_object(schema: Value) -> JsonObject {
    match schema {
        Value::Object(map) => map,
        _ => JsonObject::new(),
    }
}

fn list_resources() -> ListResourcesResult {
    let mut hello = RawResource::new(HELLO_URI, "hello");
    hello.description = Some("A static greeting".to_string());
    hello.mime_type = Some("text/plain".to_string());
    ListResourcesResult::with_all_items(vec![hello.no_annotation()])
}

fn read_resource(uri: &str) -> Result<Value, ErrorData> {
    if uri != HELLO_URI {
        return Err(ErrorData::new(
            codes::NOT_FOUND,
            format!("Resource not found: {}", uri),
            None,
        ));
    }
    Ok(json!({ "contents": [ResourceContents::text(HELLO_TEXT, uri)] }))
}

fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, ErrorData> {
    let params = params.ok_or_else(|| ErrorData::invalid_params("Missing params", None))?;
    serde_json::from_value(params)
        .map_err(|e| ErrorData::invalid_params(format!("Invalid params: {}", e), None))
}

fn invalid_params(e: ToolRelayError) -> ErrorData {
    let data = match &e {
        ToolRelayError::InvalidToolInput { source, .. } => {
            let issues: Vec<Value> = source
                .issues()
                .iter()
                .map(|issue| json!({"path": issue.path, "message": issue.message}))
                .collect();
            Some(json!({ "issues": issues }))
        }
        _ => None,
    };
    ErrorData::invalid_params(e.to_string(), data)
}

fn to_result<T: serde::Serialize>(value: T) -> Result<Value, ErrorData> {
    serde_json::to_value(value).map_err(|e| ErrorData::internal_error(e.to_string(), None))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> ToolServer {
        ToolServer::builtin(ToolHandlerContext::new(std::env::temp_dir())).unwrap()
    }

    async fn call(server: &ToolServer, method: &str, params: Value) -> JsonRpcResponse {
        server
            .handle(JsonRpcRequest::new(1, method, Some(params)))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_notifications_get_no_response() {
        let request = JsonRpcRequest::notification(methods::INITIALIZED, None);
        assert!(server().handle(request).await.is_none());
    }

    #[tokio::test]
    async fn test_null_id_gets_a_response() {
        let mut request = JsonRpcRequest::new(0, methods::PING, None);
        request.id = Some(Value::Null);
        let response = server().handle(request).await.unwrap();
        assert_eq!(response.id, Value::Null);
        assert_eq!(response.into_result().unwrap(), json!({}));
    }

    #[tokio::test]
    async fn test_tools_list_includes_output_schema() {
        let response = call(&server(), methods::TOOLS_LIST, json!({})).await;
        let result: ListToolsResult = serde_json::from_value(response.into_result().unwrap()).unwrap();
        let names: Vec<&str> = result.tools.iter().map(|t| t.name.as_ref()).collect();
        assert_eq!(names, vec!["add_numbers", "make_note"]);
        let output_schema = result.tools[0].output_schema.as_ref().unwrap();
        assert_eq!(output_schema["required"], json!(["input", "output"]));
    }

    #[tokio::test]
    async fn test_tools_call_stores_and_notifies() {
        let mut server = server();
        let (tx, mut rx) = broadcast::channel(8);
        server.connect(tx);

        let response = call(
            &server,
            methods::TOOLS_CALL,
            json!({"name": "add_numbers", "arguments": {"a": "3", "b": 5}}),
        )
        .await;
        let result: CallToolResult = serde_json::from_value(response.into_result().unwrap()).unwrap();
        let expected = json!({"input": {"a": 3, "b": 5}, "output": 8});
        assert_eq!(result.structured_content, Some(expected.clone()));
        assert_ne!(result.is_error, Some(true));

        let stored = server.registry().require("add_numbers").unwrap().stored_output();
        assert_eq!(stored.unwrap().to_value(), expected);

        let notification = rx.try_recv().unwrap();
        assert_eq!(notification.method, methods::LOG_MESSAGE);
        let params = notification.params.unwrap();
        assert_eq!(params["level"], "info");
        assert_eq!(params["data"]["tool"], "add_numbers");
    }

    #[tokio::test]
    async fn test_tools_call_errors() {
        let server = server();

        let unknown = call(&server, methods::TOOLS_CALL, json!({"name": "nope"})).await;
        assert_eq!(unknown.error.unwrap().code, codes::NOT_FOUND);

        let invalid = call(
            &server,
            methods::TOOLS_CALL,
            json!({"name": "add_numbers", "arguments": {"a": "x"}}),
        )
        .await;
        let error = invalid.error.unwrap();
        assert_eq!(error.code, ErrorCode::INVALID_PARAMS);
        let paths: Vec<&str> = error.data.as_ref().unwrap()["issues"]
            .as_array()
            .unwrap()
            .iter()
            .map(|i| i["path"].as_str().unwrap())
            .collect();
        assert_eq!(paths, vec!["a", "b"]);

        let missing = server
            .handle(JsonRpcRequest::new(2, methods::TOOLS_CALL, None))
            .await
            .unwrap();
        assert_eq!(missing.error.unwrap().code, ErrorCode::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_resources_and_unknown_method() {
        let server = server();

        let listed = call(&server, methods::RESOURCES_LIST, json!({})).await;
        let listed = listed.into_result().unwrap();
        assert_eq!(listed["resources"][0]["uri"], HELLO_URI);
        assert_eq!(listed["resources"][0]["mimeType"], "text/plain");

        let read = call(&server, methods::RESOURCES_READ, json!({"uri": HELLO_URI})).await;
        assert_eq!(read.into_result().unwrap()["contents"][0]["text"], "hello world");

        let missing = call(&server, methods::RESOURCES_READ, json!({"uri": "local://nope"})).await;
        assert_eq!(missing.error.unwrap().code, codes::NOT_FOUND);

        let unknown = call(&server, "prompts/list", json!({})).await;
        assert_eq!(unknown.error.unwrap().code, ErrorCode::METHOD_NOT_FOUND);
    }
}
