use serde::{Deserialize, Serialize};
use serde_json::Value;

use toolrelay_common::config::LlmConfig;
use toolrelay_common::ToolCallId;

use super::types::{
    ChatOptions, LlmResponse, Message, RawArguments, Role, TokenUsage, ToolCallRequest,
    ToolDefinition,
};
use super::{status_error, LlmError};

// ---------------------------------------------------------------------------
// Request wire types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ChatTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ChatToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Serialize)]
struct ChatTool {
    r#type: &'static str,
    function: ChatFunction,
}

#[derive(Serialize)]
struct ChatFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Serialize, Deserialize)]
struct ChatToolCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default = "function_type")]
    r#type: String,
    function: ChatToolCallFunction,
}

fn function_type() -> String {
    "function".into()
}

#[derive(Serialize, Deserialize)]
struct ChatToolCallFunction {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

// ---------------------------------------------------------------------------
// Response wire types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ChatToolCall>,
}

#[derive(Deserialize)]
struct ChatUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

// ---------------------------------------------------------------------------
// Conversion helpers
// ---------------------------------------------------------------------------

/// Endpoint URL for a configured host. Accepts hosts with or without `/v1`.
fn completions_url(host: &str) -> String {
    let base = host.trim_end_matches('/');
    if base.ends_with("/v1") {
        format!("{}/chat/completions", base)
    } else {
        format!("{}/v1/chat/completions", base)
    }
}

fn to_wire_messages(messages: &[Message]) -> Result<Vec<ChatMessage>, LlmError> {
    messages
        .iter()
        .map(|msg| {
            let tool_calls = if msg.tool_calls.is_empty() {
                None
            } else {
                Some(
                    msg.tool_calls
                        .iter()
                        .map(to_wire_tool_call)
                        .collect::<Result<Vec<_>, _>>()?,
                )
            };

            let content = match msg.role {
                Role::Assistant if msg.content.is_empty() => None,
                _ => Some(msg.content.clone()),
            };

            Ok(ChatMessage {
                role: msg.role.as_str(),
                content,
                tool_calls,
                tool_call_id: msg.tool_call_id.as_ref().map(|id| id.to_string()),
                name: match msg.role {
                    Role::Tool => msg.tool_name.clone(),
                    _ => None,
                },
            })
        })
        .collect()
}

/// This dialect always carries arguments as a JSON-encoded string.
fn to_wire_tool_call(call: &ToolCallRequest) -> Result<ChatToolCall, LlmError> {
    let arguments = match &call.raw_arguments {
        RawArguments::Text(text) => text.clone(),
        other => {
            let value = other
                .to_value()
                .map_err(|e| LlmError::Parse(format!("Unencodable tool arguments: {}", e)))?;
            value.to_string()
        }
    };

    Ok(ChatToolCall {
        id: call.id.as_ref().map(|id| id.to_string()),
        r#type: function_type(),
        function: ChatToolCallFunction {
            name: call.tool_name.clone(),
            arguments: Some(Value::String(arguments)),
        },
    })
}

fn to_wire_tools(tools: &[ToolDefinition]) -> Vec<ChatTool> {
    tools
        .iter()
        .map(|t| ChatTool {
            r#type: "function",
            function: ChatFunction {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.parameters.clone(),
            },
        })
        .collect()
}

fn from_wire_response(resp: ChatResponse) -> Result<LlmResponse, LlmError> {
    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::Parse("Empty choices array".into()))?;

    let tool_calls = choice
        .message
        .tool_calls
        .into_iter()
        .map(|tc| ToolCallRequest {
            id: tc.id.map(ToolCallId::from),
            tool_name: tc.function.name,
            raw_arguments: RawArguments::from_wire(tc.function.arguments),
        })
        .collect();

    let usage = resp
        .usage
        .map(|u| TokenUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        })
        .unwrap_or_default();

    Ok(LlmResponse {
        message: Message::assistant(choice.message.content.unwrap_or_default(), tool_calls),
        done_reason: choice.finish_reason,
        usage,
    })
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Send a chat completion request to an OpenAI-compatible endpoint.
pub async fn send_chat_completion(
    http: &reqwest::Client,
    config: &LlmConfig,
    messages: &[Message],
    tools: &[ToolDefinition],
    options: &ChatOptions,
) -> Result<LlmResponse, LlmError> {
    let request = ChatRequest {
        model: &config.model,
        messages: to_wire_messages(messages)?,
        tools: to_wire_tools(tools),
        temperature: options.temperature,
    };

    let mut builder = http.post(completions_url(&config.host)).json(&request);
    if let Some(key) = &config.api_key {
        builder = builder.bearer_auth(key);
    }

    let response = builder
        .send()
        .await
        .map_err(|e| LlmError::Http(e.to_string()))?;

    if !response.status().is_success() {
        return Err(status_error(response).await);
    }

    let body: ChatResponse = response
        .json()
        .await
        .map_err(|e| LlmError::Parse(format!("Failed to parse chat completion: {}", e)))?;

    from_wire_response(body)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
