use serde::{Deserialize, Serialize};
use serde_json::Value;

use toolrelay_common::config::LlmConfig;

use super::types::{
    ChatOptions, LlmResponse, Message, RawArguments, TokenUsage, ToolCallRequest, ToolDefinition,
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
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<ModelOptions>,
}

#[derive(Serialize)]
struct ModelOptions {
    temperature: f64,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<ChatToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_name: Option<String>,
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
    function: ChatToolCallFunction,
}

#[derive(Serialize, Deserialize)]
struct ChatToolCallFunction {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    arguments: Option<Value>,
}

// ---------------------------------------------------------------------------
// Response wire types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: u64,
    #[serde(default)]
    eval_count: u64,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<ChatToolCall>,
}

// ---------------------------------------------------------------------------
// Conversion helpers
// ---------------------------------------------------------------------------

fn chat_url(host: &str) -> String {
    format!("{}/api/chat", host.trim_end_matches('/'))
}

/// Ollama expects arguments as objects, so text arguments are decoded first.
fn to_wire_messages(messages: &[Message]) -> Result<Vec<ChatMessage>, LlmError> {
    messages
        .iter()
        .map(|msg| {
            let tool_calls = msg
                .tool_calls
                .iter()
                .map(|call| {
                    let arguments = call.raw_arguments.to_value().map_err(|e| {
                        LlmError::Parse(format!("Unencodable tool arguments: {}", e))
                    })?;
                    Ok(ChatToolCall {
                        function: ChatToolCallFunction {
                            name: call.tool_name.clone(),
                            arguments: Some(arguments),
                        },
                    })
                })
                .collect::<Result<Vec<_>, LlmError>>()?;

            Ok(ChatMessage {
                role: msg.role.as_str(),
                content: msg.content.clone(),
                tool_calls,
                tool_name: msg.tool_name.clone(),
            })
        })
        .collect()
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

fn from_wire_response(resp: ChatResponse) -> LlmResponse {
    let tool_calls = resp
        .message
        .tool_calls
        .into_iter()
        .map(|tc| ToolCallRequest {
            id: None,
            tool_name: tc.function.name,
            raw_arguments: RawArguments::from_wire(tc.function.arguments),
        })
        .collect();

    LlmResponse {
        message: Message::assistant(resp.message.content, tool_calls),
        done_reason: resp.done_reason,
        usage: TokenUsage {
            input_tokens: resp.prompt_eval_count,
            output_tokens: resp.eval_count,
        },
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Send a non-streaming request to Ollama's native chat endpoint.
pub async fn send_chat(
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
        stream: false,
        options: options
            .temperature
            .map(|temperature| ModelOptions { temperature }),
    };

    let response = http
        .post(chat_url(&config.host))
        .json(&request)
        .send()
        .await
        .map_err(|e| LlmError::Http(e.to_string()))?;

    if !response.status().is_success() {
        return Err(status_error(response).await);
    }

    let body: ChatResponse = response
        .json()
        .await
        .map_err(|e| LlmError::Parse(format!("Failed to parse Ollama response: {}", e)))?;

    Ok(from_wire_response(body))
}
