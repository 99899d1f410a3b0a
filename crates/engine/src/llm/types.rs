use serde_json::{Map, Value};

use toolrelay_common::ToolCallId;
use toolrelay_tools::ToolDescriptor;

/// A message in the conversation history.
///
/// History is append-only: the orchestrator pushes new messages, never edits old ones.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Tool calls requested by an assistant message.
    pub tool_calls: Vec<ToolCallRequest>,
    /// Name of the tool a `Tool` message reports on.
    pub tool_name: Option<String>,
    /// Call id a `Tool` message answers, when the provider issues ids.
    pub tool_call_id: Option<ToolCallId>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            tool_calls,
            ..Self::plain(Role::Assistant, content)
        }
    }

    /// Synthetic message carrying a serialized tool result back to the model.
    pub fn tool_result(
        tool_name: impl Into<String>,
        tool_call_id: Option<ToolCallId>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            tool_name: Some(tool_name.into()),
            tool_call_id,
            ..Self::plain(Role::Tool, content)
        }
    }

    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_name: None,
            tool_call_id: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// One "call this tool with these arguments" entry from a model response.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolCallRequest {
    pub id: Option<ToolCallId>,
    pub tool_name: String,
    pub raw_arguments: RawArguments,
}

/// Tool arguments exactly as the provider sent them.
#[derive(Clone, Debug, PartialEq)]
pub enum RawArguments {
    /// JSON-encoded string (OpenAI-compatible endpoints).
    Text(String),
    /// Already-structured value (Ollama native).
    Structured(Value),
    /// Field absent from the response.
    Missing,
}

impl RawArguments {
    pub fn from_wire(value: Option<Value>) -> Self {
        match value {
            None | Some(Value::Null) => Self::Missing,
            Some(Value::String(text)) => Self::Text(text),
            Some(other) => Self::Structured(other),
        }
    }

    /// Decode into a JSON value. Missing, null and blank payloads become `{}`.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        match self {
            Self::Missing => Ok(empty_object()),
            Self::Text(text) if text.trim().is_empty() => Ok(empty_object()),
            Self::Text(text) => match serde_json::from_str(text)? {
                Value::Null => Ok(empty_object()),
                value => Ok(value),
            },
            Self::Structured(Value::Null) => Ok(empty_object()),
            Self::Structured(value) => Ok(value.clone()),
        }
    }
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

/// A tool advertised to the model.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// The input contract's structural description.
    pub parameters: Value,
}

impl From<&ToolDescriptor> for ToolDefinition {
    fn from(descriptor: &ToolDescriptor) -> Self {
        Self {
            name: descriptor.name.clone(),
            description: descriptor.description.clone(),
            parameters: descriptor.contract.input.describe(),
        }
    }
}

/// Per-request sampling options.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ChatOptions {
    pub temperature: Option<f64>,
}

impl ChatOptions {
    pub fn deterministic() -> Self {
        Self {
            temperature: Some(0.0),
        }
    }
}

/// Parsed response from a chat endpoint.
#[derive(Clone, Debug)]
pub struct LlmResponse {
    pub message: Message,
    pub done_reason: Option<String>,
    pub usage: TokenUsage,
}

impl LlmResponse {
    pub fn tool_calls(&self) -> &[ToolCallRequest] {
        &self.message.tool_calls
    }
}

/// Token usage from a single API call.
#[derive(Clone, Debug, Default)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}
