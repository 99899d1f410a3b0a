use thiserror::Error;

use crate::schema::ValidationError;

/// Top-level error type for toolrelay operations.
///
/// Every variant is terminal for the orchestration turn it occurs in.
#[derive(Debug, Error)]
pub enum ToolRelayError {
    // --- Turn protocol errors ---
    #[error("Model did not request a tool call")]
    NoToolRequested,

    #[error("Model requested {count} tool calls, only one call per turn is supported")]
    MultipleToolCallsUnsupported { count: usize },

    #[error("Unknown tool '{name}'. Available tools: {available}")]
    UnknownTool { name: String, available: String },

    #[error("Tool '{name}' is already registered")]
    DuplicateTool { name: String },

    #[error("Invalid input for tool '{tool}': {source}")]
    InvalidToolInput {
        tool: String,
        source: ValidationError,
    },

    #[error("Invalid output from tool '{tool}': {source}")]
    InvalidToolOutput {
        tool: String,
        source: ValidationError,
    },

    #[error("Tool '{tool}' returned no structured content")]
    MissingStructuredContent { tool: String },

    #[error("Tool '{tool}' failed: {message}")]
    ToolExecution { tool: String, message: String },

    // --- Transport and session errors ---
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    // --- Dependency and operational errors ---
    #[error("LLM API error: {0}")]
    LlmApi(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Internal(String),
}

impl ToolRelayError {
    /// Whether the error was raised by the single-call turn protocol itself
    /// (the model asked for the wrong number of calls or a tool we don't have).
    pub fn is_turn_protocol(&self) -> bool {
        matches!(
            self,
            Self::NoToolRequested | Self::MultipleToolCallsUnsupported { .. } | Self::UnknownTool { .. }
        )
    }

    /// Whether the error came from schema validation of a tool's input or output.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidToolInput { .. } | Self::InvalidToolOutput { .. }
        )
    }

    /// The tool the error is about, if any.
    pub fn tool_name(&self) -> Option<&str> {
        match self {
            Self::UnknownTool { name, .. } | Self::DuplicateTool { name } => Some(name),
            Self::InvalidToolInput { tool, .. }
            | Self::InvalidToolOutput { tool, .. }
            | Self::MissingStructuredContent { tool }
            | Self::ToolExecution { tool, .. } => Some(tool),
            _ => None,
        }
    }
}

/// Result type alias for toolrelay operations.
pub type Result<T> = std::result::Result<T, ToolRelayError>;
