use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ToolRelayError;

/// Top-level system configuration, deserialized from system.toml.
///
/// Every section has defaults, so a missing file or missing keys are fine.
/// Environment variables are applied on top via [`SystemConfig::apply_env_overrides`].
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub llm: LlmConfig,
    pub orchestration: OrchestrationConfig,
    pub remote: RemoteConfig,
    pub server: ServerConfig,
}

/// Chat endpoint configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    /// Base URL of the chat endpoint (e.g. "http://localhost:11434").
    pub host: String,
    /// Model identifier; the model must support tool calling.
    pub model: String,
    /// Temperature for the first request. The fold-back request always uses 0.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    pub request_timeout_secs: u64,
    /// Bearer token for OpenAI-compatible endpoints. Only read from the environment.
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Ollama,
            host: "http://localhost:11434".into(),
            model: "gpt-oss:20b".into(),
            temperature: None,
            request_timeout_secs: 300,
            api_key: None,
        }
    }
}

/// Chat endpoint wire dialect.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// Ollama native `/api/chat`.
    Ollama,
    /// OpenAI-compatible `/v1/chat/completions`.
    OpenAi,
}

impl FromStr for LlmProvider {
    type Err = ToolRelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAi),
            other => Err(ToolRelayError::Config(format!(
                "unknown LLM provider '{}' (expected 'ollama' or 'openai')",
                other
            ))),
        }
    }
}

impl fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ollama => write!(f, "ollama"),
            Self::OpenAi => write!(f, "openai"),
        }
    }
}

/// How a turn ends once the tool has executed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnMode {
    /// Return the used tool's name; the caller reads the stored output.
    #[default]
    ToolNameOnly,
    /// Send the tool result back to the model and return its final answer too.
    FoldResult,
}

/// Orchestration behavior.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrationConfig {
    pub turn_mode: TurnMode,
}

/// Remote tool server as seen by the client.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Tool server endpoint (e.g. "http://localhost:8080/mcp").
    pub url: String,
    pub timeout_secs: u64,
    /// Name announced in the `initialize` request.
    pub client_name: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080/mcp".into(),
            timeout_secs: 30,
            client_name: "toolrelay-client".into(),
        }
    }
}

/// Tool server listen address and deployment mode.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub mode: SessionMode,
    /// Directory `make_note` writes into. Defaults to `$HOME/Desktop`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes_dir: Option<PathBuf>,
    /// Sessions with no open event stream and no request for this long are
    /// closed. Zero disables the sweep.
    pub session_idle_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            mode: SessionMode::Stateful,
            notes_dir: None,
            session_idle_secs: 600,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn session_idle_timeout(&self) -> Option<Duration> {
        (self.session_idle_secs > 0).then(|| Duration::from_secs(self.session_idle_secs))
    }
}

/// Tool server deployment mode. Chosen once per process, never mixed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    /// Sessions minted on `initialize` and routed by session id.
    Stateful,
    /// A fresh tool server per request, no session concept.
    Stateless,
}

impl FromStr for SessionMode {
    type Err = ToolRelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stateful" => Ok(Self::Stateful),
            "stateless" => Ok(Self::Stateless),
            other => Err(ToolRelayError::Config(format!(
                "unknown session mode '{}' (expected 'stateful' or 'stateless')",
                other
            ))),
        }
    }
}

impl SystemConfig {
    /// Parse a system.toml document.
    pub fn from_toml(content: &str) -> Result<Self, ToolRelayError> {
        toml::from_str(content).map_err(|e| ToolRelayError::Config(e.to_string()))
    }

    /// Defaults plus process environment overrides.
    pub fn from_env() -> Result<Self, ToolRelayError> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), ToolRelayError> {
        self.apply_overrides(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ToolRelayError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(provider) = lookup("LLM_PROVIDER") {
            self.llm.provider = provider.parse()?;
        }
        if let Some(host) = lookup("OLLAMA_HOST") {
            self.llm.host = host;
        }
        if let Some(model) = lookup("LLM_MODEL").or_else(|| lookup("OLLAMA_MODEL")) {
            self.llm.model = model;
        }
        if let Some(key) = lookup("LLM_API_KEY") {
            self.llm.api_key = Some(key);
        }
        if let Some(url) = lookup("MCP_URL") {
            self.remote.url = url;
        }
        if let Some(host) = lookup("MCP_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("MCP_PORT") {
            self.server.port = port
                .parse()
                .map_err(|_| ToolRelayError::Config(format!("MCP_PORT '{}' is not a port", port)))?;
        }
        if let Some(mode) = lookup("MCP_MODE") {
            self.server.mode = mode.parse()?;
        }
        if let Some(dir) = lookup("TOOLRELAY_NOTES_DIR") {
            self.server.notes_dir = Some(PathBuf::from(dir));
        }
        if let Some(secs) = lookup("MCP_SESSION_IDLE_SECS") {
            self.server.session_idle_secs = secs.parse().map_err(|_| {
                ToolRelayError::Config(format!("MCP_SESSION_IDLE_SECS '{}' is not a number", secs))
            })?;
        }
        Ok(())
    }
}
