mod ollama;
mod openai;
pub mod types;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use toolrelay_common::config::{LlmConfig, LlmProvider};
use toolrelay_common::ToolRelayError;

pub use types::{
    ChatOptions, LlmResponse, Message, RawArguments, Role, TokenUsage, ToolCallRequest,
    ToolDefinition,
};

/// Chat endpoint client with provider dispatch.
///
/// A single attempt per call: a failed request aborts the turn it belongs to.
pub struct LlmClient {
    http: reqwest::Client,
    config: LlmConfig,
}

/// Errors from chat endpoint calls.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("LLM HTTP error: {0}")]
    Http(String),

    #[error("LLM auth error: {0}")]
    Auth(String),

    #[error("LLM rate limited (retry after {retry_after:?}s)")]
    RateLimited { retry_after: Option<u64> },

    #[error("LLM API error: {0}")]
    Api(String),

    #[error("LLM response parse error: {0}")]
    Parse(String),
}

impl From<LlmError> for ToolRelayError {
    fn from(e: LlmError) -> Self {
        ToolRelayError::LlmApi(e.to_string())
    }
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| LlmError::Http(e.to_string()))?;

        tracing::info!(
            provider = %config.provider,
            host = %config.host,
            model = %config.model,
            "LLM client ready"
        );

        Ok(Self { http, config })
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    /// Send one chat request to the configured provider.
    pub async fn chat(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        options: &ChatOptions,
    ) -> Result<LlmResponse, LlmError> {
        let provider = self.config.provider.to_string();
        let start = std::time::Instant::now();

        let result = match self.config.provider {
            LlmProvider::Ollama => {
                ollama::send_chat(&self.http, &self.config, messages, tools, options).await
            }
            LlmProvider::OpenAi => {
                openai::send_chat_completion(&self.http, &self.config, messages, tools, options)
                    .await
            }
        };

        metrics::histogram!(
            "llm.api.latency",
            "provider" => provider.clone(),
            "model" => self.config.model.clone()
        )
        .record(start.elapsed().as_secs_f64());

        match result {
            Ok(response) => {
                tracing::debug!(
                    provider = %provider,
                    tool_calls = response.tool_calls().len(),
                    input_tokens = response.usage.input_tokens,
                    output_tokens = response.usage.output_tokens,
                    done_reason = ?response.done_reason,
                    "LLM response received"
                );
                Ok(response)
            }
            Err(e) => {
                metrics::counter!("llm.api.errors", "provider" => provider.clone()).increment(1);
                tracing::error!(provider = %provider, error = %e, "LLM request failed");
                Err(e)
            }
        }
    }
}

/// Map a non-success HTTP status to an error, reading the body for context.
async fn status_error(response: reqwest::Response) -> LlmError {
    let status = response.status();

    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        let body = response.text().await.unwrap_or_default();
        return LlmError::Auth(format!("{}: {}", status, body));
    }

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());
        return LlmError::RateLimited { retry_after };
    }

    let body = response.text().await.unwrap_or_default();
    LlmError::Api(format!("{}: {}", status, extract_error_message(&body)))
}

/// Both dialects report errors as `{"error": "..."}` or `{"error": {"message": "..."}}`.
fn extract_error_message(body: &str) -> String {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    let message = parsed.as_ref().and_then(|v| {
        let error = v.get("error")?;
        error
            .as_str()
            .or_else(|| error.get("message").and_then(|m| m.as_str()))
            .map(str::to_string)
    });
    message.unwrap_or_else(|| body.to_string())
}

/// Object-safe trait for testability (dyn dispatch).
/// Tests provide a scripted mock; production uses LlmClient.
pub trait LlmCaller: Send + Sync {
    fn chat<'a>(
        &'a self,
        messages: &'a [Message],
        tools: &'a [ToolDefinition],
        options: &'a ChatOptions,
    ) -> Pin<Box<dyn Future<Output = Result<LlmResponse, LlmError>> + Send + 'a>>;
}

impl LlmCaller for LlmClient {
    fn chat<'a>(
        &'a self,
        messages: &'a [Message],
        tools: &'a [ToolDefinition],
        options: &'a ChatOptions,
    ) -> Pin<Box<dyn Future<Output = Result<LlmResponse, LlmError>> + Send + 'a>> {
        Box::pin(self.chat(messages, tools, options))
    }
}
