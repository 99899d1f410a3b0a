//! One orchestration turn: ask the model, run exactly one tool, optionally
//! fold the result back for a final answer.

pub mod prompt;

use std::fmt;
use std::sync::Arc;

use tracing::Instrument;

use toolrelay_common::config::TurnMode;
use toolrelay_common::schema::FieldIssue;
use toolrelay_common::{ToolRelayError, ValidatedOutput, ValidationError};
use toolrelay_tools::{RegisteredTool, ToolRegistry};

use crate::llm::{ChatOptions, LlmCaller, Message, ToolCallRequest, ToolDefinition};
use crate::remote::RemoteToolClient;

/// Where the requested tool runs.
pub enum ToolDispatch {
    /// In-process, through the registry's handler.
    Local,
    /// Proxied through a remote tool server.
    Remote(RemoteToolClient),
}

/// Turn states, in the order a successful turn visits them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnState {
    Init,
    AwaitingModel,
    NoCallRequested,
    SingleCallRequested,
    MultiCallRequested,
    Executing,
    Done,
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "INIT",
            Self::AwaitingModel => "AWAITING_MODEL",
            Self::NoCallRequested => "NO_CALL_REQUESTED",
            Self::SingleCallRequested => "SINGLE_CALL_REQUESTED",
            Self::MultiCallRequested => "MULTI_CALL_REQUESTED",
            Self::Executing => "EXECUTING",
            Self::Done => "DONE",
        };
        f.write_str(name)
    }
}

/// Result of a completed turn.
#[derive(Clone, Debug)]
pub struct TurnOutcome {
    /// The tool that ran. Its stored output now holds `output`.
    pub tool_name: String,
    pub output: ValidatedOutput,
    /// The model's closing answer, only in [`TurnMode::FoldResult`].
    pub final_answer: Option<String>,
    /// Full conversation as sent to the model.
    pub history: Vec<Message>,
}

/// Mediates between the chat endpoint and the tool registry.
pub struct ChatOrchestrator {
    llm: Arc<dyn LlmCaller>,
    registry: Arc<ToolRegistry>,
    dispatch: ToolDispatch,
    turn_mode: TurnMode,
    preamble: String,
    temperature: Option<f64>,
}

impl ChatOrchestrator {
    pub fn new(llm: Arc<dyn LlmCaller>, registry: Arc<ToolRegistry>) -> Self {
        Self {
            llm,
            registry,
            dispatch: ToolDispatch::Local,
            turn_mode: TurnMode::default(),
            preamble: prompt::DEFAULT_PREAMBLE.to_string(),
            temperature: None,
        }
    }

    pub fn with_dispatch(mut self, dispatch: ToolDispatch) -> Self {
        self.dispatch = dispatch;
        self
    }

    pub fn with_turn_mode(mut self, turn_mode: TurnMode) -> Self {
        self.turn_mode = turn_mode;
        self
    }

    pub fn with_preamble(mut self, preamble: impl Into<String>) -> Self {
        self.preamble = preamble.into();
        self
    }

    /// Temperature of the first request. The fold-back request always uses 0.
    pub fn with_temperature(mut self, temperature: Option<f64>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn initial_messages(&self, task: &str) -> Vec<Message> {
        prompt::initial_messages(&self.preamble, &self.registry, task)
    }

    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        prompt::tool_definitions(&self.registry)
    }

    /// Run one turn for `task`. Every error is terminal for the turn.
    pub async fn run_turn(&self, task: &str) -> Result<TurnOutcome, ToolRelayError> {
        let span = tracing::info_span!(
            "turn",
            mode = ?self.turn_mode,
            remote = matches!(self.dispatch, ToolDispatch::Remote(_))
        );
        self.drive(task).instrument(span).await
    }

    async fn drive(&self, task: &str) -> Result<TurnOutcome, ToolRelayError> {
        let mut state = TurnState::Init;
        let mut history = self.initial_messages(task);
        let tools = self.tool_definitions();

        advance(&mut state, TurnState::AwaitingModel);
        let options = ChatOptions {
            temperature: self.temperature,
        };
        let response = self.llm.chat(&history, &tools, &options).await?;

        let call = select_single_call(&mut state, response.tool_calls())?.clone();
        history.push(response.message);

        advance(&mut state, TurnState::Executing);
        let tool = self.resolve(&call.tool_name)?;
        let output = self.execute(&tool, &call).await?;
        tool.store_output(output.clone());

        let final_answer = match self.turn_mode {
            TurnMode::ToolNameOnly => None,
            TurnMode::FoldResult => {
                history.push(Message::tool_result(
                    tool.name(),
                    call.id.clone(),
                    output.to_value().to_string(),
                ));
                let response = self
                    .llm
                    .chat(&history, &[], &ChatOptions::deterministic())
                    .await?;
                let answer = response.message.content.clone();
                history.push(response.message);
                Some(answer)
            }
        };

        advance(&mut state, TurnState::Done);
        tracing::info!(tool = %tool.name(), folded = final_answer.is_some(), "Turn completed");

        Ok(TurnOutcome {
            tool_name: tool.name().to_string(),
            output,
            final_answer,
            history,
        })
    }

    fn resolve(&self, name: &str) -> Result<Arc<RegisteredTool>, ToolRelayError> {
        match self.registry.require(name) {
            Ok(tool) => Ok(Arc::clone(tool)),
            Err(e) => {
                tracing::warn!(
                    tool = %name,
                    available = ?self.registry.names(),
                    "Model requested an unknown tool"
                );
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        tool: &RegisteredTool,
        call: &ToolCallRequest,
    ) -> Result<ValidatedOutput, ToolRelayError> {
        let raw = call
            .raw_arguments
            .to_value()
            .map_err(|e| ToolRelayError::InvalidToolInput {
                tool: tool.name().to_string(),
                source: ValidationError::new(vec![FieldIssue::new(
                    "",
                    format!("arguments are not valid JSON: {}", e),
                )]),
            })?;
        let input = tool.parse_input(&raw)?;

        tracing::info!(tool = %tool.name(), arguments = %input.to_value(), "Dispatching tool call");
        match &self.dispatch {
            ToolDispatch::Local => self.registry.execute(tool.name(), input).await,
            ToolDispatch::Remote(client) => client.invoke(tool, &input).await,
        }
    }
}

fn advance(state: &mut TurnState, next: TurnState) {
    tracing::debug!(from = %state, to = %next, "Turn state transition");
    *state = next;
}

/// Exactly one call proceeds; zero or several end the turn before anything runs.
fn select_single_call<'a>(
    state: &mut TurnState,
    calls: &'a [ToolCallRequest],
) -> Result<&'a ToolCallRequest, ToolRelayError> {
    match calls {
        [] => {
            advance(state, TurnState::NoCallRequested);
            Err(ToolRelayError::NoToolRequested)
        }
        [call] => {
            advance(state, TurnState::SingleCallRequested);
            Ok(call)
        }
        many => {
            advance(state, TurnState::MultiCallRequested);
            let names: Vec<&str> = many.iter().map(|c| c.tool_name.as_str()).collect();
            tracing::warn!(count = many.len(), tools = ?names, "Model requested several tool calls");
            Err(ToolRelayError::MultipleToolCallsUnsupported { count: many.len() })
        }
    }
}
