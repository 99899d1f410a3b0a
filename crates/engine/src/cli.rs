//! CLI command definitions and the commands they run.

use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use serde_json::{Map, Value};

use toolrelay_common::config::TurnMode;
use toolrelay_common::{ToolRelayError, ValidatedInput};
use toolrelay_tools::handlers::add_numbers::{self, AddNumbersInput};
use toolrelay_tools::{
    builtin_registry, ToolHandlerContext, ToolKind, ToolOutcome, ToolRegistry,
};

use crate::config::{EngineConfig, SYSTEM_PROMPT};
use crate::llm::LlmCaller;
use crate::orchestrator::{ChatOrchestrator, ToolDispatch, TurnOutcome};
use crate::remote::RemoteToolClient;

/// CLI arguments for toolrelay
#[derive(Parser, Debug)]
#[command(name = "toolrelay")]
#[command(version, about = "Let a language model pick and run exactly one tool for a task")]
#[command(long_about = r#"
Sends a task to a tool-calling chat model, runs the single tool the model
asks for (in-process or on a remote tool server), and prints the result.

Configuration is read from $TOOLRELAY_CONFIG_DIR (default ./config) and the
environment: OLLAMA_HOST, LLM_PROVIDER, LLM_MODEL, LLM_API_KEY, MCP_URL.

Example:
  toolrelay run -t "Add 3 and 5"
  toolrelay run --remote -t "Make a note: call the plumber"
  toolrelay add 3 5
"#)]
pub struct Cli {
    /// Verbosity level (-v = debug, -vv = trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send a task with every built-in tool advertised
    Run {
        /// The task for the model
        #[arg(short, long, value_name = "TEXT")]
        task: String,

        /// Execute the tool on the remote tool server instead of in-process
        #[arg(long)]
        remote: bool,

        /// Send the tool result back and print the model's final answer too
        #[arg(long)]
        fold: bool,
    },

    /// Ask the model to add two numbers with add_numbers
    Add(AddArgs),
}

/// Operands for `add`: flagged, bare, or a mix of both.
#[derive(Args, Debug, Default)]
pub struct AddArgs {
    /// First operand
    #[arg(long = "a", value_name = "N", allow_hyphen_values = true)]
    pub a: Option<String>,

    /// Second operand
    #[arg(long = "b", value_name = "N", allow_hyphen_values = true)]
    pub b: Option<String>,

    /// Bare operands fill whichever of a and b was not flagged, in order
    #[arg(value_name = "N", num_args = 0..=2, allow_negative_numbers = true)]
    pub operands: Vec<String>,
}

impl AddArgs {
    /// Raw `{a, b}` object, before validation.
    pub fn raw_arguments(&self) -> Value {
        let mut bare = self.operands.iter();
        let mut args = Map::new();
        if let Some(a) = self.a.as_ref().or_else(|| bare.next()) {
            args.insert("a".into(), Value::String(a.clone()));
        }
        if let Some(b) = self.b.as_ref().or_else(|| bare.next()) {
            args.insert("b".into(), Value::String(b.clone()));
        }
        Value::Object(args)
    }

    /// Operands checked and coerced through the add_numbers input contract.
    pub fn validated(&self) -> Result<ValidatedInput, ToolRelayError> {
        add_numbers::input_schema()
            .parse_input(&self.raw_arguments())
            .map_err(|source| ToolRelayError::InvalidToolInput {
                tool: add_numbers::NAME.into(),
                source,
            })
    }
}

/// Task sent for `add`.
pub fn add_task(input: &AddNumbersInput) -> String {
    format!("Please compute the sum of {} and {}.", input.a, input.b)
}

/// Runs CLI commands against a chat endpoint.
pub struct Runner {
    config: EngineConfig,
    llm: Arc<dyn LlmCaller>,
}

impl Runner {
    pub fn new(config: EngineConfig, llm: Arc<dyn LlmCaller>) -> Self {
        Self { config, llm }
    }

    /// Run a command and return the text to print.
    pub async fn execute(&self, command: &Command) -> Result<String, ToolRelayError> {
        match command {
            Command::Run { task, remote, fold } => self.run_task(task, *remote, *fold).await,
            Command::Add(args) => self.run_add(args).await,
        }
    }

    async fn run_task(&self, task: &str, remote: bool, fold: bool) -> Result<String, ToolRelayError> {
        let registry = Arc::new(builtin_registry(self.tool_context())?);

        let mut orchestrator = self.orchestrator(Arc::clone(&registry));
        if remote {
            let client = RemoteToolClient::new(&self.config.system.remote)?;
            orchestrator = orchestrator.with_dispatch(ToolDispatch::Remote(client));
        }
        if fold {
            orchestrator = orchestrator.with_turn_mode(TurnMode::FoldResult);
        }

        let outcome = orchestrator.run_turn(task).await?;
        render(&registry, &outcome)
    }

    async fn run_add(&self, args: &AddArgs) -> Result<String, ToolRelayError> {
        let input: AddNumbersInput = args.validated()?.deserialize()?;

        let mut registry = ToolRegistry::new(self.tool_context());
        registry.register(add_numbers::descriptor(), add_numbers::handler())?;
        let registry = Arc::new(registry);

        let orchestrator = self
            .orchestrator(Arc::clone(&registry))
            .with_turn_mode(TurnMode::FoldResult);

        let outcome = orchestrator.run_turn(&add_task(&input)).await?;
        render(&registry, &outcome)
    }

    fn orchestrator(&self, registry: Arc<ToolRegistry>) -> ChatOrchestrator {
        let mut orchestrator = ChatOrchestrator::new(Arc::clone(&self.llm), registry)
            .with_turn_mode(self.config.system.orchestration.turn_mode)
            .with_temperature(self.config.system.llm.temperature);
        if let Some(preamble) = self.config.prompt(SYSTEM_PROMPT) {
            orchestrator = orchestrator.with_preamble(preamble);
        }
        orchestrator
    }

    fn tool_context(&self) -> ToolHandlerContext {
        ToolHandlerContext::from_config(&self.config.system.server)
    }
}

/// Tool-specific summary from the stored output, plus the final answer if any.
pub fn render(registry: &ToolRegistry, outcome: &TurnOutcome) -> Result<String, ToolRelayError> {
    let summary = summarize(registry, &outcome.tool_name)?;
    Ok(match &outcome.final_answer {
        Some(answer) if !answer.trim().is_empty() => format!("{}\n{}", summary, answer.trim()),
        _ => summary,
    })
}

/// Decode the named tool's stored output through the closed [`ToolKind`] set.
pub fn summarize(registry: &ToolRegistry, tool_name: &str) -> Result<String, ToolRelayError> {
    let kind = ToolKind::from_name(tool_name).ok_or_else(|| {
        ToolRelayError::Internal(format!("No output handling for tool '{}'", tool_name))
    })?;
    let stored = registry.require(tool_name)?.stored_output().ok_or_else(|| {
        ToolRelayError::Internal(format!("Tool '{}' has no stored output", tool_name))
    })?;
    Ok(ToolOutcome::decode(kind, &stored)?.summary())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;

    use serde_json::json;
    use toolrelay_common::config::SystemConfig;

    use crate::llm::{
        ChatOptions, LlmError, LlmResponse, Message, RawArguments, TokenUsage, ToolCallRequest,
        ToolDefinition,
    };

    struct ScriptedLlm {
        replies: Mutex<Vec<Message>>,
        advertised: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedLlm {
        fn new(mut replies: Vec<Message>) -> Arc<Self> {
            replies.reverse();
            Arc::new(Self {
                replies: Mutex::new(replies),
                advertised: Mutex::new(Vec::new()),
            })
        }
    }

    impl LlmCaller for ScriptedLlm {
        fn chat<'a>(
            &'a self,
            _messages: &'a [Message],
            tools: &'a [ToolDefinition],
            _options: &'a ChatOptions,
        ) -> Pin<Box<dyn Future<Output = Result<LlmResponse, LlmError>> + Send + 'a>> {
            self.advertised
                .lock()
                .unwrap()
                .push(tools.iter().map(|t| t.name.clone()).collect());
            let result = self
                .replies
                .lock()
                .unwrap()
                .pop()
                .map(|message| LlmResponse {
                    message,
                    done_reason: None,
                    usage: TokenUsage::default(),
                })
                .ok_or_else(|| LlmError::Api("script exhausted".into()));
            Box::pin(async move { result })
        }
    }

    fn add_call(a: i64, b: i64) -> Message {
        Message::assistant(
            "",
            vec![ToolCallRequest {
                id: None,
                tool_name: "add_numbers".into(),
                raw_arguments: RawArguments::Structured(json!({"a": a, "b": b})),
            }],
        )
    }

    fn config() -> EngineConfig {
        let mut system = SystemConfig::default();
        system.server.notes_dir = Some(std::env::temp_dir());
        EngineConfig::new(system)
    }

    #[test]
    fn test_run_requires_task() {
        assert!(Cli::try_parse_from(["toolrelay", "run"]).is_err());

        let cli = Cli::try_parse_from(["toolrelay", "-v", "run", "-t", "add 1 and 2", "--fold"])
            .unwrap();
        assert_eq!(cli.verbose, 1);
        match cli.command {
            Command::Run { task, remote, fold } => {
                assert_eq!(task, "add 1 and 2");
                assert!(!remote);
                assert!(fold);
            }
            other => panic!("Expected Run, got {:?}", other),
        }
    }

    fn parse_add(args: &[&str]) -> AddArgs {
        let mut argv = vec!["toolrelay", "add"];
        argv.extend_from_slice(args);
        match Cli::try_parse_from(argv).unwrap().command {
            Command::Add(args) => args,
            other => panic!("Expected Add, got {:?}", other),
        }
    }

    #[test]
    fn test_add_operand_forms() {
        for argv in [
            vec!["3", "5"],
            vec!["--a", "3", "--b", "5"],
            vec!["--b", "5", "3"],
            vec!["--a", "3", "5"],
        ] {
            let args = parse_add(&argv);
            assert_eq!(
                args.validated().unwrap().to_value(),
                json!({"a": 3, "b": 5}),
                "argv {:?}",
                argv
            );
        }

        let negative = parse_add(&["--a", "-2", "-4.5"]);
        assert_eq!(
            negative.validated().unwrap().to_value(),
            json!({"a": -2, "b": -4.5})
        );
    }

    #[test]
    fn test_add_missing_operand_names_field() {
        let err = parse_add(&["3"]).validated().unwrap_err();
        assert!(err.to_string().contains("b: required field is missing"));

        let err = parse_add(&["three", "5"]).validated().unwrap_err();
        assert!(err.to_string().contains("a: expected number"));
    }

    #[test]
    fn test_add_task_text() {
        let input: AddNumbersInput = parse_add(&["3", "5"]).validated().unwrap().deserialize().unwrap();
        assert_eq!(add_task(&input), "Please compute the sum of 3 and 5.");
    }

    #[tokio::test]
    async fn test_run_prints_tool_summary() {
        let llm = ScriptedLlm::new(vec![add_call(3, 5)]);
        let runner = Runner::new(config(), llm.clone());

        let command = Command::Run {
            task: "add 3 and 5".into(),
            remote: false,
            fold: false,
        };
        let text = runner.execute(&command).await.unwrap();
        assert_eq!(text, "The sum of 3 and 5 is 8.");
        assert_eq!(
            llm.advertised.lock().unwrap()[0],
            vec!["add_numbers".to_string(), "make_note".to_string()]
        );
    }

    #[tokio::test]
    async fn test_add_advertises_only_add_numbers_and_folds() {
        let llm = ScriptedLlm::new(vec![
            add_call(3, 5),
            Message::assistant("{\"result\": 8}", vec![]),
        ]);
        let runner = Runner::new(config(), llm.clone());

        let text = runner
            .execute(&Command::Add(parse_add(&["3", "5"])))
            .await
            .unwrap();
        assert_eq!(text, "The sum of 3 and 5 is 8.\n{\"result\": 8}");

        let advertised = llm.advertised.lock().unwrap().clone();
        assert_eq!(advertised.len(), 2);
        assert_eq!(advertised[0], vec!["add_numbers".to_string()]);
        assert!(advertised[1].is_empty());
    }

    #[test]
    fn test_summarize_without_stored_output_fails() {
        let registry = builtin_registry(ToolHandlerContext::new(std::env::temp_dir())).unwrap();
        let err = summarize(&registry, "add_numbers").unwrap_err();
        assert!(err.to_string().contains("no stored output"));
        assert!(summarize(&registry, "unregistered").is_err());
    }
}
