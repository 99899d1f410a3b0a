use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use serde_json::Value;

use toolrelay_common::config::ServerConfig;
use toolrelay_common::{ToolContract, ToolRelayError, ValidatedInput, ValidatedOutput};

/// Shared context available to all tool handlers.
#[derive(Clone, Debug)]
pub struct ToolHandlerContext {
    /// Directory `make_note` writes into.
    pub notes_dir: PathBuf,
}

impl ToolHandlerContext {
    pub fn new(notes_dir: PathBuf) -> Self {
        Self { notes_dir }
    }

    /// Resolve the notes directory from config, falling back to `$HOME/Desktop`.
    pub fn from_config(config: &ServerConfig) -> Self {
        let notes_dir = config.notes_dir.clone().unwrap_or_else(|| {
            std::env::var("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("."))
                .join("Desktop")
        });
        Self { notes_dir }
    }
}

/// Handler function signature: takes validated args and context, returns raw JSON
/// (checked against the output contract by the registry) or an error string.
pub type ToolHandler = Arc<
    dyn Fn(
            ValidatedInput,
            Arc<ToolHandlerContext>,
        ) -> Pin<Box<dyn Future<Output = Result<Value, String>> + Send>>
        + Send
        + Sync,
>;

/// Name, description and contracts of a tool. Immutable once registered.
#[derive(Clone, Debug)]
pub struct ToolDescriptor {
    pub name: String,
    pub title: Option<String>,
    pub description: String,
    pub contract: ToolContract,
}

/// A tool in the registry: its descriptor, its handler and its last output.
pub struct RegisteredTool {
    descriptor: ToolDescriptor,
    handler: ToolHandler,
    /// Last validated output. Never held across an await.
    stored: Mutex<Option<ValidatedOutput>>,
}

impl RegisteredTool {
    pub fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Validate and coerce raw model arguments against the input contract.
    pub fn parse_input(&self, raw: &Value) -> Result<ValidatedInput, ToolRelayError> {
        self.descriptor
            .contract
            .input
            .parse_input(raw)
            .map_err(|source| ToolRelayError::InvalidToolInput {
                tool: self.descriptor.name.clone(),
                source,
            })
    }

    /// Validate a raw result against the output contract.
    pub fn parse_output(&self, raw: &Value) -> Result<ValidatedOutput, ToolRelayError> {
        self.descriptor
            .contract
            .output
            .parse_output(raw)
            .map_err(|source| ToolRelayError::InvalidToolOutput {
                tool: self.descriptor.name.clone(),
                source,
            })
    }

    /// Overwrite the stored output with the latest result.
    pub fn store_output(&self, output: ValidatedOutput) {
        let mut stored = self.stored.lock().unwrap_or_else(|e| e.into_inner());
        *stored = Some(output);
    }

    /// The last stored output, absent until the tool has run once.
    pub fn stored_output(&self) -> Option<ValidatedOutput> {
        self.stored
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// Registry of tools keyed by name, iterated in registration order.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<RegisteredTool>>,
    order: Vec<String>,
    context: Arc<ToolHandlerContext>,
}

impl ToolRegistry {
    pub fn new(context: ToolHandlerContext) -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
            context: Arc::new(context),
        }
    }

    /// Register a tool. Names are unique and cannot be overwritten.
    pub fn register(
        &mut self,
        descriptor: ToolDescriptor,
        handler: ToolHandler,
    ) -> Result<(), ToolRelayError> {
        let name = descriptor.name.clone();
        if self.tools.contains_key(&name) {
            return Err(ToolRelayError::DuplicateTool { name });
        }

        tracing::debug!(tool = %name, "Registered tool");
        self.tools.insert(
            name.clone(),
            Arc::new(RegisteredTool {
                descriptor,
                handler,
                stored: Mutex::new(None),
            }),
        );
        self.order.push(name);
        Ok(())
    }

    /// Look up a tool by name. Absence is a normal outcome.
    pub fn lookup(&self, name: &str) -> Option<&Arc<RegisteredTool>> {
        self.tools.get(name)
    }

    /// Look up a tool by name, turning absence into `UnknownTool`.
    pub fn require(&self, name: &str) -> Result<&Arc<RegisteredTool>, ToolRelayError> {
        self.lookup(name).ok_or_else(|| self.unknown(name))
    }

    fn unknown(&self, name: &str) -> ToolRelayError {
        ToolRelayError::UnknownTool {
            name: name.to_string(),
            available: self.names().join(", "),
        }
    }

    /// Registered names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }

    /// Registered tools in registration order.
    pub fn tools(&self) -> impl Iterator<Item = &Arc<RegisteredTool>> {
        self.order.iter().filter_map(|name| self.tools.get(name))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn context(&self) -> &Arc<ToolHandlerContext> {
        &self.context
    }

    /// Execute a tool in-process and validate its result.
    ///
    /// Does not store the output; that is the caller's decision.
    pub async fn execute(
        &self,
        name: &str,
        input: ValidatedInput,
    ) -> Result<ValidatedOutput, ToolRelayError> {
        let tool = match self.lookup(name) {
            Some(t) => Arc::clone(t),
            None => {
                tracing::warn!(tool = %name, available = ?self.names(), "Unknown tool called");
                metrics::counter!("tools.execution.errors", "tool" => name.to_string())
                    .increment(1);
                return Err(self.unknown(name));
            }
        };

        let start = std::time::Instant::now();
        tracing::info!(tool = %name, "Tool call started");

        let result = (tool.handler)(input, Arc::clone(&self.context)).await;

        let latency = start.elapsed().as_secs_f64();
        metrics::histogram!("tools.execution.latency", "tool" => name.to_string()).record(latency);
        metrics::counter!("tools.execution.count", "tool" => name.to_string()).increment(1);

        let raw = match result {
            Ok(value) => value,
            Err(message) => {
                tracing::warn!(tool = %name, latency_s = latency, error = %message, "Tool call failed");
                metrics::counter!("tools.execution.errors", "tool" => name.to_string())
                    .increment(1);
                return Err(ToolRelayError::ToolExecution {
                    tool: name.to_string(),
                    message,
                });
            }
        };

        let output = tool.parse_output(&raw)?;
        tracing::info!(tool = %name, latency_s = latency, "Tool call succeeded");
        Ok(output)
    }
}
