use toolrelay_tools::ToolRegistry;

use crate::llm::{Message, ToolDefinition};

/// Used when `config/prompts/system.md` is absent.
pub const DEFAULT_PREAMBLE: &str = "You are a helpful assistant.
Prefer calling tools for any requested actions and knowledge requests.
Provide your response in JSON.
Use the following JSON schema definitions accordingly to the used tool:";

/// Title given to each output schema listed in the system prompt.
const RESPONSE_FORMAT_TITLE: &str = "ResponseFormat";

/// System prompt: the preamble, then each tool's output schema in registration order.
pub fn system_prompt(preamble: &str, registry: &ToolRegistry) -> String {
    let mut prompt = preamble.trim_end().to_string();
    prompt.push('\n');

    for tool in registry.tools() {
        let schema = tool
            .descriptor()
            .contract
            .output
            .describe_titled(RESPONSE_FORMAT_TITLE);
        let pretty = serde_json::to_string_pretty(&schema).unwrap_or_else(|_| schema.to_string());
        prompt.push_str(&format!(
            "\n\nUsed Tool: {}\n```json\n{}\n```",
            tool.name(),
            pretty
        ));
    }
    prompt
}

pub fn user_prompt(task: &str) -> String {
    format!("Fulfill the following task: \n<task>\n{}\n</task>", task.trim())
}

/// The two messages every turn starts from.
pub fn initial_messages(preamble: &str, registry: &ToolRegistry, task: &str) -> Vec<Message> {
    vec![
        Message::system(system_prompt(preamble, registry)),
        Message::user(user_prompt(task)),
    ]
}

pub fn tool_definitions(registry: &ToolRegistry) -> Vec<ToolDefinition> {
    registry
        .tools()
        .map(|tool| ToolDefinition::from(tool.descriptor()))
        .collect()
}
