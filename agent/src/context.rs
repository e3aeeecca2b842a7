//! System prompt assembly
//!
//! Every reasoning step sends one system message: the agent description,
//! the compiled core memory, the tool catalog, and the invocation protocol.

use std::sync::Arc;

use crate::tools::Tool;

/// Summary of one registered tool as rendered into the prompt.
fn render_tool(tool: &Arc<dyn Tool>) -> String {
    format!(
        "- {} ({} risk): {}\n  schema: {}",
        tool.name(),
        tool.risk_level().as_str(),
        tool.description(),
        tool.schema().to_json()
    )
}

/// Build the single system message for a reasoning step.
pub fn build_system_prompt(
    description: &str,
    compiled_memory: &str,
    tools: &[Arc<dyn Tool>],
) -> String {
    let mut prompt = String::new();

    prompt.push_str(description);
    prompt.push_str("\n\n");

    if let Ok(cwd) = std::env::current_dir() {
        prompt.push_str(&format!("Working directory: {}\n\n", cwd.display()));
    }

    prompt.push_str("## Core memory\n\n");
    prompt.push_str(compiled_memory);
    prompt.push_str("\n\n## Tools\n\n");
    if tools.is_empty() {
        prompt.push_str("(none registered)\n");
    } else {
        for tool in tools {
            prompt.push_str(&render_tool(tool));
            prompt.push('\n');
        }
    }

    prompt.push_str(
        "\n## Tool protocol\n\n\
         To call a tool, emit a JSON object in your reply:\n\
         {\"tool_name\": \"<name>\", \"tool_args\": {\"<key>\": \"<value>\", ...}}\n\
         All argument values are strings. You may emit several objects in one \
         reply; they run in order and their results come back as tool messages.\n\
         To finish, call the reserved tool:\n\
         {\"tool_name\": \"response\", \"tool_args\": {\"message\": \"<your final answer>\"}}\n\
         A reply without any tool object is treated as your final answer.\n",
    );

    prompt
}

/// Default agent description when none is configured.
pub fn default_description(agent_name: &str) -> String {
    format!(
        "You are {}, a local personal agent. You keep long-term memory in labeled \
         blocks (shown below) and act through tools. Keep memory edits small and \
         factual; prefer tools over guessing.",
        agent_name
    )
}
