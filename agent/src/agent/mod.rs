//! The tool-augmented reasoning loop
//!
//! One user turn runs assemble -> generate -> parse -> dispatch until the
//! model answers without tool calls, invokes the reserved `response` tool,
//! or the step budget runs out. Tool failures become tool messages the model
//! can react to; only provider failures abort the turn.

mod builder;
pub mod parser;

pub use builder::{AgentBuilder, AgentRuntime};

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::context;
use crate::error::{ProviderError, ToolError};
use crate::llm::{ChatModel, GenerateOptions, Message};
use crate::memory::CoreMemory;
use crate::session::Session;
use crate::tools::{self, PropertyKind, Tool, ToolRegistry, ToolSchema};
use parser::parse_invocations;

/// Reserved tool name that ends a turn with a final answer.
const RESPONSE_TOOL: &str = "response";
/// Tool name the loop intercepts to run a delegated sub-agent.
const DELEGATE_TOOL: &str = "delegate";
/// Character budget for history included in one prompt.
const HISTORY_CHAR_BUDGET: usize = 24_000;
/// Per-message overhead counted against the budget.
const MESSAGE_OVERHEAD_CHARS: usize = 50;

/// An agent: one reasoning loop bound to a model, registry, memory and
/// session.
pub struct Agent {
    model: Arc<dyn ChatModel>,
    registry: Arc<ToolRegistry>,
    memory: Arc<CoreMemory>,
    session: Mutex<Session>,
    description: String,
    options: GenerateOptions,
    max_steps: usize,
    /// 0 for the top-level agent; sub-agents cannot delegate further.
    depth: usize,
}

impl Agent {
    pub fn new(
        model: Arc<dyn ChatModel>,
        registry: Arc<ToolRegistry>,
        memory: Arc<CoreMemory>,
        session: Session,
        description: String,
        options: GenerateOptions,
        max_steps: usize,
    ) -> Self {
        Self {
            model,
            registry,
            memory,
            session: Mutex::new(session),
            description,
            options,
            max_steps,
            depth: 0,
        }
    }

    pub fn memory(&self) -> &Arc<CoreMemory> {
        &self.memory
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub async fn session_id(&self) -> String {
        self.session.lock().await.id().to_string()
    }

    pub async fn history(&self) -> Vec<Message> {
        self.session.lock().await.messages().to_vec()
    }

    /// Process one user request to completion.
    pub async fn run_turn(&self, user_message: &str) -> Result<String, ProviderError> {
        let result = self.turn_inner(user_message).await;
        if let Err(e) = self.session.lock().await.persist().await {
            tracing::warn!("{}", e);
        }
        result
    }

    async fn turn_inner(&self, user_message: &str) -> Result<String, ProviderError> {
        self.session
            .lock()
            .await
            .append(Message::user(user_message));

        let mut noop_streak = 0usize;
        let mut last_output = String::new();

        for step in 0..self.max_steps {
            let messages = self.assemble().await;
            let generation = self.model.generate(&messages, &self.options).await?;
            let reply = generation.content;
            let invocations = parse_invocations(&reply);
            tracing::debug!(
                "Step {}: {} chars, {} invocation(s)",
                step + 1,
                reply.len(),
                invocations.len()
            );
            if invocations.is_empty() {
                if reply.trim().is_empty() {
                    // No invocation and no meaningful text: retry once.
                    noop_streak += 1;
                    if noop_streak >= 2 {
                        let note = "(the model produced no response)";
                        self.session.lock().await.append(Message::assistant(note));
                        return Ok(note.to_string());
                    }
                    continue;
                }
                // A plain reply is the final answer.
                self.session
                    .lock()
                    .await
                    .append(Message::assistant(reply.clone()));
                return Ok(reply);
            }
            noop_streak = 0;

            for invocation in invocations {
                if invocation.name == RESPONSE_TOOL {
                    let answer = invocation
                        .args
                        .get("message")
                        .cloned()
                        .unwrap_or_default();
                    self.session
                        .lock()
                        .await
                        .append(Message::assistant(answer.clone()));
                    return Ok(answer);
                }

                let output = if invocation.name == DELEGATE_TOOL && self.depth == 0 {
                    self.run_delegate(&invocation.args).await
                } else {
                    self.dispatch(&invocation.name, invocation.args.clone()).await
                };

                last_output = output.clone();
                self.session
                    .lock()
                    .await
                    .append(Message::tool(invocation.name.clone(), output));

                if tools::is_memory_tool(&invocation.name) {
                    self.memory
                        .commit(&format!("Auto-snapshot after tool {}", invocation.name))
                        .await;
                }
            }
        }

        // Budget exhausted: surface whatever progress was made.
        let note = if last_output.is_empty() {
            "I ran out of reasoning steps before finishing.".to_string()
        } else {
            format!(
                "I ran out of reasoning steps before finishing. Last tool output:\n{}",
                last_output
            )
        };
        self.session
            .lock()
            .await
            .append(Message::assistant(note.clone()));
        Ok(note)
    }

    /// Resolve and invoke a registered tool. Errors never abort the loop;
    /// they come back as text for the model to react to.
    async fn dispatch(&self, name: &str, args: HashMap<String, String>) -> String {
        match self.registry.lookup(name).await {
            None => format!("Error: tool '{}' not found", name),
            Some(_) => match self.registry.invoke(name, args).await {
                Ok(output) => output,
                Err(e) => format!("Error: {}", e),
            },
        }
    }

    /// Run a delegated sub-agent over read-only-inherited memory. One level
    /// deep: the child's own `delegate` calls fall through to the registry
    /// placeholder and fail.
    async fn run_delegate(&self, args: &HashMap<String, String>) -> String {
        let Some(task) = args.get("task") else {
            return "Error: missing required parameter 'task'".to_string();
        };

        tracing::info!("Delegating task to sub-agent: {}", task);
        let child_memory = Arc::new(CoreMemory::inherit_from(&self.memory).await);

        // The child shares every capability except the memory tools, which
        // are rebound to its own inherited blocks. Without the rebind, a
        // sub-agent's memory calls would mutate the parent's live blocks.
        let child_registry = Arc::new(ToolRegistry::new());
        for tool in self.registry.list().await {
            if tools::is_memory_tool(tool.name()) {
                continue;
            }
            if let Err(e) = child_registry.register(tool).await {
                tracing::warn!("Could not share tool with sub-agent: {}", e);
            }
        }
        if let Err(e) = tools::register_memory_tools(&child_registry, child_memory.clone()).await
        {
            return format!("Error: {}", e);
        }

        let child = Agent {
            model: self.model.clone(),
            registry: child_registry,
            memory: child_memory,
            session: Mutex::new(Session::ephemeral()),
            description: self.description.clone(),
            options: self.options.clone(),
            max_steps: self.max_steps,
            depth: self.depth + 1,
        };

        let outcome = Box::pin(child.run_turn(task)).await;
        match outcome {
            Ok(answer) => answer,
            Err(e) => format!("Error: {}", e),
        }
    }

    /// Build the message list: one system message, then the newest history
    /// that fits the budget. The current user turn is always preserved.
    async fn assemble(&self) -> Vec<Message> {
        let compiled = self.memory.compile().await;
        let tool_list = self.registry.list().await;
        let system = context::build_system_prompt(&self.description, &compiled, &tool_list);

        let session = self.session.lock().await;
        let mut kept: VecDeque<Message> = VecDeque::new();
        let mut used = 0usize;
        for message in session.messages().iter().rev() {
            let cost = message.content.chars().count() + MESSAGE_OVERHEAD_CHARS;
            if !kept.is_empty() && used + cost > HISTORY_CHAR_BUDGET {
                break;
            }
            used += cost;
            kept.push_front(message.clone());
        }

        let mut messages = Vec::with_capacity(kept.len() + 1);
        messages.push(Message::system(system));
        messages.extend(kept);
        messages
    }
}

/// Placeholder that advertises delegation in the tool catalog. The loop
/// intercepts the call at depth 0; reaching this handler means a sub-agent
/// tried to delegate again.
pub struct DelegateTool {
    schema: ToolSchema,
}

impl DelegateTool {
    pub fn new() -> Self {
        Self {
            schema: ToolSchema::new().property(
                "task",
                PropertyKind::String,
                "Task description for the sub-agent",
                true,
            ),
        }
    }
}

impl Default for DelegateTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for DelegateTool {
    fn name(&self) -> &str {
        DELEGATE_TOOL
    }

    fn description(&self) -> &str {
        "Hand a self-contained task to a sub-agent that shares your memory read-only"
    }

    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn invoke(&self, _args: HashMap<String, String>) -> Result<String, ToolError> {
        Err(ToolError::ExecutionFailed(
            "delegation is only available to the top-level agent".to_string(),
        ))
    }
}
