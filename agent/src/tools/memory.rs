//! Agent-callable core memory tools
//!
//! These are the only tools that mutate long-term memory; the agent loop
//! snapshots memory after each of them runs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::{PropertyKind, Tool, ToolRegistry, ToolSchema};
use crate::error::{MemoryError, ToolError};
use crate::memory::CoreMemory;

/// Register the full memory tool set on `registry`.
pub async fn register_memory_tools(
    registry: &ToolRegistry,
    memory: Arc<CoreMemory>,
) -> Result<(), ToolError> {
    registry
        .register(Arc::new(MemoryAppendTool::new(memory.clone())))
        .await?;
    registry
        .register(Arc::new(MemoryReplaceTool::new(memory.clone())))
        .await?;
    registry
        .register(Arc::new(MemoryClearTool::new(memory.clone())))
        .await?;
    registry
        .register(Arc::new(MemoryCreateTool::new(memory)))
        .await?;
    Ok(())
}

/// Names of tools whose success must trigger a memory snapshot.
pub fn is_memory_tool(name: &str) -> bool {
    matches!(
        name,
        "memory_append" | "memory_replace" | "memory_clear" | "memory_create"
    )
}

fn tool_err(e: MemoryError) -> ToolError {
    ToolError::ExecutionFailed(e.to_string())
}

fn required<'a>(args: &'a HashMap<String, String>, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .map(String::as_str)
        .ok_or_else(|| ToolError::MissingRequired(key.to_string()))
}

pub struct MemoryAppendTool {
    memory: Arc<CoreMemory>,
    schema: ToolSchema,
}

impl MemoryAppendTool {
    pub fn new(memory: Arc<CoreMemory>) -> Self {
        Self {
            memory,
            schema: ToolSchema::new()
                .property("label", PropertyKind::String, "Memory block to append to", true)
                .property("content", PropertyKind::String, "Text to append", true),
        }
    }
}

#[async_trait]
impl Tool for MemoryAppendTool {
    fn name(&self) -> &str {
        "memory_append"
    }

    fn description(&self) -> &str {
        "Append a line to a core memory block"
    }

    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn invoke(&self, args: HashMap<String, String>) -> Result<String, ToolError> {
        let label = required(&args, "label")?;
        let content = required(&args, "content")?;
        self.memory.append(label, content).await.map_err(tool_err)?;
        Ok(format!("Appended to '{}'", label))
    }
}

pub struct MemoryReplaceTool {
    memory: Arc<CoreMemory>,
    schema: ToolSchema,
}

impl MemoryReplaceTool {
    pub fn new(memory: Arc<CoreMemory>) -> Self {
        Self {
            memory,
            schema: ToolSchema::new()
                .property("label", PropertyKind::String, "Memory block to edit", true)
                .property("old", PropertyKind::String, "Exact text to replace", true)
                .property("new", PropertyKind::String, "Replacement text", true),
        }
    }
}

#[async_trait]
impl Tool for MemoryReplaceTool {
    fn name(&self) -> &str {
        "memory_replace"
    }

    fn description(&self) -> &str {
        "Replace text inside a core memory block"
    }

    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn invoke(&self, args: HashMap<String, String>) -> Result<String, ToolError> {
        let label = required(&args, "label")?;
        let old = required(&args, "old")?;
        let new = required(&args, "new")?;
        self.memory
            .replace(label, old, new)
            .await
            .map_err(tool_err)?;
        Ok(format!("Updated '{}'", label))
    }
}

pub struct MemoryClearTool {
    memory: Arc<CoreMemory>,
    schema: ToolSchema,
}

impl MemoryClearTool {
    pub fn new(memory: Arc<CoreMemory>) -> Self {
        Self {
            memory,
            schema: ToolSchema::new().property(
                "label",
                PropertyKind::String,
                "Memory block to reset to empty",
                true,
            ),
        }
    }
}

#[async_trait]
impl Tool for MemoryClearTool {
    fn name(&self) -> &str {
        "memory_clear"
    }

    fn description(&self) -> &str {
        "Clear a core memory block"
    }

    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn invoke(&self, args: HashMap<String, String>) -> Result<String, ToolError> {
        let label = required(&args, "label")?;
        self.memory.clear(label).await.map_err(tool_err)?;
        Ok(format!("Cleared '{}'", label))
    }
}

pub struct MemoryCreateTool {
    memory: Arc<CoreMemory>,
    schema: ToolSchema,
}

impl MemoryCreateTool {
    pub fn new(memory: Arc<CoreMemory>) -> Self {
        Self {
            memory,
            schema: ToolSchema::new()
                .property("label", PropertyKind::String, "Label for the new block", true)
                .property("value", PropertyKind::String, "Initial content", false)
                .property("limit", PropertyKind::Integer, "Character cap (default 2000)", false)
                .property("description", PropertyKind::String, "What the block is for", false),
        }
    }
}

#[async_trait]
impl Tool for MemoryCreateTool {
    fn name(&self) -> &str {
        "memory_create"
    }

    fn description(&self) -> &str {
        "Create a new core memory block; existing labels are left untouched"
    }

    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn invoke(&self, args: HashMap<String, String>) -> Result<String, ToolError> {
        let label = required(&args, "label")?;
        let limit = match args.get("limit") {
            Some(raw) => Some(raw.parse::<usize>().map_err(|_| ToolError::InvalidParameter {
                field: "limit".to_string(),
                reason: format!("'{}' is not an integer", raw),
            })?),
            None => None,
        };
        self.memory
            .create(
                label,
                args.get("value").cloned(),
                limit,
                args.get("description").cloned(),
            )
            .await
            .map_err(tool_err)?;
        Ok(format!("Block '{}' is present", label))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemorySectionConfig;
    use crate::persistence::{SaveDebouncer, StorePaths};

    async fn setup() -> (tempfile::TempDir, ToolRegistry, Arc<CoreMemory>) {
        let dir = tempfile::tempdir().unwrap();
        let paths = StorePaths::new(dir.path());
        let saver = SaveDebouncer::with_window(std::time::Duration::from_millis(10));
        let memory = Arc::new(
            CoreMemory::load(&paths, saver, "main", &MemorySectionConfig::default()).await,
        );
        let registry = ToolRegistry::new();
        register_memory_tools(&registry, memory.clone()).await.unwrap();
        (dir, registry, memory)
    }

    fn args(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_append_through_registry() {
        let (_dir, registry, memory) = setup().await;
        registry
            .invoke(
                "memory_append",
                args(&[("label", "human"), ("content", "Name: Sam")]),
            )
            .await
            .unwrap();
        assert!(memory.get("human").await.unwrap().value.contains("Name: Sam"));
    }

    #[tokio::test]
    async fn test_memory_errors_surface_as_tool_errors() {
        let (_dir, registry, _memory) = setup().await;
        let err = registry
            .invoke(
                "memory_append",
                args(&[("label", "system"), ("content", "override")]),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed(msg) if msg.contains("read-only")));
    }

    #[tokio::test]
    async fn test_create_with_bad_limit() {
        let (_dir, registry, _memory) = setup().await;
        let err = registry
            .invoke(
                "memory_create",
                args(&[("label", "x"), ("limit", "not-a-number")]),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidParameter { field, .. } if field == "limit"));
    }

    #[tokio::test]
    async fn test_tools_bound_to_inherited_memory_respect_read_only() {
        let (_dir, _registry, parent) = setup().await;
        let child_memory = Arc::new(CoreMemory::inherit_from(&parent).await);
        let child_registry = ToolRegistry::new();
        register_memory_tools(&child_registry, child_memory.clone())
            .await
            .unwrap();

        // Inherited labels are read-only copies; the child's tools must fail.
        let err = child_registry
            .invoke(
                "memory_append",
                args(&[("label", "human"), ("content", "x")]),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed(msg) if msg.contains("read-only")));

        // The child's own scratchpad stays writable.
        child_registry
            .invoke(
                "memory_append",
                args(&[("label", "short_term"), ("content", "note")]),
            )
            .await
            .unwrap();
        assert_eq!(child_memory.get("short_term").await.unwrap().value, "note");
    }

    #[test]
    fn test_is_memory_tool() {
        assert!(is_memory_tool("memory_append"));
        assert!(is_memory_tool("memory_create"));
        assert!(!is_memory_tool("shell"));
        assert!(!is_memory_tool("mcp_files_read"));
    }
}
