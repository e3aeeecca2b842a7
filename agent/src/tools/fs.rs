//! Filesystem tools: read, write, list

use std::collections::HashMap;

use async_trait::async_trait;

use super::{PropertyKind, RiskLevel, Tool, ToolSchema};
use crate::error::ToolError;

/// Cap on file content returned to the model.
const MAX_READ_BYTES: usize = 65_536;

pub struct FsReadTool {
    schema: ToolSchema,
}

impl FsReadTool {
    pub fn new() -> Self {
        Self {
            schema: ToolSchema::new().property(
                "path",
                PropertyKind::String,
                "Absolute or working-directory-relative path of the file to read",
                true,
            ),
        }
    }
}

impl Default for FsReadTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for FsReadTool {
    fn name(&self) -> &str {
        "fs_read"
    }

    fn description(&self) -> &str {
        "Read a text file and return its contents"
    }

    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn invoke(&self, args: HashMap<String, String>) -> Result<String, ToolError> {
        let path = required(&args, "path")?;
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("cannot read {}: {}", path, e)))?;
        if content.len() > MAX_READ_BYTES {
            let mut truncated: String = content.chars().take(MAX_READ_BYTES).collect();
            truncated.push_str("\n[truncated]");
            return Ok(truncated);
        }
        Ok(content)
    }
}

pub struct FsWriteTool {
    schema: ToolSchema,
}

impl FsWriteTool {
    pub fn new() -> Self {
        Self {
            schema: ToolSchema::new()
                .property("path", PropertyKind::String, "Path of the file to write", true)
                .property("content", PropertyKind::String, "Content to write", true),
        }
    }
}

impl Default for FsWriteTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for FsWriteTool {
    fn name(&self) -> &str {
        "fs_write"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating parent directories as needed"
    }

    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    fn risk_level(&self) -> RiskLevel {
        RiskLevel::Medium
    }

    async fn invoke(&self, args: HashMap<String, String>) -> Result<String, ToolError> {
        let path = required(&args, "path")?;
        let content = required(&args, "content")?;
        if let Some(parent) = std::path::Path::new(path).parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        }
        tokio::fs::write(path, content)
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("cannot write {}: {}", path, e)))?;
        Ok(format!("Wrote {} bytes to {}", content.len(), path))
    }
}

pub struct FsListTool {
    schema: ToolSchema,
}

impl FsListTool {
    pub fn new() -> Self {
        Self {
            schema: ToolSchema::new().property(
                "path",
                PropertyKind::String,
                "Directory to list",
                true,
            ),
        }
    }
}

impl Default for FsListTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for FsListTool {
    fn name(&self) -> &str {
        "fs_list"
    }

    fn description(&self) -> &str {
        "List directory entries, one per line, directories suffixed with /"
    }

    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn invoke(&self, args: HashMap<String, String>) -> Result<String, ToolError> {
        let path = required(&args, "path")?;
        let mut entries = tokio::fs::read_dir(path)
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("cannot list {}: {}", path, e)))?;

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?
        {
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                name.push('/');
            }
            names.push(name);
        }
        names.sort();
        Ok(names.join("\n"))
    }
}

fn required<'a>(args: &'a HashMap<String, String>, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .map(String::as_str)
        .ok_or_else(|| ToolError::MissingRequired(key.to_string()))
}
