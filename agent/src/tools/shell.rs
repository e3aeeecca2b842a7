//! Shell command tool

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use super::{PropertyKind, RiskLevel, Tool, ToolSchema};
use crate::error::ToolError;

/// Commands are killed after this long.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(60);
/// Combined stdout/stderr cap handed back to the model.
const MAX_OUTPUT_CHARS: usize = 8_000;

pub struct ShellTool {
    schema: ToolSchema,
}

impl ShellTool {
    pub fn new() -> Self {
        Self {
            schema: ToolSchema::new().property(
                "command",
                PropertyKind::String,
                "Shell command to execute with sh -c",
                true,
            ),
        }
    }
}

impl Default for ShellTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Run a shell command and return its combined output and exit status"
    }

    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    fn risk_level(&self) -> RiskLevel {
        RiskLevel::High
    }

    async fn invoke(&self, args: HashMap<String, String>) -> Result<String, ToolError> {
        let command = args
            .get("command")
            .ok_or_else(|| ToolError::MissingRequired("command".to_string()))?;

        tracing::debug!("Running shell command: {}", command);

        let output = tokio::time::timeout(
            COMMAND_TIMEOUT,
            Command::new("sh").arg("-c").arg(command).output(),
        )
        .await
        .map_err(|_| {
            ToolError::ExecutionFailed(format!(
                "command timed out after {}s",
                COMMAND_TIMEOUT.as_secs()
            ))
        })?
        .map_err(|e| ToolError::ExecutionFailed(format!("failed to spawn sh: {}", e)))?;

        let mut rendered = String::new();
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stdout.trim().is_empty() {
            rendered.push_str(stdout.trim_end());
        }
        if !stderr.trim().is_empty() {
            if !rendered.is_empty() {
                rendered.push('\n');
            }
            rendered.push_str("[stderr] ");
            rendered.push_str(stderr.trim_end());
        }
        if !output.status.success() {
            if !rendered.is_empty() {
                rendered.push('\n');
            }
            rendered.push_str(&format!(
                "[exit status: {}]",
                output.status.code().unwrap_or(-1)
            ));
        }
        if rendered.is_empty() {
            rendered.push_str("(no output)");
        }
        if rendered.chars().count() > MAX_OUTPUT_CHARS {
            rendered = rendered.chars().take(MAX_OUTPUT_CHARS).collect();
            rendered.push_str("\n[truncated]");
        }

        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(command: &str) -> HashMap<String, String> {
        HashMap::from([("command".to_string(), command.to_string())])
    }

    #[tokio::test]
    async fn test_captures_stdout() {
        let tool = ShellTool::new();
        let out = tool.invoke(args("printf hello")).await.unwrap();
        assert_eq!(out, "hello");
    }

    #[tokio::test]
    async fn test_reports_exit_status_and_stderr() {
        let tool = ShellTool::new();
        let out = tool.invoke(args("echo oops >&2; exit 3")).await.unwrap();
        assert!(out.contains("[stderr] oops"));
        assert!(out.contains("[exit status: 3]"));
    }

    #[tokio::test]
    async fn test_empty_output_placeholder() {
        let tool = ShellTool::new();
        let out = tool.invoke(args("true")).await.unwrap();
        assert_eq!(out, "(no output)");
    }
}
