//! Typed errors shared across the runtime
//!
//! Each subsystem surfaces a tagged error enum so callers can match on the
//! failure kind instead of string-scraping. The agent loop converts tool-side
//! errors into tool messages; only provider errors abort a turn.

use thiserror::Error;

/// Errors from the provider router.
///
/// Transport failures, non-2xx statuses and malformed response bodies all
/// collapse into `GenerationFailed` with a human-readable reason.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("generation failed: {0}")]
    GenerationFailed(String),
}

/// Errors from the tool registry and tool execution.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("missing required parameter '{0}'")]
    MissingRequired(String),

    #[error("invalid parameter '{field}': {reason}")]
    InvalidParameter { field: String, reason: String },

    #[error("tool execution failed: {0}")]
    ExecutionFailed(String),

    #[error("tool '{0}' not found")]
    NotFound(String),

    #[error("tool '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("invalid tool name '{0}': must match [a-z0-9_]+")]
    InvalidName(String),
}

/// Errors from the MCP bridge.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("MCP server '{0}' is not configured or connected")]
    ServerNotFound(String),

    #[error("MCP server '{0}' is already connected")]
    AlreadyConnected(String),

    #[error("MCP server disconnected")]
    ServerDisconnected,

    #[error("failed to launch MCP server process: {0}")]
    ProcessLaunchFailed(String),

    #[error("MCP initialize handshake failed: {0}")]
    InitializeFailed(String),

    #[error("failed to write to MCP server stdin: {0}")]
    WriteError(String),

    #[error("MCP request timed out")]
    Timeout,

    #[error("JSON-RPC error {code}: {message}")]
    JsonRpcError { code: i64, message: String },

    #[error("invalid MCP response: {0}")]
    InvalidResponse(String),
}

/// Errors from core memory.
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("memory block '{0}' not found")]
    BlockNotFound(String),

    #[error("memory block '{0}' is read-only")]
    ReadOnly(String),

    #[error("memory block '{label}' would exceed its limit of {limit} characters")]
    OverLimit { label: String, limit: usize },

    #[error("no memory snapshot matches '{0}'")]
    SnapshotNotFound(String),
}

/// Errors from the persistence layer. Logged and tolerated; durable state
/// stays in memory when a write fails.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to write {path}: {reason}")]
    WriteFailed { path: String, reason: String },

    #[error("failed to read {path}: {reason}")]
    ReadFailed { path: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ToolError::MissingRequired("path".to_string());
        assert_eq!(err.to_string(), "missing required parameter 'path'");

        let err = McpError::JsonRpcError {
            code: -32601,
            message: "method not found".to_string(),
        };
        assert!(err.to_string().contains("-32601"));

        let err = MemoryError::OverLimit {
            label: "persona".to_string(),
            limit: 2000,
        };
        assert!(err.to_string().contains("persona"));
        assert!(err.to_string().contains("2000"));
    }
}
