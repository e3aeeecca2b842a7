//! External tool bridge: JSON-RPC 2.0 over child-process stdio

mod bridge;
mod connection;
pub mod protocol;

pub use bridge::McpBridge;
pub use connection::{McpConnection, REQUEST_TIMEOUT};
pub use protocol::{bridged_tool_name, sanitize, ToolInfo};
