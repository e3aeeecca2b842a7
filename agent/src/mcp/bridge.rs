//! MCP bridge: connection lifecycle and registry integration
//!
//! Each configured server is hosted as a child process speaking JSON-RPC
//! over stdio. A successful handshake (initialize, initialized notification,
//! tools/list) registers every advertised tool into the tool registry under
//! `mcp_<server>_<tool>`; disconnecting unregisters them. Bridged tools
//! reconnect on demand with a short deadline, so servers can come and go
//! between turns.

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Mutex;

use super::connection::McpConnection;
use super::protocol::{
    self, bridged_tool_name, initialize_params, render_tool_result, ToolInfo, ToolsListResult,
};
use crate::config::{McpConfig, McpServerConfig};
use crate::error::{McpError, ToolError};
use crate::tools::{RiskLevel, Tool, ToolRegistry, ToolSchema};

/// Deadline for connect-on-demand from a tool invocation.
const ON_DEMAND_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct McpBridge {
    config: Mutex<McpConfig>,
    connections: Mutex<HashMap<String, Arc<McpConnection>>>,
    registry: Arc<ToolRegistry>,
    /// Request ids are monotonic across every connection of this bridge.
    next_id: Arc<AtomicU64>,
}

impl McpBridge {
    pub fn new(config: McpConfig, registry: Arc<ToolRegistry>) -> Self {
        Self {
            config: Mutex::new(config),
            connections: Mutex::new(HashMap::new()),
            registry,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Configured server names, connected or not.
    pub async fn servers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.config.lock().await.mcp_servers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Add or replace a server config at runtime.
    pub async fn configure_server(&self, name: &str, server: McpServerConfig) {
        self.config
            .lock()
            .await
            .mcp_servers
            .insert(name.to_string(), server);
    }

    pub async fn is_connected(&self, name: &str) -> bool {
        let connections = self.connections.lock().await;
        match connections.get(name) {
            Some(conn) => conn.is_alive().await && conn.is_initialized(),
            None => false,
        }
    }

    /// Tool catalog of a connected server.
    pub async fn tools(&self, name: &str) -> Result<Vec<ToolInfo>, McpError> {
        let connections = self.connections.lock().await;
        connections
            .get(name)
            .map(|conn| conn.tools())
            .ok_or_else(|| McpError::ServerNotFound(name.to_string()))
    }

    /// Spawn, handshake, and register a configured server's tools.
    ///
    /// Holding the connection map lock for the whole handshake is deliberate:
    /// concurrent connects to the same name coalesce here, and the second
    /// caller observes the established connection.
    pub async fn connect(self: &Arc<Self>, name: &str) -> Result<(), McpError> {
        let server_config = self
            .config
            .lock()
            .await
            .mcp_servers
            .get(name)
            .cloned()
            .ok_or_else(|| McpError::ServerNotFound(name.to_string()))?;

        let mut connections = self.connections.lock().await;
        let existing_alive = match connections.get(name) {
            Some(existing) => existing.is_alive().await,
            None => false,
        };
        if existing_alive {
            return Err(McpError::AlreadyConnected(name.to_string()));
        }
        if let Some(stale) = connections.remove(name) {
            // Leftover from a crashed child: clean it up and reconnect.
            self.unregister_tools(&stale.tools()).await;
            stale.terminate().await;
        }

        tracing::info!("Connecting to MCP server '{}'", name);
        let conn = Arc::new(
            McpConnection::spawn(name, &server_config, self.next_id.clone()).await?,
        );

        match self.handshake(&conn).await {
            Ok(tools) => {
                conn.set_tools(tools.clone());
                conn.set_initialized();
                self.register_tools(&conn, &tools).await;
                connections.insert(name.to_string(), conn);
                tracing::info!("MCP server '{}' ready ({} tools)", name, tools.len());
                Ok(())
            }
            Err(e) => {
                conn.terminate().await;
                Err(McpError::InitializeFailed(e.to_string()))
            }
        }
    }

    async fn handshake(&self, conn: &Arc<McpConnection>) -> Result<Vec<ToolInfo>, McpError> {
        let init = conn
            .send_request("initialize", Some(initialize_params()))
            .await?;
        if init.get("protocolVersion").is_none() {
            return Err(McpError::InvalidResponse(
                "initialize response missing protocolVersion".to_string(),
            ));
        }

        conn.send_notification("notifications/initialized", None)
            .await?;

        let listed = conn.send_request("tools/list", None).await?;
        let parsed: ToolsListResult = serde_json::from_value(listed)
            .map_err(|e| McpError::InvalidResponse(format!("bad tools/list result: {}", e)))?;

        Ok(parsed
            .tools
            .into_iter()
            .map(|t| ToolInfo {
                server: conn.name().to_string(),
                name: t.name,
                description: t.description,
                input_schema: t.input_schema,
            })
            .collect())
    }

    async fn register_tools(self: &Arc<Self>, conn: &Arc<McpConnection>, tools: &[ToolInfo]) {
        for info in tools {
            let registry_name = bridged_tool_name(conn.name(), &info.name);
            let tool = Arc::new(BridgedTool {
                bridge: Arc::downgrade(self),
                server: conn.name().to_string(),
                remote_name: info.name.clone(),
                registry_name: registry_name.clone(),
                description: info
                    .description
                    .clone()
                    .unwrap_or_else(|| format!("Tool '{}' on MCP server '{}'", info.name, conn.name())),
                schema: info
                    .input_schema
                    .as_ref()
                    .map(ToolSchema::from_json_schema)
                    .unwrap_or_default(),
            });

            // A crashed predecessor may have left a stale entry behind.
            self.registry.unregister(&registry_name).await;
            if let Err(e) = self.registry.register(tool).await {
                tracing::warn!("Could not register bridged tool '{}': {}", registry_name, e);
            }
        }
    }

    async fn unregister_tools(&self, tools: &[ToolInfo]) {
        for info in tools {
            self.registry
                .unregister(&bridged_tool_name(&info.server, &info.name))
                .await;
        }
    }

    /// Disconnect a server and unregister its tools.
    pub async fn disconnect(&self, name: &str) -> Result<(), McpError> {
        let conn = self
            .connections
            .lock()
            .await
            .remove(name)
            .ok_or_else(|| McpError::ServerNotFound(name.to_string()))?;

        tracing::info!("Disconnecting MCP server '{}'", name);
        self.unregister_tools(&conn.tools()).await;
        conn.terminate().await;
        Ok(())
    }

    /// Connect if not already connected, bounded by a 5s deadline. A
    /// concurrent connect winning the race reads as success.
    pub async fn ensure_connected(self: &Arc<Self>, name: &str) -> Result<(), McpError> {
        if self.is_connected(name).await {
            return Ok(());
        }
        match tokio::time::timeout(ON_DEMAND_CONNECT_TIMEOUT, self.connect(name)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(McpError::AlreadyConnected(_))) => Ok(()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(McpError::Timeout),
        }
    }

    /// Invoke a tool on a connected server. Arguments are coerced from
    /// strings per the tool's input schema at this edge only.
    pub async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        args: &HashMap<String, String>,
    ) -> Result<String, McpError> {
        let conn = {
            let connections = self.connections.lock().await;
            connections
                .get(server)
                .cloned()
                .ok_or_else(|| McpError::ServerNotFound(server.to_string()))?
        };
        if !conn.is_alive().await {
            return Err(McpError::ServerDisconnected);
        }

        let schema = conn
            .tools()
            .into_iter()
            .find(|t| t.name == tool)
            .and_then(|t| t.input_schema);
        let arguments = protocol::coerce_args(args, schema.as_ref());

        let result = conn
            .send_request("tools/call", Some(json!({ "name": tool, "arguments": arguments })))
            .await?;
        Ok(render_tool_result(&result))
    }

    /// Tear down every connection.
    pub async fn shutdown(&self) {
        let drained: Vec<(String, Arc<McpConnection>)> =
            self.connections.lock().await.drain().collect();
        for (name, conn) in drained {
            tracing::debug!("Shutting down MCP server '{}'", name);
            self.unregister_tools(&conn.tools()).await;
            conn.terminate().await;
        }
    }
}

/// A registry entry whose invocation forwards to an MCP child process.
struct BridgedTool {
    bridge: Weak<McpBridge>,
    server: String,
    remote_name: String,
    registry_name: String,
    description: String,
    schema: ToolSchema,
}

#[async_trait]
impl Tool for BridgedTool {
    fn name(&self) -> &str {
        &self.registry_name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    fn risk_level(&self) -> RiskLevel {
        RiskLevel::Medium
    }

    async fn invoke(&self, args: HashMap<String, String>) -> Result<String, ToolError> {
        let bridge = self
            .bridge
            .upgrade()
            .ok_or_else(|| ToolError::ExecutionFailed("MCP bridge has shut down".to_string()))?;

        bridge
            .ensure_connected(&self.server)
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        bridge
            .call_tool(&self.server, &self.remote_name, &args)
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A shell one-liner that speaks just enough of the protocol to
    /// handshake and answer one tool call, echoing back whatever id the
    /// request carried.
    const MOCK_SERVER: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  case "$line" in
    *'"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05"}}\n' "$id" ;;
    *'"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"ping","description":"Reply with pong","inputSchema":{"type":"object","properties":{"loud":{"type":"boolean"}}}}]}}\n' "$id" ;;
    *'"tools/call"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"pong"}]}}\n' "$id" ;;
  esac
done
"#;

    fn mock_config(name: &str) -> McpConfig {
        let mut servers = HashMap::new();
        servers.insert(
            name.to_string(),
            McpServerConfig {
                command: "sh".to_string(),
                args: vec!["-c".to_string(), MOCK_SERVER.to_string()],
                env: HashMap::new(),
            },
        );
        McpConfig {
            mcp_servers: servers,
        }
    }

    #[tokio::test]
    async fn test_connect_registers_sanitized_tools() {
        let registry = Arc::new(ToolRegistry::new());
        let bridge = Arc::new(McpBridge::new(mock_config("Mock-Server"), registry.clone()));

        bridge.connect("Mock-Server").await.unwrap();
        assert!(bridge.is_connected("Mock-Server").await);

        let tool = registry.lookup("mcp_mock_server_ping").await.unwrap();
        assert_eq!(tool.description(), "Reply with pong");

        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn test_connect_twice_reports_already_connected() {
        let registry = Arc::new(ToolRegistry::new());
        let bridge = Arc::new(McpBridge::new(mock_config("m"), registry));

        bridge.connect("m").await.unwrap();
        let err = bridge.connect("m").await.unwrap_err();
        assert!(matches!(err, McpError::AlreadyConnected(_)));

        // ensure_connected treats that as success.
        bridge.ensure_connected("m").await.unwrap();

        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn test_connect_unknown_server() {
        let registry = Arc::new(ToolRegistry::new());
        let bridge = Arc::new(McpBridge::new(McpConfig::default(), registry));
        let err = bridge.connect("ghost").await.unwrap_err();
        assert!(matches!(err, McpError::ServerNotFound(_)));
    }

    #[tokio::test]
    async fn test_call_tool_renders_text_content() {
        let registry = Arc::new(ToolRegistry::new());
        let bridge = Arc::new(McpBridge::new(mock_config("m"), registry.clone()));
        bridge.connect("m").await.unwrap();

        let out = bridge
            .call_tool("m", "ping", &HashMap::new())
            .await
            .unwrap();
        assert_eq!(out, "pong");

        // Through the registry path, as the agent loop would.
        let out = registry
            .invoke("mcp_m_ping", HashMap::new())
            .await
            .unwrap();
        assert_eq!(out, "pong");

        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn test_disconnect_unregisters_tools() {
        let registry = Arc::new(ToolRegistry::new());
        let bridge = Arc::new(McpBridge::new(mock_config("m"), registry.clone()));
        bridge.connect("m").await.unwrap();
        assert!(registry.lookup("mcp_m_ping").await.is_some());

        bridge.disconnect("m").await.unwrap();
        assert!(registry.lookup("mcp_m_ping").await.is_none());
        assert!(!bridge.is_connected("m").await);

        let err = bridge.disconnect("m").await.unwrap_err();
        assert!(matches!(err, McpError::ServerNotFound(_)));
    }

    #[tokio::test]
    async fn test_handshake_failure_terminates_child() {
        // A server that answers initialize without a protocolVersion.
        let script = r#"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  case "$line" in
    *'"initialize"'*) printf '{"jsonrpc":"2.0","id":%s,"result":{}}\n' "$id" ;;
  esac
done
"#;
        let mut servers = HashMap::new();
        servers.insert(
            "bad".to_string(),
            McpServerConfig {
                command: "sh".to_string(),
                args: vec!["-c".to_string(), script.to_string()],
                env: HashMap::new(),
            },
        );
        let registry = Arc::new(ToolRegistry::new());
        let bridge = Arc::new(McpBridge::new(
            McpConfig {
                mcp_servers: servers,
            },
            registry,
        ));

        let err = bridge.connect("bad").await.unwrap_err();
        assert!(matches!(err, McpError::InitializeFailed(_)));
        assert!(!bridge.is_connected("bad").await);
    }
}
