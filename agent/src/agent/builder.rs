//! Runtime assembly
//!
//! Wires persistence, memory, the tool registry, the MCP bridge and the
//! provider router into a ready [`Agent`]. Configured MCP servers are
//! connected eagerly but failures are tolerated; bridged tools reconnect on
//! demand anyway.

use std::sync::Arc;

use anyhow::Result;

use super::{Agent, DelegateTool};
use crate::config::{HearthConfig, McpConfig};
use crate::context;
use crate::llm::{ChatModel, GenerateOptions, ProviderRouter};
use crate::mcp::McpBridge;
use crate::memory::CoreMemory;
use crate::persistence::{SaveDebouncer, StorePaths};
use crate::session::Session;
use crate::tools::{
    register_memory_tools, FsListTool, FsReadTool, FsWriteTool, HttpGetTool, ShellTool,
    ToolRegistry,
};

/// Builder for the full runtime.
pub struct AgentBuilder {
    config: HearthConfig,
    paths: StorePaths,
    mcp_config: Option<McpConfig>,
    model: Option<Arc<dyn ChatModel>>,
    session: Option<Session>,
    connect_servers: bool,
}

impl AgentBuilder {
    pub fn new(config: HearthConfig) -> Self {
        Self {
            config,
            paths: StorePaths::default(),
            mcp_config: None,
            model: None,
            session: None,
            connect_servers: true,
        }
    }

    pub fn with_paths(mut self, paths: StorePaths) -> Self {
        self.paths = paths;
        self
    }

    /// Override the generation backend (tests use a scripted model).
    pub fn with_model(mut self, model: Arc<dyn ChatModel>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn with_mcp_config(mut self, config: McpConfig) -> Self {
        self.mcp_config = Some(config);
        self
    }

    pub fn with_session(mut self, session: Session) -> Self {
        self.session = Some(session);
        self
    }

    /// Skip eager startup connects; servers still connect on demand.
    pub fn defer_server_connects(mut self) -> Self {
        self.connect_servers = false;
        self
    }

    pub async fn build(self) -> Result<AgentRuntime> {
        let saver = SaveDebouncer::new();
        let memory = Arc::new(
            CoreMemory::load(
                &self.paths,
                saver,
                &self.config.agent.name,
                &self.config.memory,
            )
            .await,
        );

        let registry = Arc::new(ToolRegistry::new());
        registry.register(Arc::new(FsReadTool::new())).await?;
        registry.register(Arc::new(FsWriteTool::new())).await?;
        registry.register(Arc::new(FsListTool::new())).await?;
        registry.register(Arc::new(ShellTool::new())).await?;
        registry.register(Arc::new(HttpGetTool::new())).await?;
        registry.register(Arc::new(DelegateTool::new())).await?;
        register_memory_tools(&registry, memory.clone()).await?;

        let mcp_config = match self.mcp_config {
            Some(config) => config,
            None => McpConfig::load(&self.paths)?,
        };
        let bridge = Arc::new(McpBridge::new(mcp_config, registry.clone()));

        if self.connect_servers {
            for name in bridge.servers().await {
                if let Err(e) = bridge.connect(&name).await {
                    tracing::warn!("MCP server '{}' unavailable at startup: {}", name, e);
                }
            }
        }

        let model: Arc<dyn ChatModel> = match self.model {
            Some(model) => model,
            None => Arc::new(ProviderRouter::new(self.config.llm)),
        };

        let description = self
            .config
            .agent
            .description
            .clone()
            .unwrap_or_else(|| context::default_description(&self.config.agent.name));

        let session = self
            .session
            .unwrap_or_else(|| Session::new(self.paths.clone()));

        let agent = Agent::new(
            model,
            registry.clone(),
            memory.clone(),
            session,
            description,
            GenerateOptions::default(),
            self.config.agent.max_steps,
        );

        Ok(AgentRuntime {
            agent,
            registry,
            memory,
            bridge,
        })
    }
}

/// The assembled runtime: the loop plus the long-lived components front-ends
/// talk to directly.
pub struct AgentRuntime {
    pub agent: Agent,
    pub registry: Arc<ToolRegistry>,
    pub memory: Arc<CoreMemory>,
    pub bridge: Arc<McpBridge>,
}

impl AgentRuntime {
    /// Flush pending writes and tear down child processes.
    pub async fn shutdown(&self) {
        self.memory.flush().await;
        self.bridge.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_build_registers_builtin_tools() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = AgentBuilder::new(HearthConfig::default())
            .with_paths(StorePaths::new(dir.path()))
            .with_session(Session::ephemeral())
            .defer_server_connects()
            .build()
            .await
            .unwrap();

        let names: Vec<String> = runtime
            .registry
            .list()
            .await
            .iter()
            .map(|t| t.name().to_string())
            .collect();
        for expected in [
            "delegate",
            "fs_list",
            "fs_read",
            "fs_write",
            "http_get",
            "memory_append",
            "memory_clear",
            "memory_create",
            "memory_replace",
            "shell",
        ] {
            assert!(names.contains(&expected.to_string()), "missing {}", expected);
        }

        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_build_applies_memory_limit_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = HearthConfig::default();
        config.memory.limits.insert("persona".to_string(), 123);

        let runtime = AgentBuilder::new(config)
            .with_paths(StorePaths::new(dir.path()))
            .with_session(Session::ephemeral())
            .defer_server_connects()
            .build()
            .await
            .unwrap();

        assert_eq!(runtime.memory.get("persona").await.unwrap().limit, 123);
        runtime.shutdown().await;
    }
}
