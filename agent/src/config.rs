//! Configuration loading

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::persistence::StorePaths;

/// Tool server configuration (`mcp_servers.json` or a local `.mcp.json`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpConfig {
    #[serde(rename = "mcpServers")]
    pub mcp_servers: HashMap<String, McpServerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
}

impl McpConfig {
    /// Load tool server config.
    ///
    /// Search order:
    /// 1. `.mcp.json` in the current directory (project-local override)
    /// 2. `mcp_servers.json` in the data directory
    /// 3. Empty config
    pub fn load(paths: &StorePaths) -> Result<Self> {
        if let Ok(cwd) = std::env::current_dir() {
            let local = cwd.join(".mcp.json");
            if local.exists() {
                return Self::load_from_path(&local);
            }
        }

        let well_known = paths.mcp_servers();
        if well_known.exists() {
            return Self::load_from_path(&well_known);
        }

        Ok(Self::default())
    }

    /// Load from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: McpConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Write the config to its well-known location.
    pub async fn save(&self, paths: &StorePaths) -> Result<()> {
        crate::persistence::write_json(&paths.mcp_servers(), self).await?;
        Ok(())
    }
}

// ============================================================================
// Runtime Configuration (.hearth.toml)
// ============================================================================

/// Top-level runtime configuration (from .hearth.toml)
#[derive(Debug, Default, Deserialize)]
pub struct HearthConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub agent: AgentSectionConfig,
    #[serde(default)]
    pub memory: MemorySectionConfig,
}

/// LLM provider section
#[derive(Debug, Deserialize)]
pub struct LlmConfig {
    /// Ollama endpoint probed first during auto-detection
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,
    /// Port of a local llama-server instance, probed second
    #[serde(default = "default_llama_server_port")]
    pub llama_server_port: u16,
    /// Explicit model override; auto-detection picks one otherwise
    pub model: Option<String>,
    /// API keys for cloud fallbacks; environment variables take precedence
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub groq_api_key: Option<String>,
}

/// Agent section
#[derive(Debug, Deserialize)]
pub struct AgentSectionConfig {
    #[serde(default = "default_agent_name")]
    pub name: String,
    pub description: Option<String>,
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
}

/// Memory section
#[derive(Debug, Default, Deserialize)]
pub struct MemorySectionConfig {
    /// Per-block character limit overrides, keyed by block label.
    /// Applied on every load, over seeded defaults and stored blocks alike.
    #[serde(default)]
    pub limits: HashMap<String, usize>,
}

// Default value functions
fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_llama_server_port() -> u16 {
    8080
}

fn default_agent_name() -> String {
    "hearth".to_string()
}

fn default_max_steps() -> usize {
    12
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            ollama_url: default_ollama_url(),
            llama_server_port: default_llama_server_port(),
            model: None,
            openai_api_key: None,
            anthropic_api_key: None,
            groq_api_key: None,
        }
    }
}

impl Default for AgentSectionConfig {
    fn default() -> Self {
        Self {
            name: default_agent_name(),
            description: None,
            max_steps: default_max_steps(),
        }
    }
}

impl HearthConfig {
    /// Load config from .hearth.toml in the current directory, falling back
    /// to defaults when absent.
    pub fn load() -> Result<Self> {
        if let Ok(cwd) = std::env::current_dir() {
            let local = cwd.join(".hearth.toml");
            if local.exists() {
                tracing::debug!("Loading config from {}", local.display());
                return Self::load_from_path(&local);
            }
        }
        Ok(Self::default())
    }

    /// Load from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: HearthConfig = toml::from_str(&content)?;
        Ok(config)
    }
}
