//! LLM provider router
//!
//! One `generate` surface over several chat-completion backends. When the
//! caller does not pin a provider, the router probes local backends first
//! (Ollama, then llama-server) and falls back to configured cloud providers
//! (OpenAI, Anthropic, Groq). Detection is cached for the router's lifetime.

mod anthropic;
mod ollama;
mod openai;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::LlmConfig;
use crate::error::ProviderError;

/// Request timeout for local backends.
const LOCAL_TIMEOUT: Duration = Duration::from_secs(120);
/// Request timeout for cloud backends.
const CLOUD_TIMEOUT: Duration = Duration::from_secs(60);
/// Probe timeout during auto-detection.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A message in a conversation. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn tool(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_call_id: None,
            name: Some(name.into()),
        }
    }

    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_call_id: None,
            name: None,
        }
    }
}

/// One completed generation.
#[derive(Debug, Clone)]
pub struct Generation {
    pub content: String,
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
}

/// Provider targets the router can address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Ollama,
    LlamaServer,
    OpenAi,
    Anthropic,
    Groq,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Ollama => "ollama",
            ProviderKind::LlamaServer => "llama-server",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Groq => "groq",
        }
    }
}

/// Per-call options. All fields optional; unset fields fall back to the
/// router's detection and configuration.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub provider: Option<ProviderKind>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub temperature: Option<f32>,
}

/// The generation seam the agent loop drives. The router implements it for
/// production; tests drive the loop with a scripted stub.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn generate(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> Result<Generation, ProviderError>;
}

/// A resolved backend target.
#[derive(Debug, Clone)]
struct Backend {
    kind: ProviderKind,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

/// Router over all configured backends with cumulative token accounting.
pub struct ProviderRouter {
    client: reqwest::Client,
    config: LlmConfig,
    detected: Mutex<Option<Backend>>,
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
}

impl ProviderRouter {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            detected: Mutex::new(None),
            prompt_tokens: AtomicU64::new(0),
            completion_tokens: AtomicU64::new(0),
        }
    }

    /// Cumulative (prompt, completion) token counts across all calls.
    pub fn usage(&self) -> (u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
        )
    }

    /// Drop the cached detection so the next call re-probes backends.
    pub async fn redetect(&self) {
        *self.detected.lock().await = None;
    }

    fn api_key_for(&self, kind: ProviderKind, options: &GenerateOptions) -> Option<String> {
        if let Some(ref key) = options.api_key {
            return Some(key.clone());
        }
        let (env_var, configured) = match kind {
            ProviderKind::OpenAi => ("OPENAI_API_KEY", &self.config.openai_api_key),
            ProviderKind::Anthropic => ("ANTHROPIC_API_KEY", &self.config.anthropic_api_key),
            ProviderKind::Groq => ("GROQ_API_KEY", &self.config.groq_api_key),
            _ => return None,
        };
        std::env::var(env_var).ok().or_else(|| configured.clone())
    }

    fn backend_for(&self, kind: ProviderKind, options: &GenerateOptions) -> Backend {
        let model = options
            .model
            .clone()
            .or_else(|| self.config.model.clone())
            .unwrap_or_else(|| default_model(kind).to_string());
        let base_url = match kind {
            ProviderKind::Ollama => self.config.ollama_url.clone(),
            ProviderKind::LlamaServer => {
                format!("http://localhost:{}", self.config.llama_server_port)
            }
            ProviderKind::OpenAi => "https://api.openai.com".to_string(),
            ProviderKind::Anthropic => "https://api.anthropic.com".to_string(),
            ProviderKind::Groq => "https://api.groq.com".to_string(),
        };
        Backend {
            kind,
            base_url,
            model,
            api_key: self.api_key_for(kind, options),
        }
    }

    /// Probe backends in preference order and cache the first reachable one.
    async fn detect(&self, options: &GenerateOptions) -> Result<Backend, ProviderError> {
        let mut cached = self.detected.lock().await;
        if let Some(ref backend) = *cached {
            return Ok(backend.clone());
        }

        // 1. Local Ollama: prefer a non-cloud model from its tag list.
        if let Some(models) =
            ollama::probe(&self.client, &self.config.ollama_url, PROBE_TIMEOUT).await
        {
            let model = self
                .config
                .model
                .clone()
                .or_else(|| models.iter().find(|m| !m.contains("cloud")).cloned())
                .or_else(|| models.first().cloned());
            if let Some(model) = model {
                tracing::info!("Auto-detected Ollama backend (model {})", model);
                let backend = Backend {
                    kind: ProviderKind::Ollama,
                    base_url: self.config.ollama_url.clone(),
                    model,
                    api_key: None,
                };
                *cached = Some(backend.clone());
                return Ok(backend);
            }
        }

        // 2. Local llama-server: its /health reports ok or loading.
        let llama_url = format!("http://localhost:{}", self.config.llama_server_port);
        if openai::probe_llama_server(&self.client, &llama_url, PROBE_TIMEOUT).await {
            tracing::info!("Auto-detected llama-server backend at {}", llama_url);
            let backend = Backend {
                kind: ProviderKind::LlamaServer,
                base_url: llama_url,
                model: self.config.model.clone().unwrap_or_default(),
                api_key: None,
            };
            *cached = Some(backend.clone());
            return Ok(backend);
        }

        // 3. Cloud providers, first one with a credential.
        for kind in [ProviderKind::OpenAi, ProviderKind::Anthropic, ProviderKind::Groq] {
            if self.api_key_for(kind, options).is_some() {
                tracing::info!("Auto-detected {} backend", kind.as_str());
                let backend = self.backend_for(kind, options);
                *cached = Some(backend.clone());
                return Ok(backend);
            }
        }

        Err(ProviderError::GenerationFailed(
            "no reachable LLM backend: start Ollama (`ollama serve`) or llama-server, \
             or set OPENAI_API_KEY / ANTHROPIC_API_KEY / GROQ_API_KEY"
                .to_string(),
        ))
    }

    fn record_usage(&self, generation: &Generation) {
        if let Some(n) = generation.prompt_tokens {
            self.prompt_tokens.fetch_add(n, Ordering::Relaxed);
        }
        if let Some(n) = generation.completion_tokens {
            self.completion_tokens.fetch_add(n, Ordering::Relaxed);
        }
    }
}

#[async_trait]
impl ChatModel for ProviderRouter {
    async fn generate(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> Result<Generation, ProviderError> {
        let backend = match options.provider {
            Some(kind) => self.backend_for(kind, options),
            None => {
                let mut backend = self.detect(options).await?;
                if let Some(ref model) = options.model {
                    backend.model = model.clone();
                }
                backend
            }
        };

        tracing::debug!(
            "Generating via {} (model {}, {} messages)",
            backend.kind.as_str(),
            backend.model,
            messages.len()
        );

        let generation = match backend.kind {
            ProviderKind::Ollama => {
                ollama::chat(
                    &self.client,
                    &backend.base_url,
                    &backend.model,
                    messages,
                    options.temperature,
                    LOCAL_TIMEOUT,
                )
                .await?
            }
            ProviderKind::LlamaServer => {
                openai::chat(
                    &self.client,
                    &format!("{}/v1/chat/completions", backend.base_url),
                    None,
                    &backend.model,
                    messages,
                    options.temperature,
                    LOCAL_TIMEOUT,
                )
                .await?
            }
            ProviderKind::OpenAi => {
                openai::chat(
                    &self.client,
                    &format!("{}/v1/chat/completions", backend.base_url),
                    backend.api_key.as_deref(),
                    &backend.model,
                    messages,
                    options.temperature,
                    CLOUD_TIMEOUT,
                )
                .await?
            }
            ProviderKind::Groq => {
                openai::chat(
                    &self.client,
                    &format!("{}/openai/v1/chat/completions", backend.base_url),
                    backend.api_key.as_deref(),
                    &backend.model,
                    messages,
                    options.temperature,
                    CLOUD_TIMEOUT,
                )
                .await?
            }
            ProviderKind::Anthropic => {
                anthropic::chat(
                    &self.client,
                    &backend.base_url,
                    backend.api_key.as_deref(),
                    &backend.model,
                    messages,
                    options.temperature,
                    CLOUD_TIMEOUT,
                )
                .await?
            }
        };

        self.record_usage(&generation);
        Ok(generation)
    }
}

fn default_model(kind: ProviderKind) -> &'static str {
    match kind {
        ProviderKind::Ollama => "qwen2.5:7b",
        ProviderKind::LlamaServer => "",
        ProviderKind::OpenAi => "gpt-4o-mini",
        ProviderKind::Anthropic => "claude-3-5-sonnet-20241022",
        ProviderKind::Groq => "llama-3.3-70b-versatile",
    }
}
