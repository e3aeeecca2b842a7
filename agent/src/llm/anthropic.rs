//! Anthropic Messages API backend
//!
//! Anthropic keeps the system prompt out of the message array: leading system
//! messages are folded into a single `system` string before the request is
//! shaped.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use super::{Generation, Message, Role};
use crate::error::ProviderError;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u64 = 4096;

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: Option<u64>,
    #[serde(default)]
    output_tokens: Option<u64>,
}

pub async fn chat(
    client: &reqwest::Client,
    base_url: &str,
    api_key: Option<&str>,
    model: &str,
    messages: &[Message],
    temperature: Option<f32>,
    timeout: Duration,
) -> Result<Generation, ProviderError> {
    let key = api_key.ok_or_else(|| {
        ProviderError::GenerationFailed("anthropic backend requires an API key".to_string())
    })?;

    let (system, rest) = split_system(messages);

    let mut body = json!({
        "model": model,
        "max_tokens": MAX_TOKENS,
        "messages": rest,
    });
    if let Some(system) = system {
        body["system"] = json!(system);
    }
    if let Some(t) = temperature {
        body["temperature"] = json!(t);
    }

    let response = client
        .post(format!("{}/v1/messages", base_url))
        .timeout(timeout)
        .header("x-api-key", key)
        .header("anthropic-version", ANTHROPIC_VERSION)
        .json(&body)
        .send()
        .await
        .map_err(|e| ProviderError::GenerationFailed(format!("anthropic request failed: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        let detail = response.text().await.unwrap_or_default();
        return Err(ProviderError::GenerationFailed(format!(
            "anthropic returned {}: {}",
            status, detail
        )));
    }

    let parsed: MessagesResponse = response.json().await.map_err(|e| {
        ProviderError::GenerationFailed(format!("malformed anthropic response: {}", e))
    })?;

    let content = parsed
        .content
        .first()
        .and_then(|b| b.text.clone())
        .ok_or_else(|| {
            ProviderError::GenerationFailed("anthropic response had no text content".to_string())
        })?;

    let (prompt_tokens, completion_tokens) = match parsed.usage {
        Some(usage) => (usage.input_tokens, usage.output_tokens),
        None => (None, None),
    };

    Ok(Generation {
        content,
        prompt_tokens,
        completion_tokens,
    })
}

/// Fold leading system messages into one string; map the rest onto the
/// user/assistant alternation Anthropic expects (tool output travels as a
/// user message).
fn split_system(messages: &[Message]) -> (Option<String>, Vec<serde_json::Value>) {
    let mut system_parts = Vec::new();
    let mut rest = Vec::new();

    for message in messages {
        match message.role {
            Role::System if rest.is_empty() => system_parts.push(message.content.clone()),
            Role::System => rest.push(json!({"role": "user", "content": message.content})),
            Role::User => rest.push(json!({"role": "user", "content": message.content})),
            Role::Assistant => rest.push(json!({"role": "assistant", "content": message.content})),
            Role::Tool => rest.push(json!({
                "role": "user",
                "content": format!("[tool output] {}", message.content),
            })),
        }
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };
    (system, rest)
}
