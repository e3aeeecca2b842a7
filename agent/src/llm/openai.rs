//! OpenAI-compatible chat completions (OpenAI, Groq, llama-server)
//!
//! All three speak the same request/response shape; they differ only in URL
//! and authentication, which the router supplies.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use super::{Generation, Message, Role};
use crate::error::ProviderError;

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: Option<u64>,
    #[serde(default)]
    completion_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    #[serde(default)]
    status: String,
}

/// Probe a llama-server `/health` endpoint. Reachable means the status body
/// reports `ok` or `loading model`.
pub async fn probe_llama_server(
    client: &reqwest::Client,
    base_url: &str,
    timeout: Duration,
) -> bool {
    let Ok(response) = client
        .get(format!("{}/health", base_url))
        .timeout(timeout)
        .send()
        .await
    else {
        return false;
    };
    match response.json::<HealthResponse>().await {
        Ok(health) => health.status == "ok" || health.status == "loading model",
        Err(_) => false,
    }
}

/// `POST` an OpenAI-style chat completion to `url`.
pub async fn chat(
    client: &reqwest::Client,
    url: &str,
    api_key: Option<&str>,
    model: &str,
    messages: &[Message],
    temperature: Option<f32>,
    timeout: Duration,
) -> Result<Generation, ProviderError> {
    let mut body = json!({
        "model": model,
        "messages": wire_messages(messages),
        "stream": false,
    });
    if let Some(t) = temperature {
        body["temperature"] = json!(t);
    }

    let mut request = client.post(url).timeout(timeout).json(&body);
    if let Some(key) = api_key {
        request = request.bearer_auth(key);
    }

    let response = request
        .send()
        .await
        .map_err(|e| ProviderError::GenerationFailed(format!("request to {} failed: {}", url, e)))?;

    let status = response.status();
    if !status.is_success() {
        let detail = response.text().await.unwrap_or_default();
        return Err(ProviderError::GenerationFailed(format!(
            "{} returned {}: {}",
            url, status, detail
        )));
    }

    let parsed: ChatCompletionResponse = response.json().await.map_err(|e| {
        ProviderError::GenerationFailed(format!("malformed chat completion response: {}", e))
    })?;

    let content = parsed
        .choices
        .first()
        .and_then(|c| c.message.content.clone())
        .ok_or_else(|| {
            ProviderError::GenerationFailed("chat completion response had no choices".to_string())
        })?;

    let (prompt_tokens, completion_tokens) = match parsed.usage {
        Some(usage) => (usage.prompt_tokens, usage.completion_tokens),
        None => (None, None),
    };

    Ok(Generation {
        content,
        prompt_tokens,
        completion_tokens,
    })
}

fn wire_messages(messages: &[Message]) -> Vec<serde_json::Value> {
    messages
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            };
            json!({ "role": role, "content": m.content })
        })
        .collect()
}
