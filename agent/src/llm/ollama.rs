//! Ollama backend (native /api/chat endpoint)

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use super::{Generation, Message};
use crate::error::ProviderError;

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TaggedModel>,
}

#[derive(Debug, Deserialize)]
struct TaggedModel {
    name: String,
}

/// Probe `GET /api/tags`; returns the installed model names when reachable.
pub async fn probe(
    client: &reqwest::Client,
    base_url: &str,
    timeout: Duration,
) -> Option<Vec<String>> {
    let response = client
        .get(format!("{}/api/tags", base_url))
        .timeout(timeout)
        .send()
        .await
        .ok()?;
    if !response.status().is_success() {
        return None;
    }
    let tags: TagsResponse = response.json().await.ok()?;
    Some(tags.models.into_iter().map(|m| m.name).collect())
}

/// `POST /api/chat` with `stream: false`.
pub async fn chat(
    client: &reqwest::Client,
    base_url: &str,
    model: &str,
    messages: &[Message],
    temperature: Option<f32>,
    timeout: Duration,
) -> Result<Generation, ProviderError> {
    let mut options = json!({ "num_predict": 4096 });
    if let Some(t) = temperature {
        options["temperature"] = json!(t);
    }

    let body = json!({
        "model": model,
        "messages": wire_messages(messages),
        "stream": false,
        "options": options,
    });

    let response = client
        .post(format!("{}/api/chat", base_url))
        .timeout(timeout)
        .json(&body)
        .send()
        .await
        .map_err(|e| ProviderError::GenerationFailed(format!("ollama request failed: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        let detail = response.text().await.unwrap_or_default();
        return Err(ProviderError::GenerationFailed(format!(
            "ollama returned {}: {}",
            status, detail
        )));
    }

    let parsed: ChatResponse = response
        .json()
        .await
        .map_err(|e| ProviderError::GenerationFailed(format!("malformed ollama response: {}", e)))?;

    Ok(Generation {
        content: parsed.message.content,
        prompt_tokens: parsed.prompt_eval_count,
        completion_tokens: parsed.eval_count,
    })
}

fn wire_messages(messages: &[Message]) -> Vec<serde_json::Value> {
    messages
        .iter()
        .map(|m| {
            json!({
                "role": role_str(m),
                "content": m.content,
            })
        })
        .collect()
}

fn role_str(m: &Message) -> &'static str {
    match m.role {
        super::Role::System => "system",
        super::Role::User => "user",
        super::Role::Assistant => "assistant",
        super::Role::Tool => "tool",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_messages_roles() {
        let messages = vec![
            Message::system("s"),
            Message::user("u"),
            Message::assistant("a"),
            Message::tool("t", "out"),
        ];
        let wire = wire_messages(&messages);
        let roles: Vec<&str> = wire.iter().map(|m| m["role"].as_str().unwrap()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "tool"]);
        assert_eq!(wire[3]["content"], "out");
    }

    #[test]
    fn test_chat_response_parse() {
        let raw = r#"{
            "model": "qwen2.5:7b",
            "message": {"role": "assistant", "content": "hello"},
            "prompt_eval_count": 12,
            "eval_count": 7,
            "done": true
        }"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.message.content, "hello");
        assert_eq!(parsed.prompt_eval_count, Some(12));
        assert_eq!(parsed.eval_count, Some(7));
    }

    #[test]
    fn test_tags_response_parse() {
        let raw = r#"{"models": [{"name": "qwen2.5:7b"}, {"name": "llama3-cloud"}]}"#;
        let parsed: TagsResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.models.len(), 2);
        assert_eq!(parsed.models[0].name, "qwen2.5:7b");
    }
}
