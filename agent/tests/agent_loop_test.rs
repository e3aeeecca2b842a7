//! End-to-end agent turns through the assembled runtime

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use hearth_agent::agent::AgentBuilder;
use hearth_agent::config::HearthConfig;
use hearth_agent::error::ProviderError;
use hearth_agent::llm::{ChatModel, GenerateOptions, Generation, Message, Role};
use hearth_agent::persistence::StorePaths;
use hearth_agent::session::Session;

/// Model stub that plays back canned replies and records what it was asked.
struct ScriptedModel {
    replies: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedModel {
    fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn prompt_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    fn last_system_prompt(&self) -> String {
        let prompts = self.prompts.lock().unwrap();
        prompts
            .last()
            .and_then(|messages| messages.first())
            .map(|m| m.content.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn generate(
        &self,
        messages: &[Message],
        _options: &GenerateOptions,
    ) -> Result<Generation, ProviderError> {
        self.prompts.lock().unwrap().push(messages.to_vec());
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ProviderError::GenerationFailed("script exhausted".to_string()))?;
        Ok(Generation {
            content: reply,
            prompt_tokens: Some(10),
            completion_tokens: Some(5),
        })
    }
}

#[tokio::test]
async fn test_turn_with_memory_tool_persists_everything() {
    let dir = tempfile::tempdir().unwrap();
    let paths = StorePaths::new(dir.path());
    let model = ScriptedModel::new(&[
        r#"{"tool_name":"memory_append","tool_args":{"label":"human","content":"Name: Riley"}}"#,
        r#"{"tool_name":"response","tool_args":{"message":"Nice to meet you, Riley."}}"#,
    ]);

    let runtime = AgentBuilder::new(HearthConfig::default())
        .with_paths(paths.clone())
        .with_model(model.clone())
        .defer_server_connects()
        .build()
        .await
        .unwrap();

    let answer = runtime.agent.run_turn("Hi, I'm Riley").await.unwrap();
    assert_eq!(answer, "Nice to meet you, Riley.");
    assert_eq!(model.prompt_count(), 2);

    // The second prompt's system message carries the updated memory.
    assert!(model.last_system_prompt().contains("Name: Riley"));

    // History shape: user, tool, assistant.
    let history = runtime.agent.history().await;
    let roles: Vec<Role> = history.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Tool, Role::Assistant]);

    // Session landed on disk.
    let session_id = runtime.agent.session_id().await;
    assert!(paths.session_file(&session_id).exists());

    // Memory blocks and at least one version landed on disk after flush.
    runtime.shutdown().await;
    assert!(paths.core_memory("hearth").exists());
    let versions = std::fs::read_dir(paths.versions_dir()).unwrap().count();
    assert!(versions >= 1);
}

#[tokio::test]
async fn test_provider_failure_aborts_turn() {
    let dir = tempfile::tempdir().unwrap();
    let model = ScriptedModel::new(&[]);

    let runtime = AgentBuilder::new(HearthConfig::default())
        .with_paths(StorePaths::new(dir.path()))
        .with_model(model)
        .with_session(Session::ephemeral())
        .defer_server_connects()
        .build()
        .await
        .unwrap();

    let err = runtime.agent.run_turn("hello").await.unwrap_err();
    let ProviderError::GenerationFailed(reason) = err;
    assert!(reason.contains("script exhausted"));
    runtime.shutdown().await;
}

#[tokio::test]
async fn test_tool_catalog_is_advertised_in_prompt() {
    let dir = tempfile::tempdir().unwrap();
    let model = ScriptedModel::new(&["fine."]);

    let runtime = AgentBuilder::new(HearthConfig::default())
        .with_paths(StorePaths::new(dir.path()))
        .with_model(model.clone())
        .with_session(Session::ephemeral())
        .defer_server_connects()
        .build()
        .await
        .unwrap();

    runtime.agent.run_turn("hello").await.unwrap();

    let system = model.last_system_prompt();
    for expected in ["fs_read", "shell", "http_get", "memory_append", "delegate"] {
        assert!(system.contains(expected), "prompt missing {}", expected);
    }
    assert!(system.contains("\"tool_name\": \"response\""));
    runtime.shutdown().await;
}
