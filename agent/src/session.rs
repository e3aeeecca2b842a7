//! Session history: an append-only message log per conversation

use uuid::Uuid;

use crate::error::PersistenceError;
use crate::llm::Message;
use crate::persistence::{self, StorePaths};

/// One conversation's working state. Messages are append-only; the whole
/// array is persisted as `sessions/<id>.json`. Ephemeral sessions (used by
/// delegated sub-agents) skip persistence entirely.
pub struct Session {
    id: String,
    messages: Vec<Message>,
    paths: Option<StorePaths>,
}

impl Session {
    /// Start a fresh persisted session.
    pub fn new(paths: StorePaths) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            messages: Vec::new(),
            paths: Some(paths),
        }
    }

    /// An in-memory session that never touches disk.
    pub fn ephemeral() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            messages: Vec::new(),
            paths: None,
        }
    }

    /// Load an existing session by id; absent files start empty.
    pub async fn load(paths: StorePaths, id: &str) -> Self {
        let messages: Vec<Message> = persistence::read_json(&paths.session_file(id))
            .await
            .unwrap_or_default();
        Self {
            id: id.to_string(),
            messages,
            paths: Some(paths),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Write the full message array atomically. Failures are reported but the
    /// in-memory log stays authoritative.
    pub async fn persist(&self) -> Result<(), PersistenceError> {
        let Some(ref paths) = self.paths else {
            return Ok(());
        };
        persistence::write_json(&paths.session_file(&self.id), &self.messages).await
    }
}
