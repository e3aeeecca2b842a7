//! Core memory: labeled, size-bounded blocks compiled into every prompt
//!
//! Blocks are the agent's long-term context. Every mutation re-checks the
//! per-block character limit, schedules a debounced save, and commits a
//! content-addressed version (see [`versions`]).

pub mod versions;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::MemorySectionConfig;
use crate::error::MemoryError;
use crate::persistence::{self, SaveDebouncer, StorePaths};
use versions::{DiffEntry, MemoryVersion, VersionStore};

/// A labeled unit of long-term memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryBlock {
    pub label: String,
    pub value: String,
    pub limit: usize,
    pub description: String,
    #[serde(default)]
    pub read_only: bool,
}

impl MemoryBlock {
    fn chars(&self) -> usize {
        self.value.chars().count()
    }
}

/// Labels every agent starts with.
fn default_blocks(agent: &str) -> Vec<MemoryBlock> {
    vec![
        MemoryBlock {
            label: "persona".to_string(),
            value: format!(
                "I am {}, a local personal assistant. I am direct, resourceful, and I \
                 remember what matters to the people I work with.",
                agent
            ),
            limit: 2000,
            description: "Who the agent is; updated as its character develops".to_string(),
            read_only: false,
        },
        MemoryBlock {
            label: "human".to_string(),
            value: "I have not learned anything about the user yet.".to_string(),
            limit: 2000,
            description: "Durable facts about the user".to_string(),
            read_only: false,
        },
        MemoryBlock {
            label: "short_term".to_string(),
            value: String::new(),
            limit: 1500,
            description: "Scratchpad for the current task; cleared freely".to_string(),
            read_only: false,
        },
        MemoryBlock {
            label: "knowledge".to_string(),
            value: String::new(),
            limit: 3000,
            description: "Accumulated reference notes".to_string(),
            read_only: false,
        },
        MemoryBlock {
            label: "system".to_string(),
            value: "Operate locally. Prefer tools over guessing. Ask before destructive \
                    actions. Keep memory edits small and factual."
                .to_string(),
            limit: 1000,
            description: "Operating rules; fixed at seeding".to_string(),
            read_only: true,
        },
        MemoryBlock {
            label: "capabilities".to_string(),
            value: "Tools are invoked with JSON fragments; memory blocks persist across \
                    sessions; external tool servers may come and go."
                .to_string(),
            limit: 1000,
            description: "What the runtime offers; fixed at seeding".to_string(),
            read_only: true,
        },
    ]
}

/// The agent's structured long-term memory.
pub struct CoreMemory {
    agent: String,
    blocks: Mutex<BTreeMap<String, MemoryBlock>>,
    versions: VersionStore,
    paths: StorePaths,
    /// Absent for ephemeral (sub-agent) memories.
    saver: Option<SaveDebouncer>,
}

impl CoreMemory {
    /// Load blocks from disk, seeding defaults on first run. Limit overrides
    /// from the `[memory]` config section apply on every load, over seeded
    /// defaults and stored blocks alike.
    pub async fn load(
        paths: &StorePaths,
        saver: SaveDebouncer,
        agent: &str,
        config: &MemorySectionConfig,
    ) -> Self {
        let file = paths.core_memory(agent);
        let blocks = match persistence::read_json::<Vec<MemoryBlock>>(&file).await {
            Ok(list) if !list.is_empty() => list,
            _ => {
                tracing::info!("Seeding default memory blocks for agent '{}'", agent);
                let seeded = default_blocks(agent);
                if let Err(e) = persistence::write_json(&file, &seeded).await {
                    tracing::warn!("{}", e);
                }
                seeded
            }
        };

        let mut map: BTreeMap<String, MemoryBlock> =
            blocks.into_iter().map(|b| (b.label.clone(), b)).collect();
        for (label, limit) in &config.limits {
            if let Some(block) = map.get_mut(label) {
                block.limit = *limit;
                if block.chars() > block.limit {
                    tracing::warn!(
                        "Memory block '{}' already exceeds its configured limit of {}",
                        label,
                        limit
                    );
                }
            } else {
                tracing::warn!("Limit override for unknown memory block '{}'", label);
            }
        }

        Self {
            agent: agent.to_string(),
            blocks: Mutex::new(map),
            versions: VersionStore::load(paths).await,
            paths: paths.clone(),
            saver: Some(saver),
        }
    }

    /// Build a sub-agent memory from a parent: `persona`, `human`,
    /// `knowledge` and `capabilities` arrive as read-only copies. The child
    /// memory is ephemeral: blocks are never persisted and its version
    /// snapshots stay in memory.
    pub async fn inherit_from(parent: &CoreMemory) -> Self {
        const INHERITED: [&str; 4] = ["persona", "human", "knowledge", "capabilities"];
        let parent_blocks = parent.blocks.lock().await;

        let mut map = BTreeMap::new();
        for label in INHERITED {
            if let Some(block) = parent_blocks.get(label) {
                let mut copy = block.clone();
                copy.read_only = true;
                map.insert(copy.label.clone(), copy);
            }
        }
        // A private scratchpad so the child can still take notes.
        map.insert(
            "short_term".to_string(),
            MemoryBlock {
                label: "short_term".to_string(),
                value: String::new(),
                limit: 1500,
                description: "Scratchpad for the delegated task".to_string(),
                read_only: false,
            },
        );

        Self {
            agent: format!("{}_delegate", parent.agent),
            blocks: Mutex::new(map),
            versions: VersionStore::in_memory(),
            paths: parent.paths.clone(),
            saver: None,
        }
    }

    pub fn agent(&self) -> &str {
        &self.agent
    }

    /// Compile all blocks into prompt text, labels sorted:
    /// `<label>\nvalue\n</label>`, blank-line separated.
    pub async fn compile(&self) -> String {
        let blocks = self.blocks.lock().await;
        blocks
            .values()
            .map(|b| format!("<{}>\n{}\n</{}>", b.label, b.value, b.label))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub async fn get(&self, label: &str) -> Option<MemoryBlock> {
        self.blocks.lock().await.get(label).cloned()
    }

    /// All blocks, label-ordered.
    pub async fn list(&self) -> Vec<MemoryBlock> {
        self.blocks.lock().await.values().cloned().collect()
    }

    /// Append `content` on a fresh line.
    pub async fn append(&self, label: &str, content: &str) -> Result<(), MemoryError> {
        self.mutate(label, |value| {
            if value.is_empty() {
                content.to_string()
            } else {
                format!("{}\n{}", value, content)
            }
        })
        .await?;
        self.after_mutation(&format!("append({})", label)).await;
        Ok(())
    }

    /// Replace every occurrence of `old` with `new`.
    pub async fn replace(&self, label: &str, old: &str, new: &str) -> Result<(), MemoryError> {
        self.mutate(label, |value| value.replace(old, new)).await?;
        self.after_mutation(&format!("replace({})", label)).await;
        Ok(())
    }

    /// Reset the block's value to empty.
    pub async fn clear(&self, label: &str) -> Result<(), MemoryError> {
        self.mutate(label, |_| String::new()).await?;
        self.after_mutation(&format!("clear({})", label)).await;
        Ok(())
    }

    /// Create a new block. Existing labels are a no-op.
    pub async fn create(
        &self,
        label: &str,
        value: Option<String>,
        limit: Option<usize>,
        description: Option<String>,
    ) -> Result<(), MemoryError> {
        {
            let mut blocks = self.blocks.lock().await;
            if blocks.contains_key(label) {
                return Ok(());
            }
            let limit = limit.unwrap_or(2000);
            let value = value.unwrap_or_default();
            let block = MemoryBlock {
                label: label.to_string(),
                value,
                limit,
                description: description.unwrap_or_default(),
                read_only: false,
            };
            if block.chars() > block.limit {
                return Err(MemoryError::OverLimit {
                    label: label.to_string(),
                    limit,
                });
            }
            blocks.insert(label.to_string(), block);
        }
        self.after_mutation(&format!("create({})", label)).await;
        Ok(())
    }

    /// Commit the current block values as a version.
    pub async fn commit(&self, message: &str) -> MemoryVersion {
        let snapshot = self.snapshot().await;
        self.versions.commit(snapshot, message).await
    }

    /// Apply the snapshot matching `prefix` over the current blocks.
    /// Labels absent from the snapshot are left alone; labels absent from the
    /// block set are recreated without limits enforcement (the snapshot was
    /// valid when committed).
    pub async fn restore(&self, prefix: &str) -> Result<(), MemoryError> {
        let snapshot = self
            .versions
            .rollback(prefix)
            .await
            .ok_or_else(|| MemoryError::SnapshotNotFound(prefix.to_string()))?;

        {
            let mut blocks = self.blocks.lock().await;
            for (label, value) in snapshot {
                match blocks.get_mut(&label) {
                    Some(block) => block.value = value,
                    None => {
                        blocks.insert(
                            label.clone(),
                            MemoryBlock {
                                label,
                                value,
                                limit: 2000,
                                description: "Restored from snapshot".to_string(),
                                read_only: false,
                            },
                        );
                    }
                }
            }
        }
        self.after_mutation(&format!("restore({})", prefix)).await;
        Ok(())
    }

    pub async fn diff(&self, from: &str, to: &str) -> Result<Vec<DiffEntry>, MemoryError> {
        self.versions.diff(from, to).await
    }

    pub async fn log(&self, limit: usize) -> Vec<MemoryVersion> {
        self.versions.log(limit).await
    }

    /// Force pending saves to disk.
    pub async fn flush(&self) {
        if let Some(ref saver) = self.saver {
            saver.flush().await;
        }
    }

    async fn snapshot(&self) -> BTreeMap<String, String> {
        self.blocks
            .lock()
            .await
            .iter()
            .map(|(label, block)| (label.clone(), block.value.clone()))
            .collect()
    }

    async fn mutate<F>(&self, label: &str, f: F) -> Result<(), MemoryError>
    where
        F: FnOnce(&str) -> String,
    {
        let mut blocks = self.blocks.lock().await;
        let block = blocks
            .get_mut(label)
            .ok_or_else(|| MemoryError::BlockNotFound(label.to_string()))?;
        if block.read_only {
            return Err(MemoryError::ReadOnly(label.to_string()));
        }
        let next = f(&block.value);
        if next.chars().count() > block.limit {
            return Err(MemoryError::OverLimit {
                label: label.to_string(),
                limit: block.limit,
            });
        }
        block.value = next;
        Ok(())
    }

    /// Schedule persistence and commit a version after a successful mutation.
    async fn after_mutation(&self, message: &str) {
        if let Some(ref saver) = self.saver {
            let list: Vec<MemoryBlock> = self.list().await;
            saver
                .schedule(self.paths.core_memory(&self.agent), &list)
                .await;
        }
        self.commit(message).await;
    }
}

/// Parse compiled memory text back into label/value pairs. Used to verify
/// that compilation round-trips values containing angle brackets.
pub fn parse_compiled(text: &str) -> BTreeMap<String, String> {
    let mut result = BTreeMap::new();
    let lines: Vec<&str> = text.lines().collect();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        let label = match label_of_open_tag(line) {
            Some(label) => label,
            None => {
                i += 1;
                continue;
            }
        };
        let close = format!("</{}>", label);
        let mut j = i + 1;
        let mut value_lines = Vec::new();
        while j < lines.len() && lines[j] != close {
            value_lines.push(lines[j]);
            j += 1;
        }
        result.insert(label, value_lines.join("\n"));
        i = j + 1;
    }
    result
}

fn label_of_open_tag(line: &str) -> Option<String> {
    let inner = line.strip_prefix('<')?.strip_suffix('>')?;
    if !inner.is_empty()
        && inner
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        Some(inner.to_string())
    } else {
        None
    }
}
