//! Content-addressed memory snapshots
//!
//! Every commit hashes the full block set (SHA-256 over `label:value` pairs,
//! label-sorted, newline-joined) and chains to its parent. Committing an
//! unchanged block set is a no-op. At most 100 versions are retained; the
//! oldest file is deleted when the ring buffer overflows.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::error::MemoryError;
use crate::persistence::{self, StorePaths};

/// Retained snapshot count.
const MAX_VERSIONS: usize = 100;

/// One committed snapshot of all memory blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryVersion {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub blocks: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub message: String,
}

/// How one label changed between two versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Removed,
    Modified,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffEntry {
    pub label: String,
    pub change: ChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new: Option<String>,
}

/// SHA-256 of the canonical block text: `label:value` pairs sorted by label,
/// joined with newlines, hex-encoded.
pub fn content_hash(blocks: &BTreeMap<String, String>) -> String {
    let canonical = blocks
        .iter()
        .map(|(label, value)| format!("{}:{}", label, value))
        .collect::<Vec<_>>()
        .join("\n");
    let digest = Sha256::digest(canonical.as_bytes());
    hex_encode(&digest)
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Store of committed versions, most recent first. Backed by one file per
/// version, except in-memory stores (used by sub-agent memories), which
/// never touch disk.
pub struct VersionStore {
    paths: Option<StorePaths>,
    versions: Mutex<Vec<MemoryVersion>>,
}

impl VersionStore {
    /// A store that keeps versions only for the lifetime of the process.
    pub fn in_memory() -> Self {
        Self {
            paths: None,
            versions: Mutex::new(Vec::new()),
        }
    }

    /// Load every `v_*.json` under the versions directory.
    pub async fn load(paths: &StorePaths) -> Self {
        let dir = paths.versions_dir();
        let mut versions = Vec::new();

        if let Ok(mut entries) = tokio::fs::read_dir(&dir).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();
                let is_version = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with("v_") && n.ends_with(".json"))
                    .unwrap_or(false);
                if !is_version {
                    continue;
                }
                match persistence::read_json::<MemoryVersion>(&path).await {
                    Ok(version) => versions.push(version),
                    Err(e) => tracing::warn!("Skipping unreadable version file: {}", e),
                }
            }
        }

        versions.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        versions.truncate(MAX_VERSIONS);

        Self {
            paths: Some(paths.clone()),
            versions: Mutex::new(versions),
        }
    }

    /// Commit the given block values. Returns the head unchanged when the
    /// content hash matches it.
    pub async fn commit(
        &self,
        blocks: BTreeMap<String, String>,
        message: &str,
    ) -> MemoryVersion {
        let id = content_hash(&blocks);
        let mut versions = self.versions.lock().await;

        if let Some(head) = versions.first() {
            if head.id == id {
                return head.clone();
            }
        }

        let version = MemoryVersion {
            id: id.clone(),
            timestamp: Utc::now(),
            blocks,
            parent_id: versions.first().map(|head| head.id.clone()),
            message: message.to_string(),
        };

        versions.insert(0, version.clone());

        // Ring buffer: evict the oldest version and its file.
        while versions.len() > MAX_VERSIONS {
            if let Some(evicted) = versions.pop() {
                if let Some(ref paths) = self.paths {
                    let path = paths.version_file(&evicted.id);
                    if let Err(e) = tokio::fs::remove_file(&path).await {
                        tracing::debug!("Could not remove evicted version {:?}: {}", path, e);
                    }
                }
            }
        }
        drop(versions);

        if let Some(ref paths) = self.paths {
            let path = paths.version_file(&id);
            if let Err(e) = persistence::write_json(&path, &version).await {
                tracing::warn!("{}", e);
            }
        }

        tracing::debug!("Committed memory version {} ({})", &id[..16.min(id.len())], message);
        version
    }

    /// Current head, if any commit exists.
    pub async fn head(&self) -> Option<MemoryVersion> {
        self.versions.lock().await.first().cloned()
    }

    /// Block snapshot of the version whose id starts with `prefix`. Does not
    /// mutate anything; the caller decides whether to apply it.
    pub async fn rollback(&self, prefix: &str) -> Option<BTreeMap<String, String>> {
        self.versions
            .lock()
            .await
            .iter()
            .find(|v| v.id.starts_with(prefix))
            .map(|v| v.blocks.clone())
    }

    /// Label-level differences between two versions, unchanged labels omitted.
    pub async fn diff(
        &self,
        from_prefix: &str,
        to_prefix: &str,
    ) -> Result<Vec<DiffEntry>, MemoryError> {
        let versions = self.versions.lock().await;
        let from = versions
            .iter()
            .find(|v| v.id.starts_with(from_prefix))
            .ok_or_else(|| MemoryError::SnapshotNotFound(from_prefix.to_string()))?;
        let to = versions
            .iter()
            .find(|v| v.id.starts_with(to_prefix))
            .ok_or_else(|| MemoryError::SnapshotNotFound(to_prefix.to_string()))?;

        let mut labels: Vec<&String> = from.blocks.keys().chain(to.blocks.keys()).collect();
        labels.sort();
        labels.dedup();

        let mut entries = Vec::new();
        for label in labels {
            let old = from.blocks.get(label);
            let new = to.blocks.get(label);
            let entry = match (old, new) {
                (None, Some(new)) => DiffEntry {
                    label: label.clone(),
                    change: ChangeKind::Added,
                    old: None,
                    new: Some(new.clone()),
                },
                (Some(old), None) => DiffEntry {
                    label: label.clone(),
                    change: ChangeKind::Removed,
                    old: Some(old.clone()),
                    new: None,
                },
                (Some(old), Some(new)) if old != new => DiffEntry {
                    label: label.clone(),
                    change: ChangeKind::Modified,
                    old: Some(old.clone()),
                    new: Some(new.clone()),
                },
                _ => continue,
            };
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Most-recent-first listing.
    pub async fn log(&self, limit: usize) -> Vec<MemoryVersion> {
        self.versions.lock().await.iter().take(limit).cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.versions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.versions.lock().await.is_empty()
    }
}
