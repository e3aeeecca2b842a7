//! Durable state: atomic JSON files and the debounced save actor
//!
//! All durable state is JSON written atomically (write to a temp file in the
//! same directory, then rename). Rapid memory-block mutations coalesce through
//! [`SaveDebouncer`], which holds the latest payload per path and flushes it
//! after a quiet window; `flush()` guarantees pending writes land before
//! shutdown.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::error::PersistenceError;

/// Coalescing window for debounced saves.
const SAVE_WINDOW: Duration = Duration::from_secs(2);

/// Application-support root: `<data_dir>/hearth`.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("hearth")
}

/// Well-known file locations under one data root.
#[derive(Debug, Clone)]
pub struct StorePaths {
    root: PathBuf,
}

impl StorePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `core_memory_<agent>.json` — array of memory blocks.
    pub fn core_memory(&self, agent: &str) -> PathBuf {
        self.root.join(format!("core_memory_{}.json", agent))
    }

    /// `memory_versions/` — one version per file.
    pub fn versions_dir(&self) -> PathBuf {
        self.root.join("memory_versions")
    }

    /// `v_<id16>.json` inside the versions directory.
    pub fn version_file(&self, id: &str) -> PathBuf {
        let short: String = id.chars().take(16).collect();
        self.versions_dir().join(format!("v_{}.json", short))
    }

    /// `mcp_servers.json` — tool server configurations.
    pub fn mcp_servers(&self) -> PathBuf {
        self.root.join("mcp_servers.json")
    }

    /// `sessions/` — one message array per session.
    pub fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }

    pub fn session_file(&self, id: &str) -> PathBuf {
        self.sessions_dir().join(format!("{}.json", id))
    }
}

impl Default for StorePaths {
    fn default() -> Self {
        Self::new(default_data_dir())
    }
}

/// Serialize `value` as pretty JSON and write it atomically.
pub async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistenceError> {
    let body = serde_json::to_vec_pretty(value).map_err(|e| PersistenceError::WriteFailed {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    write_atomic(path, &body).await
}

async fn write_atomic(path: &Path, body: &[u8]) -> Result<(), PersistenceError> {
    let fail = |reason: String| PersistenceError::WriteFailed {
        path: path.display().to_string(),
        reason,
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| fail(e.to_string()))?;
    }

    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, body)
        .await
        .map_err(|e| fail(e.to_string()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| fail(e.to_string()))?;
    Ok(())
}

/// Read and deserialize a JSON file.
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, PersistenceError> {
    let fail = |reason: String| PersistenceError::ReadFailed {
        path: path.display().to_string(),
        reason,
    };
    let body = tokio::fs::read(path).await.map_err(|e| fail(e.to_string()))?;
    serde_json::from_slice(&body).map_err(|e| fail(e.to_string()))
}

// =============================================================================
// Debounced save actor
// =============================================================================

enum SaveCommand {
    /// Replace the pending payload for `path`; restarts the quiet window.
    Write {
        path: PathBuf,
        payload: serde_json::Value,
    },
    /// Write everything pending now, then acknowledge.
    Flush(oneshot::Sender<()>),
}

/// Handle to the background save task. Clone-cheap; dropping every handle
/// flushes outstanding writes and stops the task.
#[derive(Clone)]
pub struct SaveDebouncer {
    tx: mpsc::Sender<SaveCommand>,
}

impl SaveDebouncer {
    pub fn new() -> Self {
        Self::with_window(SAVE_WINDOW)
    }

    pub fn with_window(window: Duration) -> Self {
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(run_saver(rx, window));
        Self { tx }
    }

    /// Schedule `value` to be written to `path` once the window elapses.
    /// Later schedules for the same path supersede earlier ones.
    pub async fn schedule<T: Serialize>(&self, path: PathBuf, value: &T) {
        let payload = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("Failed to serialize payload for {:?}: {}", path, e);
                return;
            }
        };
        if self
            .tx
            .send(SaveCommand::Write { path, payload })
            .await
            .is_err()
        {
            tracing::warn!("Save task is gone; dropping scheduled write");
        }
    }

    /// Force all pending writes to disk. Returns once they have landed.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(SaveCommand::Flush(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
    }
}

impl Default for SaveDebouncer {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_saver(mut rx: mpsc::Receiver<SaveCommand>, window: Duration) {
    let mut pending: HashMap<PathBuf, serde_json::Value> = HashMap::new();
    let mut deadline: Option<Instant> = None;

    loop {
        let timer = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            cmd = rx.recv() => match cmd {
                Some(SaveCommand::Write { path, payload }) => {
                    pending.insert(path, payload);
                    deadline = Some(Instant::now() + window);
                }
                Some(SaveCommand::Flush(ack)) => {
                    write_pending(&mut pending).await;
                    deadline = None;
                    let _ = ack.send(());
                }
                None => {
                    // All handles dropped: flush and exit.
                    write_pending(&mut pending).await;
                    return;
                }
            },
            _ = timer => {
                write_pending(&mut pending).await;
                deadline = None;
            }
        }
    }
}

async fn write_pending(pending: &mut HashMap<PathBuf, serde_json::Value>) {
    for (path, payload) in pending.drain() {
        if let Err(e) = write_json(&path, &payload).await {
            // Write failures are non-fatal: state stays in memory.
            tracing::warn!("{}", e);
        }
    }
}
