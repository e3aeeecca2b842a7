//! One live MCP server connection
//!
//! Owns the child process and its three pipes. A reader task splits stdout
//! into newline-delimited frames and resolves awaiters by request id; stderr
//! is drained continuously so the child never blocks on it. The pending map
//! follows a remove-on-resolve rule: whichever path removes an awaiter
//! (reader, timeout, write failure, teardown) is the one that resolves it,
//! so every request resolves exactly once.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::protocol::{IncomingFrame, JsonRpcNotification, JsonRpcRequest, ToolInfo};
use crate::config::McpServerConfig;
use crate::error::McpError;

/// Inactivity timeout from request send to response.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Cap on buffered, not-yet-newline-terminated child output.
pub(crate) const MAX_BUFFER_BYTES: usize = 10 * 1024 * 1024;

/// Directories appended to `PATH` when resolving a bare command name.
const EXTRA_PATH_DIRS: &[&str] = &[
    "/opt/homebrew/bin",
    "/opt/homebrew/sbin",
    "/usr/local/bin",
    "/usr/bin",
    "/bin",
    "/usr/sbin",
    "/sbin",
];

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, McpError>>>>>;

#[derive(Debug)]
pub struct McpConnection {
    name: String,
    child: tokio::sync::Mutex<Child>,
    stdin: tokio::sync::Mutex<ChildStdin>,
    pending: PendingMap,
    next_id: Arc<AtomicU64>,
    reader: JoinHandle<()>,
    stderr_task: JoinHandle<()>,
    tools: Mutex<Vec<ToolInfo>>,
    initialized: AtomicBool,
}

impl McpConnection {
    /// Launch the configured child with piped stdio. The request id counter
    /// is shared across the owning bridge so ids stay monotonic per process.
    pub async fn spawn(
        name: &str,
        config: &McpServerConfig,
        next_id: Arc<AtomicU64>,
    ) -> Result<Self, McpError> {
        let program = resolve_executable(&config.command);
        tracing::debug!("Spawning MCP server '{}': {:?}", name, program);

        let mut cmd = Command::new(&program);
        if !config.args.is_empty() {
            cmd.args(&config.args);
        }
        for (key, value) in &config.env {
            let expanded = shellexpand::env(value).unwrap_or_else(|_| value.clone().into());
            cmd.env(key, expanded.as_ref());
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            McpError::ProcessLaunchFailed(format!("{}: {}", config.command, e))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::ProcessLaunchFailed("stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::ProcessLaunchFailed("stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| McpError::ProcessLaunchFailed("stderr not captured".to_string()))?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let reader = tokio::spawn(run_reader(name.to_string(), stdout, pending.clone()));

        let stderr_name = name.to_string();
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!("[{} stderr] {}", stderr_name, line);
            }
        });

        Ok(Self {
            name: name.to_string(),
            child: tokio::sync::Mutex::new(child),
            stdin: tokio::sync::Mutex::new(stdin),
            pending,
            next_id,
            reader,
            stderr_task,
            tools: Mutex::new(Vec::new()),
            initialized: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_initialized(&self) {
        self.initialized.store(true, Ordering::SeqCst);
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn set_tools(&self, tools: Vec<ToolInfo>) {
        *self.tools.lock().expect("tools lock") = tools;
    }

    pub fn tools(&self) -> Vec<ToolInfo> {
        self.tools.lock().expect("tools lock").clone()
    }

    /// Whether the child process is still running.
    pub async fn is_alive(&self) -> bool {
        matches!(self.child.lock().await.try_wait(), Ok(None))
    }

    /// Issue a request and await its response.
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, McpError> {
        self.send_request_with_timeout(method, params, REQUEST_TIMEOUT)
            .await
    }

    pub(crate) async fn send_request_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let frame = JsonRpcRequest::new(id, method, params);
        let mut line =
            serde_json::to_vec(&frame).map_err(|e| McpError::WriteError(e.to_string()))?;
        line.push(b'\n');

        let (tx, mut rx) = oneshot::channel();
        self.pending.lock().expect("pending lock").insert(id, tx);

        let write_result = {
            let mut stdin = self.stdin.lock().await;
            async {
                stdin.write_all(&line).await?;
                stdin.flush().await
            }
            .await
        };
        if let Err(e) = write_result {
            self.pending.lock().expect("pending lock").remove(&id);
            return Err(McpError::WriteError(e.to_string()));
        }

        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(resolution)) => resolution,
            // Sender dropped without resolving: teardown raced us.
            Ok(Err(_)) => Err(McpError::ServerDisconnected),
            Err(_) => {
                // Whoever removes the awaiter resolves it. If the reader beat
                // us to the removal, its result is already in flight.
                let removed = self.pending.lock().expect("pending lock").remove(&id).is_some();
                if removed {
                    Err(McpError::Timeout)
                } else {
                    match rx.await {
                        Ok(resolution) => resolution,
                        Err(_) => Err(McpError::ServerDisconnected),
                    }
                }
            }
        }
    }

    /// Fire-and-forget notification.
    pub async fn send_notification(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(), McpError> {
        let frame = JsonRpcNotification::new(method, params);
        let mut line =
            serde_json::to_vec(&frame).map_err(|e| McpError::WriteError(e.to_string()))?;
        line.push(b'\n');

        let mut stdin = self.stdin.lock().await;
        async {
            stdin.write_all(&line).await?;
            stdin.flush().await
        }
        .await
        .map_err(|e| McpError::WriteError(e.to_string()))
    }

    /// Tear the connection down: detach the reader first so no new
    /// resolutions arrive, then fail everything in flight, then kill the
    /// child.
    pub async fn terminate(&self) {
        self.reader.abort();
        self.stderr_task.abort();
        fail_all_pending(&self.pending);

        let mut child = self.child.lock().await;
        if let Err(e) = child.kill().await {
            tracing::debug!("Could not kill MCP server '{}': {}", self.name, e);
        }
    }

    #[cfg(test)]
    pub(crate) fn pending_len(&self) -> usize {
        self.pending.lock().expect("pending lock").len()
    }
}

/// Resolve a bare command name against `PATH` plus the conventional tool
/// directories; paths containing a separator are used as given.
fn resolve_executable(command: &str) -> PathBuf {
    if command.contains('/') {
        return PathBuf::from(command);
    }

    let mut dirs: Vec<PathBuf> = std::env::var_os("PATH")
        .map(|p| std::env::split_paths(&p).collect())
        .unwrap_or_default();
    dirs.extend(EXTRA_PATH_DIRS.iter().map(PathBuf::from));

    for dir in dirs {
        let candidate = dir.join(command);
        if candidate.is_file() {
            return candidate;
        }
    }
    PathBuf::from(command)
}

async fn run_reader(name: String, mut stdout: ChildStdout, pending: PendingMap) {
    let mut buf: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 8192];

    loop {
        match stdout.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                for line in drain_lines(&mut buf) {
                    handle_line(&name, &line, &pending);
                }
                enforce_buffer_cap(&name, &mut buf);
            }
        }
    }

    tracing::debug!("MCP server '{}' closed its stdout", name);
    fail_all_pending(&pending);
}

/// Split complete newline-terminated lines out of `buf`, leaving any partial
/// trailing line in place.
fn drain_lines(buf: &mut Vec<u8>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
        let line: Vec<u8> = buf.drain(..=pos).collect();
        let text = String::from_utf8_lossy(&line[..line.len() - 1]).into_owned();
        if !text.trim().is_empty() {
            lines.push(text);
        }
    }
    lines
}

/// Drop the buffer when a single unterminated line outgrows the cap; a
/// misbehaving child must not grow our memory without bound. Returns whether
/// the buffer was dropped.
fn enforce_buffer_cap(name: &str, buf: &mut Vec<u8>) -> bool {
    if buf.len() > MAX_BUFFER_BYTES {
        tracing::warn!(
            "MCP server '{}' exceeded the {} byte input buffer; dropping buffered data",
            name,
            MAX_BUFFER_BYTES
        );
        buf.clear();
        return true;
    }
    false
}

fn handle_line(name: &str, line: &str, pending: &PendingMap) {
    let frame: IncomingFrame = match serde_json::from_str(line) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!("MCP server '{}' sent unparseable line: {}", name, e);
            return;
        }
    };

    if let Some(id) = frame.id {
        let awaiter = pending.lock().expect("pending lock").remove(&id);
        let Some(awaiter) = awaiter else {
            // Timed out or never ours; late responses are dropped silently.
            tracing::debug!("MCP server '{}' answered unknown request id {}", name, id);
            return;
        };

        let resolution = if let Some(error) = frame.error {
            Err(McpError::JsonRpcError {
                code: error.code,
                message: error.message,
            })
        } else if let Some(result) = frame.result {
            Ok(result)
        } else {
            Err(McpError::InvalidResponse(
                "response carried neither result nor error".to_string(),
            ))
        };
        let _ = awaiter.send(resolution);
    } else if let Some(method) = frame.method {
        tracing::debug!("MCP server '{}' notification: {}", name, method);
    }
}

fn fail_all_pending(pending: &PendingMap) {
    let drained: Vec<_> = {
        let mut map = pending.lock().expect("pending lock");
        map.drain().collect()
    };
    for (_, awaiter) in drained {
        let _ = awaiter.send(Err(McpError::ServerDisconnected));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending() -> PendingMap {
        Arc::new(Mutex::new(HashMap::new()))
    }

    #[test]
    fn test_drain_lines_keeps_partial_tail() {
        let mut buf = b"{\"id\":1}\n{\"id\":2}\n{\"par".to_vec();
        let lines = drain_lines(&mut buf);
        assert_eq!(lines, vec!["{\"id\":1}", "{\"id\":2}"]);
        assert_eq!(buf, b"{\"par".to_vec());
    }

    #[test]
    fn test_drain_lines_skips_blank_lines() {
        let mut buf = b"\n\n{\"id\":1}\n".to_vec();
        let lines = drain_lines(&mut buf);
        assert_eq!(lines.len(), 1);
    }

    #[test]
    fn test_buffer_cap_boundary() {
        let mut at_cap = vec![b'x'; MAX_BUFFER_BYTES];
        assert!(!enforce_buffer_cap("test", &mut at_cap));
        assert_eq!(at_cap.len(), MAX_BUFFER_BYTES);

        let mut over_cap = vec![b'x'; MAX_BUFFER_BYTES + 1];
        assert!(enforce_buffer_cap("test", &mut over_cap));
        assert!(over_cap.is_empty());
    }

    #[test]
    fn test_handle_line_resolves_success() {
        let pending = pending();
        let (tx, mut rx) = oneshot::channel();
        pending.lock().unwrap().insert(3, tx);

        handle_line("t", r#"{"jsonrpc":"2.0","id":3,"result":{"ok":true}}"#, &pending);

        let resolution = rx.try_recv().unwrap().unwrap();
        assert_eq!(resolution["ok"], true);
        assert!(pending.lock().unwrap().is_empty());
    }

    #[test]
    fn test_handle_line_resolves_error() {
        let pending = pending();
        let (tx, mut rx) = oneshot::channel();
        pending.lock().unwrap().insert(4, tx);

        handle_line(
            "t",
            r#"{"jsonrpc":"2.0","id":4,"error":{"code":-32000,"message":"boom"}}"#,
            &pending,
        );

        let err = rx.try_recv().unwrap().unwrap_err();
        assert!(matches!(err, McpError::JsonRpcError { code: -32000, .. }));
    }

    #[test]
    fn test_handle_line_ignores_unknown_id() {
        let pending = pending();
        // No awaiter installed: a late reply after timeout.
        handle_line("t", r#"{"jsonrpc":"2.0","id":9,"result":{}}"#, &pending);
        assert!(pending.lock().unwrap().is_empty());
    }

    #[test]
    fn test_handle_line_notification_is_logged_only() {
        let pending = pending();
        handle_line(
            "t",
            r#"{"jsonrpc":"2.0","method":"notifications/progress","params":{}}"#,
            &pending,
        );
        assert!(pending.lock().unwrap().is_empty());
    }

    #[test]
    fn test_resolve_executable_passthrough_for_paths() {
        assert_eq!(resolve_executable("/usr/bin/env"), PathBuf::from("/usr/bin/env"));
        assert_eq!(resolve_executable("./local"), PathBuf::from("./local"));
    }

    #[test]
    fn test_resolve_executable_finds_sh() {
        let resolved = resolve_executable("sh");
        assert!(resolved.is_absolute(), "sh should resolve via PATH: {:?}", resolved);
    }

    #[tokio::test]
    async fn test_request_timeout_removes_awaiter() {
        // `sleep` never answers; the request must time out and clean up.
        let config = McpServerConfig {
            command: "sleep".to_string(),
            args: vec!["5".to_string()],
            env: HashMap::new(),
        };
        let conn = McpConnection::spawn("sleepy", &config, Arc::new(AtomicU64::new(1)))
            .await
            .unwrap();

        let err = conn
            .send_request_with_timeout("tools/list", None, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Timeout));
        assert_eq!(conn.pending_len(), 0);

        conn.terminate().await;
    }

    #[tokio::test]
    async fn test_write_to_dead_child_fails() {
        let config = McpServerConfig {
            command: "true".to_string(),
            args: vec![],
            env: HashMap::new(),
        };
        let conn = McpConnection::spawn("ephemeral", &config, Arc::new(AtomicU64::new(1)))
            .await
            .unwrap();

        // Give the child a moment to exit.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!conn.is_alive().await);

        let result = conn
            .send_request_with_timeout("ping", None, Duration::from_millis(200))
            .await;
        assert!(result.is_err());
        assert_eq!(conn.pending_len(), 0);

        conn.terminate().await;
    }

    #[tokio::test]
    async fn test_spawn_missing_command_fails() {
        let config = McpServerConfig {
            command: "definitely-not-a-real-binary-name".to_string(),
            args: vec![],
            env: HashMap::new(),
        };
        let err = McpConnection::spawn("ghost", &config, Arc::new(AtomicU64::new(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::ProcessLaunchFailed(_)));
    }
}
