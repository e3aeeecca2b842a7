//! tick-mcp: a minimal stdio tool server
//!
//! Speaks newline-delimited JSON-RPC 2.0 on stdin/stdout and exposes one
//! tool, `tick`, which returns an incrementing counter. Useful as a live
//! peer when exercising the bridge by hand:
//!
//! ```json
//! {"mcpServers": {"tick": {"command": "tick-mcp"}}}
//! ```

use anyhow::Result;
use serde_json::{json, Value};
use tokio::io::{stdin, stdout, AsyncBufReadExt, AsyncWriteExt, BufReader};

const PROTOCOL_VERSION: &str = "2024-11-05";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let mut lines = BufReader::new(stdin()).lines();
    let mut out = stdout();
    let mut counter: u64 = 0;

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let frame: Value = match serde_json::from_str(&line) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("Unparseable frame: {}", e);
                continue;
            }
        };

        let Some(method) = frame.get("method").and_then(|m| m.as_str()) else {
            continue;
        };
        let id = frame.get("id").cloned();

        // Notifications get no reply.
        let Some(id) = id else {
            tracing::debug!("Notification: {}", method);
            continue;
        };

        let response = match method {
            "initialize" => json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": "tick-mcp", "version": env!("CARGO_PKG_VERSION")},
                },
            }),
            "tools/list" => json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {
                    "tools": [{
                        "name": "tick",
                        "description": "Return the next value of a monotonic counter",
                        "inputSchema": {
                            "type": "object",
                            "properties": {
                                "step": {
                                    "type": "integer",
                                    "description": "How far to advance (default 1)"
                                }
                            },
                            "required": []
                        },
                    }],
                },
            }),
            "tools/call" => {
                let step = frame
                    .pointer("/params/arguments/step")
                    .and_then(|s| s.as_u64())
                    .unwrap_or(1);
                counter += step;
                json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": {
                        "content": [{"type": "text", "text": counter.to_string()}],
                    },
                })
            }
            other => json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": -32601, "message": format!("method '{}' not found", other)},
            }),
        };

        let mut body = serde_json::to_vec(&response)?;
        body.push(b'\n');
        out.write_all(&body).await?;
        out.flush().await?;
    }

    Ok(())
}
