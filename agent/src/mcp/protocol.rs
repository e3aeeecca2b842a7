//! JSON-RPC 2.0 framing and MCP method shapes
//!
//! Messages are newline-delimited UTF-8 JSON on both directions of a child
//! process pipe. Requests carry a monotonic integer id; notifications omit
//! it. This module also owns the string coercion applied to tool arguments
//! at the bridge edge and the rendering of `tools/call` results.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const JSONRPC_VERSION: &str = "2.0";
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Outgoing request frame.
#[derive(Debug, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// Outgoing notification frame (no id, no reply).
#[derive(Debug, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: method.to_string(),
            params,
        }
    }
}

/// Any frame a server may send: a response (has `id`) or a notification
/// (has `method`, no `id`).
#[derive(Debug, Deserialize)]
pub struct IncomingFrame {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcErrorObject>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
}

/// A tool advertised by a connected server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub server: String,
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct ToolsListResult {
    #[serde(default)]
    pub tools: Vec<WireTool>,
}

#[derive(Debug, Deserialize)]
pub struct WireTool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "inputSchema")]
    pub input_schema: Option<Value>,
}

/// `initialize` request parameters.
pub fn initialize_params() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": "hearth",
            "version": env!("CARGO_PKG_VERSION"),
        },
    })
}

/// Lowercase `name` and replace anything outside `[A-Za-z0-9_]` with `_`.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Registry-facing name of a bridged tool.
pub fn bridged_tool_name(server: &str, tool: &str) -> String {
    format!("mcp_{}_{}", sanitize(server), sanitize(tool))
}

/// Coerce string arguments into the JSON types the tool's `inputSchema`
/// declares. Unparseable values and undeclared keys pass through as strings;
/// the server is the final validator.
pub fn coerce_args(args: &HashMap<String, String>, schema: Option<&Value>) -> Value {
    let properties = schema.and_then(|s| s.get("properties")).and_then(|p| p.as_object());

    let mut coerced = serde_json::Map::new();
    for (key, raw) in args {
        let declared = properties
            .and_then(|props| props.get(key))
            .and_then(|prop| prop.get("type"))
            .and_then(|t| t.as_str());

        let value = match declared {
            Some("integer") => raw
                .parse::<i64>()
                .map(Value::from)
                .unwrap_or_else(|_| Value::String(raw.clone())),
            Some("number") => raw
                .parse::<f64>()
                .ok()
                .and_then(|n| serde_json::Number::from_f64(n).map(Value::Number))
                .unwrap_or_else(|| Value::String(raw.clone())),
            Some("boolean") => match raw.as_str() {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                _ => Value::String(raw.clone()),
            },
            Some("array") | Some("object") => {
                serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone()))
            }
            _ => Value::String(raw.clone()),
        };
        coerced.insert(key.clone(), value);
    }
    Value::Object(coerced)
}

/// Render a `tools/call` result to the text handed back to the model.
///
/// Recognized content types contribute one line each; unknown types are
/// skipped. When no content is recognized, fall back to the result's `text`
/// field, then to pretty-printed JSON of the whole result.
pub fn render_tool_result(result: &Value) -> String {
    let mut lines = Vec::new();
    if let Some(content) = result.get("content").and_then(|c| c.as_array()) {
        for item in content {
            match item.get("type").and_then(|t| t.as_str()) {
                Some("text") => {
                    if let Some(text) = item.get("text").and_then(|t| t.as_str()) {
                        lines.push(text.to_string());
                    }
                }
                Some("image") => lines.push("[image data]".to_string()),
                Some("resource") => {
                    let uri = item
                        .get("resource")
                        .and_then(|r| r.get("uri"))
                        .or_else(|| item.get("uri"))
                        .and_then(|u| u.as_str())
                        .unwrap_or("unknown");
                    lines.push(format!("[resource: {}]", uri));
                }
                _ => {}
            }
        }
    }

    if !lines.is_empty() {
        return lines.join("\n");
    }
    if let Some(text) = result.get("text").and_then(|t| t.as_str()) {
        return text.to_string();
    }
    serde_json::to_string_pretty(result).unwrap_or_else(|_| result.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_frame_shape() {
        let request = JsonRpcRequest::new(7, "tools/list", None);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["jsonrpc"], "2.0");
        assert_eq!(json["id"], 7);
        assert_eq!(json["method"], "tools/list");
        assert!(json.get("params").is_none());
    }

    #[test]
    fn test_notification_omits_id() {
        let note = JsonRpcNotification::new("notifications/initialized", None);
        let json = serde_json::to_value(&note).unwrap();
        assert!(json.get("id").is_none());
    }

    #[test]
    fn test_incoming_frame_variants() {
        let response: IncomingFrame =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"result":{"ok":true}}"#).unwrap();
        assert_eq!(response.id, Some(1));
        assert!(response.result.is_some());

        let error: IncomingFrame = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":2,"error":{"code":-32601,"message":"method not found"}}"#,
        )
        .unwrap();
        assert_eq!(error.error.as_ref().unwrap().code, -32601);

        let note: IncomingFrame =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"notifications/progress"}"#)
                .unwrap();
        assert!(note.id.is_none());
        assert_eq!(note.method.as_deref(), Some("notifications/progress"));
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("My Server!"), "my_server_");
        assert_eq!(sanitize("web-search"), "web_search");
        assert_eq!(sanitize("already_ok_123"), "already_ok_123");
    }

    #[test]
    fn test_sanitize_is_stable() {
        for input in ["My Server!", "web-search", "ünïcode", "a.b/c"] {
            let once = sanitize(input);
            assert_eq!(sanitize(&once), once);
        }
    }

    #[test]
    fn test_bridged_tool_name() {
        assert_eq!(bridged_tool_name("Web-Search", "fetch page"), "mcp_web_search_fetch_page");
    }

    #[test]
    fn test_coerce_args_per_schema() {
        let schema = serde_json::json!({
            "type": "object",
            "properties": {
                "count": {"type": "integer"},
                "ratio": {"type": "number"},
                "dry_run": {"type": "boolean"},
                "tags": {"type": "array"},
                "label": {"type": "string"}
            }
        });
        let args: HashMap<String, String> = [
            ("count", "5"),
            ("ratio", "0.5"),
            ("dry_run", "true"),
            ("tags", r#"["a","b"]"#),
            ("label", "42"),
            ("undeclared", "x"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let coerced = coerce_args(&args, Some(&schema));
        assert_eq!(coerced["count"], 5);
        assert_eq!(coerced["ratio"], 0.5);
        assert_eq!(coerced["dry_run"], true);
        assert_eq!(coerced["tags"][1], "b");
        // Declared string stays a string even when numeric.
        assert_eq!(coerced["label"], "42");
        assert_eq!(coerced["undeclared"], "x");
    }

    #[test]
    fn test_coerce_args_bad_values_fall_back_to_string() {
        let schema = serde_json::json!({
            "properties": {"count": {"type": "integer"}, "flag": {"type": "boolean"}}
        });
        let args: HashMap<String, String> = [("count", "many"), ("flag", "yes")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let coerced = coerce_args(&args, Some(&schema));
        assert_eq!(coerced["count"], "many");
        assert_eq!(coerced["flag"], "yes");
    }

    #[test]
    fn test_render_text_content() {
        let result = serde_json::json!({
            "content": [
                {"type": "text", "text": "line one"},
                {"type": "image", "data": "...", "mimeType": "image/png"},
                {"type": "resource", "resource": {"uri": "file:///tmp/x"}},
                {"type": "mystery"}
            ]
        });
        assert_eq!(
            render_tool_result(&result),
            "line one\n[image data]\n[resource: file:///tmp/x]"
        );
    }

    #[test]
    fn test_render_falls_back_to_text_field() {
        let result = serde_json::json!({"content": [], "text": "plain"});
        assert_eq!(render_tool_result(&result), "plain");
    }

    #[test]
    fn test_render_falls_back_to_pretty_json() {
        let result = serde_json::json!({"rows": 3});
        let rendered = render_tool_result(&result);
        assert!(rendered.contains("\"rows\": 3"));
    }
}
