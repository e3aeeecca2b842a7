//! Tool invocation parser
//!
//! Models embed invocations as bare JSON objects inside free-form text:
//! `{"tool_name": "<name>", "tool_args": {...}}`. A balanced-brace scan
//! (string- and escape-aware) extracts every candidate object in order of
//! appearance; candidates that do not carry a `tool_name` string are prose
//! and are skipped.

use std::collections::HashMap;

use serde::Deserialize;

/// One invocation requested by the model, argument values stringified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub name: String,
    pub args: HashMap<String, String>,
}

#[derive(Deserialize)]
struct WireInvocation {
    tool_name: String,
    #[serde(default)]
    tool_args: serde_json::Value,
}

/// Extract every invocation in `text`, in order of appearance.
pub fn parse_invocations(text: &str) -> Vec<ToolInvocation> {
    let mut invocations = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'{' {
            i += 1;
            continue;
        }
        match balanced_object_end(bytes, i) {
            Some(end) => {
                let candidate = &text[i..=end];
                if let Some(invocation) = parse_candidate(candidate) {
                    invocations.push(invocation);
                    i = end + 1;
                    continue;
                }
                // Not an invocation: step inside in case one is nested in prose.
                i += 1;
            }
            None => {
                i += 1;
            }
        }
    }

    invocations
}

/// Index of the `}` closing the object starting at `start`, honoring JSON
/// string literals and escapes. `None` when unbalanced.
fn balanced_object_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_candidate(candidate: &str) -> Option<ToolInvocation> {
    let wire: WireInvocation = serde_json::from_str(candidate).ok()?;

    let mut args = HashMap::new();
    if let serde_json::Value::Object(map) = wire.tool_args {
        for (key, value) in map {
            let rendered = match value {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            args.insert(key, rendered);
        }
    }

    Some(ToolInvocation {
        name: wire.tool_name,
        args,
    })
}
