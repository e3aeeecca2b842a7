//! Tool registry and schema types
//!
//! Tools take string-valued arguments at the boundary (a model emits text)
//! and coerce internally per their schema. The registry validates required
//! keys and enum membership before dispatch; risk levels are advisory
//! metadata for front-ends and are not enforced here.

mod fs;
mod http;
mod memory;
mod shell;

pub use fs::{FsListTool, FsReadTool, FsWriteTool};
pub use http::HttpGetTool;
pub use memory::{is_memory_tool, register_memory_tools};
pub use shell::ShellTool;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;

use crate::error::ToolError;

/// Value kinds a schema property may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyKind {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl PropertyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyKind::String => "string",
            PropertyKind::Integer => "integer",
            PropertyKind::Number => "number",
            PropertyKind::Boolean => "boolean",
            PropertyKind::Array => "array",
            PropertyKind::Object => "object",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "string" => Some(PropertyKind::String),
            "integer" => Some(PropertyKind::Integer),
            "number" => Some(PropertyKind::Number),
            "boolean" => Some(PropertyKind::Boolean),
            "array" => Some(PropertyKind::Array),
            "object" => Some(PropertyKind::Object),
            _ => None,
        }
    }
}

/// One property in a tool schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolProperty {
    pub kind: PropertyKind,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
    #[serde(default)]
    pub required: bool,
}

/// Argument schema for a tool. Invariant: every name in `required` keys into
/// `properties` (enforced by the builder).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolSchema {
    pub properties: BTreeMap<String, ToolProperty>,
    pub required: Vec<String>,
}

impl ToolSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a property; required properties are tracked in both places.
    pub fn property(
        mut self,
        name: &str,
        kind: PropertyKind,
        description: &str,
        required: bool,
    ) -> Self {
        self.properties.insert(
            name.to_string(),
            ToolProperty {
                kind,
                description: description.to_string(),
                enum_values: None,
                required,
            },
        );
        if required {
            self.required.push(name.to_string());
        }
        self
    }

    /// Constrain an existing property to a fixed value set.
    pub fn enum_values(mut self, name: &str, values: &[&str]) -> Self {
        if let Some(prop) = self.properties.get_mut(name) {
            prop.enum_values = Some(values.iter().map(|v| v.to_string()).collect());
        }
        self
    }

    pub fn kind_of(&self, name: &str) -> Option<PropertyKind> {
        self.properties.get(name).map(|p| p.kind)
    }

    /// Render as a JSON-schema-shaped object for prompts and wire formats.
    pub fn to_json(&self) -> serde_json::Value {
        let mut properties = serde_json::Map::new();
        for (name, prop) in &self.properties {
            let mut entry = json!({
                "type": prop.kind.as_str(),
                "description": prop.description,
            });
            if let Some(ref values) = prop.enum_values {
                entry["enum"] = json!(values);
            }
            properties.insert(name.clone(), entry);
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": self.required,
        })
    }

    /// Parse a JSON-schema-shaped `inputSchema` (as served by MCP peers).
    /// Unknown property types fall back to `string`.
    pub fn from_json_schema(schema: &serde_json::Value) -> Self {
        let mut parsed = Self::new();

        let required: Vec<String> = schema
            .get("required")
            .and_then(|r| r.as_array())
            .map(|names| {
                names
                    .iter()
                    .filter_map(|n| n.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        if let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) {
            for (name, prop) in properties {
                let kind = prop
                    .get("type")
                    .and_then(|t| t.as_str())
                    .and_then(PropertyKind::parse)
                    .unwrap_or(PropertyKind::String);
                let description = prop
                    .get("description")
                    .and_then(|d| d.as_str())
                    .unwrap_or_default()
                    .to_string();
                let enum_values = prop.get("enum").and_then(|e| e.as_array()).map(|values| {
                    values
                        .iter()
                        .filter_map(|v| v.as_str().map(String::from))
                        .collect()
                });
                let is_required = required.iter().any(|r| r == name);
                parsed.properties.insert(
                    name.clone(),
                    ToolProperty {
                        kind,
                        description,
                        enum_values,
                        required: is_required,
                    },
                );
            }
        }

        // Only keep required names that actually key into properties.
        parsed.required = required
            .into_iter()
            .filter(|name| parsed.properties.contains_key(name))
            .collect();
        parsed
    }
}

/// Advisory risk classification, surfaced to front-ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

/// A capability the agent can invoke. Arguments arrive as strings; each tool
/// coerces per its schema.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn schema(&self) -> &ToolSchema;
    fn risk_level(&self) -> RiskLevel {
        RiskLevel::Low
    }
    async fn invoke(&self, args: HashMap<String, String>) -> Result<String, ToolError>;
}

fn name_pattern() -> &'static Regex {
    static NAME_RE: OnceLock<Regex> = OnceLock::new();
    NAME_RE.get_or_init(|| Regex::new(r"^[a-z0-9_]+$").expect("valid regex"))
}

/// Registry mapping tool names to handlers. One operation at a time; shared
/// through `Arc`.
pub struct ToolRegistry {
    tools: Mutex<BTreeMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Mutex::new(BTreeMap::new()),
        }
    }

    /// Register a tool. Fails if the name is taken or malformed.
    pub async fn register(&self, tool: Arc<dyn Tool>) -> Result<(), ToolError> {
        let name = tool.name().to_string();
        if !name_pattern().is_match(&name) {
            return Err(ToolError::InvalidName(name));
        }
        let mut tools = self.tools.lock().await;
        if tools.contains_key(&name) {
            return Err(ToolError::AlreadyRegistered(name));
        }
        tracing::debug!("Registered tool: {}", name);
        tools.insert(name, tool);
        Ok(())
    }

    /// Remove a tool; absent names are a no-op.
    pub async fn unregister(&self, name: &str) {
        if self.tools.lock().await.remove(name).is_some() {
            tracing::debug!("Unregistered tool: {}", name);
        }
    }

    pub async fn lookup(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.lock().await.get(name).cloned()
    }

    /// All registered tools, name-ordered.
    pub async fn list(&self) -> Vec<Arc<dyn Tool>> {
        self.tools.lock().await.values().cloned().collect()
    }

    /// Validate arguments against the tool's schema and invoke it.
    pub async fn invoke(
        &self,
        name: &str,
        args: HashMap<String, String>,
    ) -> Result<String, ToolError> {
        let tool = self
            .lookup(name)
            .await
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        let schema = tool.schema();
        for required in &schema.required {
            if !args.contains_key(required) {
                return Err(ToolError::MissingRequired(required.clone()));
            }
        }
        for (key, value) in &args {
            if let Some(prop) = schema.properties.get(key) {
                if let Some(ref allowed) = prop.enum_values {
                    if !allowed.iter().any(|v| v == value) {
                        return Err(ToolError::InvalidParameter {
                            field: key.clone(),
                            reason: format!("must be one of: {}", allowed.join(", ")),
                        });
                    }
                }
            }
        }

        tool.invoke(args).await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool {
        schema: ToolSchema,
    }

    impl EchoTool {
        fn new() -> Self {
            Self {
                schema: ToolSchema::new().property(
                    "text",
                    PropertyKind::String,
                    "Text to echo back",
                    true,
                ),
            }
        }
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo the given text"
        }
        fn schema(&self) -> &ToolSchema {
            &self.schema
        }
        async fn invoke(&self, args: HashMap<String, String>) -> Result<String, ToolError> {
            Ok(args.get("text").cloned().unwrap_or_default())
        }
    }

    fn args(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_register_and_invoke() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool::new())).await.unwrap();

        let result = registry.invoke("echo", args(&[("text", "hi")])).await.unwrap();
        assert_eq!(result, "hi");
    }

    #[tokio::test]
    async fn test_register_duplicate_fails() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool::new())).await.unwrap();
        let err = registry.register(Arc::new(EchoTool::new())).await.unwrap_err();
        assert!(matches!(err, ToolError::AlreadyRegistered(name) if name == "echo"));
    }

    #[tokio::test]
    async fn test_register_rejects_bad_names() {
        struct BadName;
        #[async_trait]
        impl Tool for BadName {
            fn name(&self) -> &str {
                "Bad-Name"
            }
            fn description(&self) -> &str {
                ""
            }
            fn schema(&self) -> &ToolSchema {
                static SCHEMA: OnceLock<ToolSchema> = OnceLock::new();
                SCHEMA.get_or_init(ToolSchema::new)
            }
            async fn invoke(&self, _: HashMap<String, String>) -> Result<String, ToolError> {
                Ok(String::new())
            }
        }

        let registry = ToolRegistry::new();
        let err = registry.register(Arc::new(BadName)).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidName(_)));
    }

    #[tokio::test]
    async fn test_invoke_missing_required() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool::new())).await.unwrap();
        let err = registry.invoke("echo", HashMap::new()).await.unwrap_err();
        assert!(matches!(err, ToolError::MissingRequired(field) if field == "text"));
    }

    #[tokio::test]
    async fn test_invoke_unknown_tool() {
        let registry = ToolRegistry::new();
        let err = registry.invoke("nope", HashMap::new()).await.unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_unregister_absent_is_noop() {
        let registry = ToolRegistry::new();
        registry.unregister("ghost").await;
        assert!(registry.lookup("ghost").await.is_none());
    }

    #[tokio::test]
    async fn test_enum_validation() {
        struct ModeTool {
            schema: ToolSchema,
        }
        #[async_trait]
        impl Tool for ModeTool {
            fn name(&self) -> &str {
                "mode"
            }
            fn description(&self) -> &str {
                ""
            }
            fn schema(&self) -> &ToolSchema {
                &self.schema
            }
            async fn invoke(&self, args: HashMap<String, String>) -> Result<String, ToolError> {
                Ok(args["mode"].clone())
            }
        }

        let registry = ToolRegistry::new();
        registry
            .register(Arc::new(ModeTool {
                schema: ToolSchema::new()
                    .property("mode", PropertyKind::String, "Mode", true)
                    .enum_values("mode", &["fast", "slow"]),
            }))
            .await
            .unwrap();

        assert_eq!(
            registry.invoke("mode", args(&[("mode", "fast")])).await.unwrap(),
            "fast"
        );
        let err = registry
            .invoke("mode", args(&[("mode", "medium")]))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidParameter { field, .. } if field == "mode"));
    }

    #[test]
    fn test_schema_json_round_trip() {
        let schema = ToolSchema::new()
            .property("city", PropertyKind::String, "City name", true)
            .property("days", PropertyKind::Integer, "Forecast days", false)
            .enum_values("city", &["nyc", "sf"]);

        let json = schema.to_json();
        assert_eq!(json["type"], "object");
        assert_eq!(json["properties"]["city"]["enum"][1], "sf");
        assert_eq!(json["required"][0], "city");

        let back = ToolSchema::from_json_schema(&json);
        assert_eq!(back.kind_of("days"), Some(PropertyKind::Integer));
        assert_eq!(back.required, vec!["city"]);
        assert!(back.properties["city"].required);
        assert!(!back.properties["days"].required);
    }

    #[test]
    fn test_from_json_schema_drops_dangling_required() {
        let raw = json!({
            "type": "object",
            "properties": {"a": {"type": "string"}},
            "required": ["a", "phantom"]
        });
        let schema = ToolSchema::from_json_schema(&raw);
        assert_eq!(schema.required, vec!["a"]);
    }
}
