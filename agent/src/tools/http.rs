//! HTTP fetch tool

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use super::{PropertyKind, RiskLevel, Tool, ToolSchema};
use crate::error::ToolError;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
/// Response body cap handed back to the model.
const MAX_BODY_CHARS: usize = 65_536;

pub struct HttpGetTool {
    client: reqwest::Client,
    schema: ToolSchema,
}

impl HttpGetTool {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            schema: ToolSchema::new().property(
                "url",
                PropertyKind::String,
                "URL to fetch with an HTTP GET request",
                true,
            ),
        }
    }
}

impl Default for HttpGetTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for HttpGetTool {
    fn name(&self) -> &str {
        "http_get"
    }

    fn description(&self) -> &str {
        "Fetch a URL and return the response body as text"
    }

    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    fn risk_level(&self) -> RiskLevel {
        RiskLevel::Medium
    }

    async fn invoke(&self, args: HashMap<String, String>) -> Result<String, ToolError> {
        let raw_url = args
            .get("url")
            .ok_or_else(|| ToolError::MissingRequired("url".to_string()))?;

        let url = url::Url::parse(raw_url).map_err(|e| ToolError::InvalidParameter {
            field: "url".to_string(),
            reason: e.to_string(),
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ToolError::InvalidParameter {
                field: "url".to_string(),
                reason: format!("unsupported scheme '{}'", url.scheme()),
            });
        }

        let response = self
            .client
            .get(url)
            .timeout(FETCH_TIMEOUT)
            .send()
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("failed to read body: {}", e)))?;

        let mut rendered = format!("[{}]\n", status);
        if body.chars().count() > MAX_BODY_CHARS {
            rendered.extend(body.chars().take(MAX_BODY_CHARS));
            rendered.push_str("\n[truncated]");
        } else {
            rendered.push_str(&body);
        }
        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(url: &str) -> HashMap<String, String> {
        HashMap::from([("url".to_string(), url.to_string())])
    }

    #[tokio::test]
    async fn test_rejects_non_http_schemes() {
        let tool = HttpGetTool::new();
        let err = tool.invoke(args("file:///etc/passwd")).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidParameter { field, .. } if field == "url"));
    }

    #[tokio::test]
    async fn test_rejects_malformed_url() {
        let tool = HttpGetTool::new();
        let err = tool.invoke(args("not a url")).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidParameter { .. }));
    }
}
