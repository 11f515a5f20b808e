//! Tool backed by an HTTP endpoint

use crate::{Tool, ToolResult};
use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum HttpToolError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },
}

pub struct HttpTool {
    client: reqwest::Client,
    name: String,
    description: String,
    parameters: serde_json::Value,
    url: String,
}

impl HttpTool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
        url: impl Into<String>,
    ) -> Result<Self, HttpToolError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent("Tuner/0.1.0")
            .build()?;

        Ok(Self {
            client,
            name: name.into(),
            description: description.into(),
            parameters,
            url: url.into(),
        })
    }

    async fn post(&self, args: &serde_json::Value) -> Result<String, HttpToolError> {
        debug!("Calling tool endpoint {} for {}", self.url, self.name);
        let response = self.client.post(&self.url).json(args).send().await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(HttpToolError::Api {
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl Tool for HttpTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> serde_json::Value {
        self.parameters.clone()
    }

    async fn execute(&self, args: &serde_json::Value) -> Result<ToolResult> {
        match self.post(args).await {
            Ok(body) => Ok(ToolResult::success(body)),
            Err(e) => Ok(ToolResult::error(format!("Tool call failed: {}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_endpoint_is_error_result() {
        // Port 9 (discard) on localhost is not expected to serve HTTP
        let tool = HttpTool::new(
            "lookup",
            "Lookup",
            serde_json::json!({}),
            "http://127.0.0.1:9/lookup",
        )
        .unwrap();
        let result = tool.execute(&serde_json::json!({"q": "x"})).await.unwrap();
        assert!(!result.success);
        assert!(result.content().starts_with("Tool call failed"));
    }
}
