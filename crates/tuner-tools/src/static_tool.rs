//! Tool with a fixed response

use crate::{Tool, ToolResult};
use anyhow::Result;
use async_trait::async_trait;

pub struct StaticTool {
    name: String,
    description: String,
    parameters: serde_json::Value,
    response: String,
}

impl StaticTool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
        response: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            response: response.into(),
        }
    }
}

#[async_trait]
impl Tool for StaticTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> serde_json::Value {
        self.parameters.clone()
    }

    async fn execute(&self, _args: &serde_json::Value) -> Result<ToolResult> {
        Ok(ToolResult::success(self.response.clone()))
    }
}
