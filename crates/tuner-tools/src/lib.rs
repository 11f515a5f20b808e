//! Tuner Tools - capabilities exposed to the model during trajectory generation
//!
//! Tools are declared in the user config and come in two kinds:
//! - static: returns a canned response (offline rehearsal of tool flows)
//! - http: forwards the call arguments to an endpoint

pub mod http;
pub mod registry;
pub mod spec;
pub mod static_tool;

pub use http::{HttpTool, HttpToolError};
pub use registry::ToolRegistry;
pub use spec::{ToolKind, ToolSpec};
pub use static_tool::StaticTool;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

/// Tool execution result
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
}

impl ToolResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
        }
    }

    /// Text handed back to the model: the output, or the error message on failure
    pub fn content(&self) -> &str {
        match (&self.error, self.success) {
            (Some(error), false) => error,
            _ => &self.output,
        }
    }
}

/// Function-style tool definition sent to the model
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    /// OpenAI-compatible `tools[]` entry
    pub fn to_openai(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

/// Trait for tools the model may call while a trajectory is generated
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters(&self) -> serde_json::Value;
    async fn execute(&self, args: &serde_json::Value) -> Result<ToolResult>;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_content_prefers_error() {
        assert_eq!(ToolResult::success("ok").content(), "ok");
        assert_eq!(ToolResult::error("boom").content(), "boom");
    }

    #[test]
    fn test_definition_openai_shape() {
        let def = ToolDefinition {
            name: "lookup".to_string(),
            description: "Look something up".to_string(),
            parameters: serde_json::json!({"type": "object", "properties": {}}),
        };
        let value = def.to_openai();
        assert_eq!(value["type"], "function");
        assert_eq!(value["function"]["name"], "lookup");
        assert_eq!(value["function"]["parameters"]["type"], "object");
    }
}
