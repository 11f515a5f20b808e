//! Declarative tool specs as they appear in the user config file

use serde::{Deserialize, Serialize};

fn default_parameters() -> serde_json::Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

/// How a declared tool produces its output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ToolKind {
    /// Always answers with the same text
    Static { response: String },
    /// POSTs the call arguments as JSON and returns the response body
    Http { url: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON schema of the arguments
    #[serde(default = "default_parameters")]
    pub parameters: serde_json::Value,
    #[serde(flatten)]
    pub kind: ToolKind,
}
