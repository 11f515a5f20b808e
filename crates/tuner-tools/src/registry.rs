//! Ordered collection of callable tools

use crate::{HttpTool, StaticTool, Tool, ToolDefinition, ToolKind, ToolResult, ToolSpec};
use std::sync::Arc;
use tracing::warn;

#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from declared specs.
    ///
    /// A spec that cannot be instantiated is skipped with a warning so one bad
    /// entry does not disable the rest.
    pub fn from_specs(specs: &[ToolSpec]) -> Self {
        let mut registry = Self::new();
        for spec in specs {
            match &spec.kind {
                ToolKind::Static { response } => registry.register(Arc::new(StaticTool::new(
                    &spec.name,
                    &spec.description,
                    spec.parameters.clone(),
                    response,
                ))),
                ToolKind::Http { url } => {
                    match HttpTool::new(&spec.name, &spec.description, spec.parameters.clone(), url)
                    {
                        Ok(tool) => registry.register(Arc::new(tool)),
                        Err(e) => warn!("Skipping tool {}: {}", spec.name, e),
                    }
                }
            }
        }
        registry
    }

    /// Register a tool, replacing any existing tool with the same name
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(tool);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    /// Execute a tool by name. Failures come back as error results.
    pub async fn execute(&self, name: &str, args: &serde_json::Value) -> ToolResult {
        let Some(tool) = self.get(name) else {
            warn!("Unknown tool: {}", name);
            return ToolResult::error(format!("Unknown tool: {}", name));
        };
        match tool.execute(args).await {
            Ok(result) => result,
            Err(e) => {
                warn!("Tool {} error: {}", name, e);
                ToolResult::error(e.to_string())
            }
        }
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.tools.iter().map(|t| t.name()))
            .finish()
    }
}
