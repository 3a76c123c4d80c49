// Toolflow — Tool system

use crate::provider::{ToolDefinition, ToolFunctionDefinition};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

// ---------------------------------------------------------------------------
// Tool result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResult {
    /// Content fed back to the LLM
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Tool trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters(&self) -> Value;
    async fn execute(&self, args: HashMap<String, Value>) -> ToolResult;
}

fn definition_of(tool: &dyn Tool) -> ToolDefinition {
    ToolDefinition {
        def_type: "function".to_string(),
        function: ToolFunctionDefinition {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            parameters: tool.parameters(),
        },
    }
}

// ---------------------------------------------------------------------------
// Tool registry
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ToolRegistry {
    tools: Arc<RwLock<HashMap<String, Arc<dyn Tool>>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.write().await.insert(name, tool);
    }

    pub async fn execute(&self, name: &str, args: HashMap<String, Value>) -> ToolResult {
        // Clone the handle so a slow remote call doesn't hold the lock.
        let tool = self.tools.read().await.get(name).cloned();
        match tool {
            Some(tool) => {
                tracing::info!(tool = %name, "Executing tool");
                let start = std::time::Instant::now();
                let result = tool.execute(args).await;
                let duration = start.elapsed();

                if result.is_error {
                    tracing::error!(tool = %name, duration_ms = %duration.as_millis(), error = %result.content, "Tool failed");
                } else {
                    tracing::info!(tool = %name, duration_ms = %duration.as_millis(), result_len = result.content.len(), "Tool completed");
                }

                result
            }
            None => {
                tracing::error!(tool = %name, "Tool not found");
                ToolResult::error(format!("tool '{}' not found", name))
            }
        }
    }

    /// All tool definitions, sorted by name.
    pub async fn get_definitions(&self) -> Vec<ToolDefinition> {
        let tools = self.tools.read().await;
        let mut defs: Vec<_> = tools.values().map(|t| definition_of(t.as_ref())).collect();
        defs.sort_by(|a, b| a.function.name.cmp(&b.function.name));
        defs
    }

    /// Definitions for the given names in the given order. Unknown names
    /// are returned separately.
    pub async fn definitions_for(&self, names: &[String]) -> (Vec<ToolDefinition>, Vec<String>) {
        let tools = self.tools.read().await;
        let mut defs = Vec::new();
        let mut missing = Vec::new();
        for name in names {
            match tools.get(name) {
                Some(tool) => {
                    if !defs
                        .iter()
                        .any(|d: &ToolDefinition| d.function.name == *name)
                    {
                        defs.push(definition_of(tool.as_ref()));
                    }
                }
                None => missing.push(name.clone()),
            }
        }
        (defs, missing)
    }

    pub async fn list(&self) -> Vec<String> {
        let mut names: Vec<_> = self.tools.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn count(&self) -> usize {
        self.tools.read().await.len()
    }

    pub async fn get_summaries(&self) -> Vec<String> {
        let tools = self.tools.read().await;
        let mut lines: Vec<_> = tools
            .values()
            .map(|t| format!("- `{}` - {}", t.name(), t.description()))
            .collect();
        lines.sort();
        lines
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
    use serde_json::json;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo the text argument"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object", "properties": {"text": {"type": "string"}}})
        }
        async fn execute(&self, args: HashMap<String, Value>) -> ToolResult {
            match args.get("text").and_then(|t| t.as_str()) {
                Some(t) => ToolResult::success(t),
                None => ToolResult::error("missing text"),
            }
        }
    }

    #[tokio::test]
    async fn test_execute_registered_tool() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool)).await;

        let mut args = HashMap::new();
        args.insert("text".to_string(), json!("hi"));
        assert_eq!(registry.execute("echo", args).await, ToolResult::success("hi"));
        assert!(registry.execute("echo", HashMap::new()).await.is_error);
    }

    #[tokio::test]
    async fn test_execute_unknown_tool() {
        let registry = ToolRegistry::new();
        let result = registry.execute("nope", HashMap::new()).await;
        assert!(result.is_error);
        assert!(result.content.contains("not found"));
    }

    #[tokio::test]
    async fn test_definitions_for_reports_missing() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool)).await;

        let names = vec!["ghost".to_string(), "echo".to_string(), "echo".to_string()];
        let (defs, missing) = registry.definitions_for(&names).await;
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].function.name, "echo");
        assert_eq!(missing, vec!["ghost"]);
    }
}
