//! Tool registry and [`Tool`] trait definition.
//!
//! Defines the interface that all tool implementations must satisfy and
//! provides a [`ToolRegistry`] that stores registered tools and dispatches
//! execution requests by name.
//!
//! Tool implementations live in the `archi-tools` crate; this module only
//! defines the contract and registry infrastructure. Results cross the
//! boundary as JSON objects carrying a `success` flag, so a failing tool
//! never aborts the caller's reasoning loop.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, warn};

/// Error type for tool execution.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// The requested tool was not found in the registry.
    #[error("tool not found: {0}")]
    NotFound(String),

    /// The arguments provided to the tool are invalid.
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    /// The tool execution failed at runtime.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// A filesystem path is invalid or traverses outside allowed boundaries.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// The tool execution exceeded the allowed time limit.
    #[error("timeout after {0}s")]
    Timeout(u64),
}

/// A capability the plan executor can invoke by name.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Registry key, e.g. `web_search`.
    fn name(&self) -> &str;

    /// One-line description surfaced to the planner.
    fn description(&self) -> &str;

    /// JSON-schema description of accepted parameters.
    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    /// Execute with JSON parameters, returning action-specific fields.
    async fn execute(&self, params: Value) -> Result<Value, ToolError>;
}

/// Name-keyed store of tools with uniform dispatch.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under its own name. Re-registration replaces.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        debug!(tool = tool.name(), "registered tool");
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Registered tool names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Execute a tool by name.
    ///
    /// Always returns a JSON object with a `success` flag; errors are
    /// folded into `{success: false, error}` rather than propagated.
    pub async fn execute(&self, name: &str, params: Value) -> Value {
        let Some(tool) = self.tools.get(name) else {
            warn!(tool = name, "unknown tool requested");
            return json!({
                "success": false,
                "error": ToolError::NotFound(name.to_string()).to_string(),
            });
        };

        match tool.execute(params).await {
            Ok(mut fields) => {
                if let Some(obj) = fields.as_object_mut() {
                    obj.entry("success").or_insert(json!(true));
                    Value::Object(obj.clone())
                } else {
                    json!({"success": true, "result": fields})
                }
            }
            Err(e) => {
                warn!(tool = name, error = %e, "tool execution failed");
                json!({"success": false, "error": e.to_string()})
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "echo the input back"
        }

        async fn execute(&self, params: Value) -> Result<Value, ToolError> {
            Ok(json!({"echoed": params}))
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "broken"
        }

        fn description(&self) -> &str {
            "always fails"
        }

        async fn execute(&self, _params: Value) -> Result<Value, ToolError> {
            Err(ToolError::ExecutionFailed("disk on fire".into()))
        }
    }

    #[tokio::test]
    async fn execute_known_tool_merges_success_flag() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));

        let result = registry.execute("echo", json!({"x": 1})).await;
        assert_eq!(result["success"], true);
        assert_eq!(result["echoed"]["x"], 1);
    }

    #[tokio::test]
    async fn unknown_tool_reports_failure_not_panic() {
        let registry = ToolRegistry::new();
        let result = registry.execute("nope", json!({})).await;
        assert_eq!(result["success"], false);
        assert!(result["error"].as_str().unwrap().contains("tool not found"));
    }

    #[tokio::test]
    async fn tool_error_folded_into_result() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FailingTool));
        let result = registry.execute("broken", json!({})).await;
        assert_eq!(result["success"], false);
        assert!(result["error"].as_str().unwrap().contains("disk on fire"));
    }

    #[test]
    fn names_are_sorted() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FailingTool));
        registry.register(Arc::new(EchoTool));
        assert_eq!(registry.names(), vec!["broken", "echo"]);
    }
}
