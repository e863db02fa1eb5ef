//! Tool trait: the abstraction over assistant capabilities.
//!
//! Tools are what let the assistant act: run SQL, execute commands,
//! make HTTP requests, read and write files, render tables.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;
use crate::error::ToolError;
use crate::provider::ToolDefinition;

/// Names of the built-in tools the orchestrator treats specially.
pub mod names {
    pub const EXECUTE_SQL: &str = "execute_sql";
    pub const EXECUTE_COMMAND: &str = "execute_command";
    pub const HTTP_REQUEST: &str = "http_request";
    pub const FILE_OPERATIONS: &str = "file_operations";
    pub const RENDER_TABLE: &str = "render_table";
}

/// The core Tool trait.
///
/// Tools receive an already-normalized argument object and a cancellation
/// token that is triggered when the user aborts the turn.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "execute_sql").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> Value;

    /// High-impact tools must be confirmed by the user before running.
    fn requires_confirmation(&self) -> bool {
        false
    }

    /// Execute the tool and return its structured result.
    async fn execute(
        &self,
        arguments: Map<String, Value>,
        cancel: CancellationToken,
    ) -> std::result::Result<Value, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// The dispatch contract the orchestrator executes tool calls through.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Definitions for every tool the model may call.
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Whether a call to `name` must pass the confirmation gate.
    fn requires_confirmation(&self, name: &str) -> bool;

    /// Run `name` with `arguments`.
    async fn execute(
        &self,
        name: &str,
        arguments: Map<String, Value>,
        cancel: CancellationToken,
    ) -> std::result::Result<Value, ToolError>;
}

/// A registry of available tools.
///
/// Ordered by name so the tool catalog sent to the model is stable.
pub struct ToolRegistry {
    tools: BTreeMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.to_definition()).collect()
    }

    fn requires_confirmation(&self, name: &str) -> bool {
        self.get(name).is_some_and(|t| t.requires_confirmation())
    }

    async fn execute(
        &self,
        name: &str,
        arguments: Map<String, Value>,
        cancel: CancellationToken,
    ) -> std::result::Result<Value, ToolError> {
        let tool = self.tools.get(name).ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        tool.execute(arguments, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A simple test tool for unit tests.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str { "echo" }
        fn description(&self) -> &str { "Echoes back the input" }
        fn parameters_schema(&self) -> Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" }
                },
                "required": ["text"]
            })
        }
        async fn execute(
            &self,
            arguments: Map<String, Value>,
            _cancel: CancellationToken,
        ) -> std::result::Result<Value, ToolError> {
            let text = arguments.get("text").and_then(Value::as_str).unwrap_or("");
            Ok(serde_json::json!({ "status": "success", "output": text }))
        }
    }

    struct DangerTool;

    #[async_trait]
    impl Tool for DangerTool {
        fn name(&self) -> &str { "danger" }
        fn description(&self) -> &str { "Needs a yes" }
        fn parameters_schema(&self) -> Value { serde_json::json!({"type": "object"}) }
        fn requires_confirmation(&self) -> bool { true }
        async fn execute(
            &self,
            _arguments: Map<String, Value>,
            _cancel: CancellationToken,
        ) -> std::result::Result<Value, ToolError> {
            Ok(Value::Null)
        }
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn registry_register_and_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn registry_definitions_are_sorted() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        registry.register(Box::new(DangerTool));
        let defs = registry.definitions();
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[0].name, "danger");
        assert_eq!(defs[1].name, "echo");
    }

    #[test]
    fn confirmation_flag_is_per_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        registry.register(Box::new(DangerTool));
        assert!(registry.requires_confirmation("danger"));
        assert!(!registry.requires_confirmation("echo"));
        assert!(!registry.requires_confirmation("missing"));
    }

    #[tokio::test]
    async fn registry_execute_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));

        let result = registry
            .execute("echo", args(serde_json::json!({"text": "hello world"})), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result["output"], "hello world");
    }

    #[tokio::test]
    async fn registry_execute_missing_tool() {
        let registry = ToolRegistry::new();
        let err = registry
            .execute("nonexistent", Map::new(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }
}
