//! Tool trait: the abstraction over capabilities the model can call back into.
//!
//! Tools let a flow act on the application's behalf: look up the local
//! directory, book an appointment, set a reminder, fetch a reference page.
//! Each flow declares its own registry; nothing is global.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use crate::error::ToolError;
use crate::provider::ToolDefinition;

/// A request to execute a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the model's function call)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a JSON value
    pub arguments: serde_json::Value,
}

/// The result of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// The call ID this result is for
    pub call_id: String,

    /// Whether the tool executed successfully
    pub success: bool,

    /// The output content
    pub output: String,

    /// Optional structured data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ToolResult {
    /// A successful result with structured data.
    pub fn ok(call_id: impl Into<String>, output: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            call_id: call_id.into(),
            success: true,
            output: output.into(),
            data: Some(data),
        }
    }

    /// A failed result carrying a human-readable reason.
    pub fn failed(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            success: false,
            output: output.into(),
            data: None,
        }
    }

    /// The JSON payload handed back to the model.
    pub fn to_model_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "success": self.success,
            "message": self.output,
            "data": self.data.clone().unwrap_or(serde_json::Value::Null),
        })
    }
}

/// The core Tool trait.
///
/// Tools make no idempotency promise: the dispatcher calls each requested
/// tool exactly once per invocation.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "search_directory").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// JSON Schema describing the `data` of a successful result.
    fn output_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object" })
    }

    /// One sentence telling the model when to call this tool.
    fn usage_guidance(&self) -> &str {
        ""
    }

    /// Execute the tool with the given arguments.
    async fn execute(&self, arguments: serde_json::Value) -> std::result::Result<ToolResult, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the model.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A per-flow registry of declared tools.
///
/// Ordered by name so that definitions and guidance come out identically for
/// identical registries.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Builder-style registration.
    pub fn with(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    /// Remove a tool by name, returning whether it was declared.
    pub fn remove(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Get all tool definitions (for sending to the model).
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.to_definition()).collect()
    }

    /// Usage guidance lines, one per tool that has any.
    pub fn guidance(&self) -> Vec<String> {
        self.tools
            .values()
            .filter(|t| !t.usage_guidance().is_empty())
            .map(|t| format!("{}: {}", t.name(), t.usage_guidance()))
            .collect()
    }

    /// Execute a tool call.
    pub async fn execute(&self, call: &ToolCall) -> std::result::Result<ToolResult, ToolError> {
        let tool = self.tools.get(&call.name).ok_or_else(|| ToolError::NotFound(call.name.clone()))?;
        let mut result = tool.execute(call.arguments.clone()).await?;
        result.call_id = call.id.clone();
        Ok(result)
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry").field("tools", &self.names()).finish()
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
        fn usage_guidance(&self) -> &str { "Call when the user asks you to repeat something." }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" }
                },
                "required": ["text"]
            })
        }
        async fn execute(&self, arguments: serde_json::Value) -> std::result::Result<ToolResult, ToolError> {
            let text = arguments["text"].as_str().unwrap_or("").to_string();
            Ok(ToolResult::ok("", text, serde_json::Value::Null))
        }
    }

    #[test]
    fn registry_register_and_lookup() {
        let registry = ToolRegistry::new().with(Arc::new(EchoTool));
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nonexistent").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn registry_definitions_and_guidance() {
        let registry = ToolRegistry::new().with(Arc::new(EchoTool));
        let defs = registry.definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "echo");
        assert_eq!(registry.guidance(), vec!["echo: Call when the user asks you to repeat something."]);
    }

    #[test]
    fn registry_remove() {
        let mut registry = ToolRegistry::new().with(Arc::new(EchoTool));
        assert!(registry.remove("echo"));
        assert!(!registry.remove("echo"));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn registry_execute_stamps_call_id() {
        let registry = ToolRegistry::new().with(Arc::new(EchoTool));

        let call = ToolCall {
            id: "call_1".into(),
            name: "echo".into(),
            arguments: serde_json::json!({"text": "hello world"}),
        };
        let result = registry.execute(&call).await.unwrap();
        assert!(result.success);
        assert_eq!(result.output, "hello world");
        assert_eq!(result.call_id, "call_1");
    }

    #[tokio::test]
    async fn registry_execute_missing_tool() {
        let registry = ToolRegistry::new();
        let call = ToolCall {
            id: "call_1".into(),
            name: "nonexistent".into(),
            arguments: serde_json::json!({}),
        };
        let err = registry.execute(&call).await.unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }

    #[test]
    fn failed_result_payload() {
        let result = ToolResult::failed("call_2", "slot unavailable");
        let payload = result.to_model_payload();
        assert_eq!(payload["success"], false);
        assert_eq!(payload["message"], "slot unavailable");
        assert!(payload["data"].is_null());
    }
}
