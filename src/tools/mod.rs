//! Tool system for the agents.
//!
//! Tools are the agents' only way to act on the outside world. The registry
//! never fails: unknown tools, bad arguments, tool errors and tool panics all
//! come back as textual error results so the model can correct itself.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;

use crate::llm::{FunctionDefinition, ToolCall, ToolDefinition};

/// Information about a tool for display purposes.
#[derive(Debug, Clone)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
}

/// Trait for implementing tools.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool.
    fn name(&self) -> &str;

    /// A description of what this tool does.
    fn description(&self) -> &str;

    /// JSON schema for the tool's parameters.
    fn parameters_schema(&self) -> Value;

    /// Execute the tool with the given arguments.
    async fn execute(&self, args: Value) -> anyhow::Result<String>;
}

/// Text handed back to the model for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutcome {
    fn ok(content: String) -> Self {
        Self {
            content,
            is_error: false,
        }
    }

    fn error(message: impl std::fmt::Display) -> Self {
        Self {
            content: format!("Error: {}", message),
            is_error: true,
        }
    }
}

/// Registry of available tools.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool, replacing any tool registered under the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::warn!(tool = %name, "Replacing already registered tool");
        }
    }

    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    /// List all available tools.
    pub fn list_tools(&self) -> Vec<ToolInfo> {
        self.tools
            .values()
            .map(|t| ToolInfo {
                name: t.name().to_string(),
                description: t.description().to_string(),
            })
            .collect()
    }

    /// Check if a tool exists by name.
    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tool catalog in LLM-compatible format, ordered by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .map(|t| ToolDefinition {
                tool_type: "function".to_string(),
                function: FunctionDefinition {
                    name: t.name().to_string(),
                    description: t.description().to_string(),
                    parameters: t.parameters_schema(),
                },
            })
            .collect()
    }

    /// Execute a tool by name.
    pub async fn execute(&self, name: &str, args: Value) -> ToolOutcome {
        let Some(tool) = self.tools.get(name) else {
            tracing::warn!(tool = %name, "Model requested unknown tool");
            return ToolOutcome::error(format!("Unknown tool: {}", name));
        };

        match AssertUnwindSafe(tool.execute(args)).catch_unwind().await {
            Ok(Ok(content)) => ToolOutcome::ok(content),
            Ok(Err(e)) => {
                tracing::debug!(tool = %name, "Tool failed: {}", e);
                ToolOutcome::error(e)
            }
            Err(_) => {
                tracing::error!(tool = %name, "Tool panicked");
                ToolOutcome::error(format!("tool '{}' panicked", name))
            }
        }
    }

    /// Execute a model-issued invocation, decoding its JSON argument string.
    pub async fn execute_call(&self, call: &ToolCall) -> ToolOutcome {
        let raw = call.function.arguments.trim();
        let args = if raw.is_empty() {
            Value::Object(serde_json::Map::new())
        } else {
            match serde_json::from_str(raw) {
                Ok(args) => args,
                Err(e) => {
                    return ToolOutcome::error(format!(
                        "invalid arguments for '{}': {}",
                        call.function.name, e
                    ))
                }
            }
        };
        self.execute(&call.function.name, args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::EchoTool;

    struct Failing;

    #[async_trait]
    impl Tool for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn description(&self) -> &str {
            "Always fails"
        }

        fn parameters_schema(&self) -> Value {
            serde_json::json!({"type": "object"})
        }

        async fn execute(&self, _args: Value) -> anyhow::Result<String> {
            anyhow::bail!("disk full")
        }
    }

    struct Panicking;

    #[async_trait]
    impl Tool for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        fn description(&self) -> &str {
            "Panics"
        }

        fn parameters_schema(&self) -> Value {
            serde_json::json!({"type": "object"})
        }

        async fn execute(&self, _args: Value) -> anyhow::Result<String> {
            panic!("boom")
        }
    }

    fn registry() -> ToolRegistry {
        ToolRegistry::new()
            .with_tool(Arc::new(Panicking))
            .with_tool(Arc::new(EchoTool))
            .with_tool(Arc::new(Failing))
    }

    #[test]
    fn test_definitions_are_name_ordered() {
        let names: Vec<_> = registry()
            .definitions()
            .into_iter()
            .map(|d| d.function.name)
            .collect();
        assert_eq!(names, vec!["echo", "failing", "panicking"]);
    }

    #[tokio::test]
    async fn test_execute_success() {
        let outcome = registry()
            .execute("echo", serde_json::json!({"text": "hi"}))
            .await;
        assert_eq!(outcome, ToolOutcome::ok("hi".to_string()));
    }

    #[tokio::test]
    async fn test_failures_become_text() {
        let registry = registry();

        let unknown = registry.execute("nope", Value::Null).await;
        assert!(unknown.is_error);
        assert!(unknown.content.contains("Unknown tool: nope"));

        let failed = registry.execute("failing", Value::Null).await;
        assert!(failed.is_error);
        assert_eq!(failed.content, "Error: disk full");

        let panicked = registry.execute("panicking", Value::Null).await;
        assert!(panicked.is_error);
        assert!(panicked.content.contains("panicked"));
    }

    #[tokio::test]
    async fn test_execute_call_arguments() {
        let registry = registry();

        let empty = registry.execute_call(&ToolCall::new("c1", "echo", "")).await;
        assert!(!empty.is_error);

        let invalid = registry
            .execute_call(&ToolCall::new("c2", "echo", "{not json"))
            .await;
        assert!(invalid.is_error);
        assert!(invalid.content.contains("invalid arguments"));
    }
}
