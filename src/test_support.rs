//! Scripted backend and simple tools for unit tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::agents::{AgentContext, AgentRole};
use crate::llm::{ChatMessage, ChatResponse, LlmClient, TokenUsage, ToolCall, ToolDefinition};
use crate::tools::{Tool, ToolRegistry};

/// One recorded backend call.
#[derive(Debug, Clone)]
pub(crate) struct Call {
    pub system_prompt: String,
    pub messages: Vec<ChatMessage>,
}

type Handler = Box<dyn Fn(&Call) -> anyhow::Result<ChatResponse> + Send + Sync>;

/// Backend whose answers come from a closure over the incoming call.
pub(crate) struct ScriptedLlm {
    handler: Handler,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedLlm {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&Call) -> anyhow::Result<ChatResponse> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        _tools: &[ToolDefinition],
        _model: &str,
        system_prompt: &str,
    ) -> anyhow::Result<ChatResponse> {
        let call = Call {
            system_prompt: system_prompt.to_string(),
            messages: messages.to_vec(),
        };
        self.calls.lock().unwrap().push(call.clone());
        (self.handler)(&call)
    }
}

pub(crate) fn is_planner_call(call: &Call) -> bool {
    call.system_prompt == AgentRole::Planner.system_prompt()
}

pub(crate) fn text_response(content: impl Into<String>, cost_usd: f64) -> ChatResponse {
    ChatResponse::text(content, TokenUsage::new(100, 50).with_cost(cost_usd))
}

pub(crate) fn tool_response(id: &str, name: &str, arguments: &str, cost_usd: f64) -> ChatResponse {
    ChatResponse::tool_use(
        None,
        vec![ToolCall::new(id, name, arguments)],
        TokenUsage::new(100, 50).with_cost(cost_usd),
    )
}

/// Returns its `text` argument, or the raw arguments when there is none.
pub(crate) struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the given text back"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {"text": {"type": "string"}}
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<String> {
        Ok(args
            .get("text")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| args.to_string()))
    }
}

/// Context with an echo tool and no ledger or event sink.
pub(crate) fn context(llm: Arc<ScriptedLlm>) -> AgentContext {
    AgentContext::new(llm, Arc::new(ToolRegistry::new().with_tool(Arc::new(EchoTool))))
}
