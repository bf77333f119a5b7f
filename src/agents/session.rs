//! The bounded tool-calling loop run by every agent.
//!
//! # Algorithm
//! Each iteration:
//! 1. Stop if aborted, out of turns, or already at the budget ceiling
//! 2. Call the model with the full history and the tool catalog
//! 3. Charge the call's cost to the agent (and the task ledger)
//! 4. No tool calls: done. Otherwise run every call in order, append one
//!    bundled tool turn, and loop
//!
//! The ceiling check only prevents a *new* call once the ceiling is met; the
//! cost of a call already in flight is unbounded.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use super::context::AgentContext;
use super::types::{AgentId, AgentResult, AgentRole, AgentStatus};
use crate::events::TaskEvent;
use crate::llm::{ChatMessage, ContentPart, Role, ToolCall, ToolResult};

/// One agent execution. Created per run and consumed by [`AgentSession::run`].
#[derive(Debug)]
pub struct AgentSession {
    id: AgentId,
    name: String,
    role: AgentRole,
    model: String,
    system_prompt: String,
    budget_usd: f64,
    max_turns: Option<u32>,
    subtask_id: Option<String>,
    messages: Vec<ChatMessage>,
    turns: u32,
    cost_usd: f64,
    input_tokens: u64,
    output_tokens: u64,
    abort: CancellationToken,
}

impl AgentSession {
    pub fn new(id: AgentId, role: AgentRole, model: impl Into<String>, budget_usd: f64) -> Self {
        Self {
            id,
            name: role.name().to_string(),
            role,
            model: model.into(),
            system_prompt: role.system_prompt().to_string(),
            budget_usd: if budget_usd.is_nan() { 0.0 } else { budget_usd.max(0.0) },
            max_turns: None,
            subtask_id: None,
            messages: Vec::new(),
            turns: 0,
            cost_usd: 0.0,
            input_tokens: 0,
            output_tokens: 0,
            abort: CancellationToken::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Override the context's turn cap for this session.
    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = Some(max_turns);
        self
    }

    pub fn with_subtask(mut self, subtask_id: impl Into<String>) -> Self {
        self.subtask_id = Some(subtask_id.into());
        self
    }

    /// Use an externally owned abort flag (e.g. a child of the task's token).
    pub fn with_abort(mut self, abort: CancellationToken) -> Self {
        self.abort = abort;
        self
    }

    pub fn id(&self) -> AgentId {
        self.id
    }

    /// Handle that aborts this session once the run is underway.
    pub fn abort_handle(&self) -> CancellationToken {
        self.abort.clone()
    }

    /// Request a cooperative stop, observed at the top of the next iteration.
    pub fn abort(&self) {
        self.abort.cancel();
    }

    /// Run the loop to a terminal state.
    pub async fn run(
        mut self,
        task: &str,
        attachments: Vec<ContentPart>,
        ctx: &AgentContext,
    ) -> AgentResult {
        let max_turns = self.max_turns.unwrap_or(ctx.max_turns);
        let tools = ctx.tools.definitions();
        let ledger_key = self.id.ledger_key();
        let agent_id = self.id;

        tracing::info!(
            agent = %self.name,
            agent_id = %agent_id,
            model = %self.model,
            budget_usd = self.budget_usd,
            "Agent starting"
        );

        self.messages.push(ChatMessage::user(task, attachments));

        let (status, explicit_output) = loop {
            if self.abort.is_cancelled() {
                break (AgentStatus::Error, None);
            }
            if self.turns >= max_turns {
                break (AgentStatus::MaxTurns, None);
            }
            if self.cost_usd >= self.budget_usd {
                break (AgentStatus::BudgetExhausted, None);
            }

            let turn = self.turns + 1;
            tracing::debug!(agent = %self.name, turn, "Calling model");
            ctx.emit(|task_id| TaskEvent::Thinking {
                task_id,
                agent_id,
                turn,
            });

            let call = ctx
                .llm
                .chat(&self.messages, &tools, &self.model, &self.system_prompt);
            let response = match AssertUnwindSafe(call).catch_unwind().await {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    tracing::error!(agent = %self.name, turn, "Model call failed: {:#}", e);
                    break (AgentStatus::Error, Some(format!("{:#}", e)));
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    tracing::error!(agent = %self.name, turn, "Model call panicked: {}", message);
                    break (AgentStatus::Error, Some(message));
                }
            };

            let usage = response.usage;
            let cost = usage.cost_usd.unwrap_or_else(|| {
                ctx.pricing
                    .cost_usd(&self.model, usage.input_tokens, usage.output_tokens)
            });
            let cost = if cost.is_nan() { 0.0 } else { cost.max(0.0) };
            self.cost_usd += cost;
            self.input_tokens += usage.input_tokens;
            self.output_tokens += usage.output_tokens;
            if !ctx.record_spend(&ledger_key, cost).await {
                tracing::warn!(agent = %self.name, "Task budget exhausted during agent run");
            }
            self.turns = turn;

            if response.tool_calls.is_empty() {
                self.messages
                    .push(ChatMessage::assistant(response.content.clone(), Vec::new()));
                break (AgentStatus::Completed, response.content);
            }

            tracing::debug!(
                agent = %self.name,
                turn,
                tool_calls = response.tool_calls.len(),
                cost_usd = self.cost_usd,
                "Executing tool batch"
            );
            self.messages.push(ChatMessage::assistant(
                response.content,
                response.tool_calls.clone(),
            ));
            let results = self.execute_tools(&response.tool_calls, ctx).await;
            self.messages.push(ChatMessage::tool_results(results));
        };

        let output = explicit_output
            .filter(|text| !text.trim().is_empty())
            .unwrap_or_else(|| self.fallback_output(status, max_turns));

        tracing::info!(
            agent = %self.name,
            agent_id = %agent_id,
            status = %status,
            turns = self.turns,
            cost_usd = self.cost_usd,
            "Agent finished"
        );

        AgentResult {
            agent_id,
            name: self.name,
            role: self.role,
            model: self.model,
            subtask_id: self.subtask_id,
            status,
            output,
            turns: self.turns,
            budget_usd: self.budget_usd,
            cost_usd: self.cost_usd,
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
        }
    }

    /// Run a batch strictly in the order the model requested it.
    async fn execute_tools(&self, calls: &[ToolCall], ctx: &AgentContext) -> Vec<ToolResult> {
        let agent_id = self.id;
        let mut results = Vec::with_capacity(calls.len());

        for call in calls {
            ctx.emit(|task_id| TaskEvent::ToolCall {
                task_id,
                agent_id,
                tool_call_id: call.id.clone(),
                name: call.function.name.clone(),
                args: call.function.arguments.clone(),
            });

            let outcome = ctx.tools.execute_call(call).await;

            ctx.emit(|task_id| TaskEvent::ToolResult {
                task_id,
                agent_id,
                tool_call_id: call.id.clone(),
                name: call.function.name.clone(),
                result: outcome.content.clone(),
                is_error: outcome.is_error,
            });

            results.push(ToolResult {
                tool_call_id: call.id.clone(),
                name: call.function.name.clone(),
                content: outcome.content,
                is_error: outcome.is_error,
            });
        }
        results
    }

    /// Last non-empty assistant text, else a synthesized status line.
    fn fallback_output(&self, status: AgentStatus, max_turns: u32) -> String {
        let last_text = self
            .messages
            .iter()
            .rev()
            .filter(|m| m.role == Role::Assistant)
            .filter_map(|m| m.text_content())
            .map(str::trim)
            .find(|text| !text.is_empty());
        if let Some(text) = last_text {
            return text.to_string();
        }

        match status {
            AgentStatus::Completed => "Agent finished without a final message".to_string(),
            AgentStatus::BudgetExhausted => format!(
                "Budget exhausted after {} turns (${:.4} of ${:.4})",
                self.turns, self.cost_usd, self.budget_usd
            ),
            AgentStatus::MaxTurns => format!("Reached max turns ({})", max_turns),
            AgentStatus::Error => format!("Aborted after {} turns", self.turns),
        }
    }
}

/// Render a caught panic payload as `panic: <message>`.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panic: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("panic: {}", message)
    } else {
        "panic: unknown cause".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::BudgetManager;
    use crate::llm::{ChatResponse, TokenUsage};
    use crate::task::TaskId;
    use crate::test_support::{context, text_response, tool_response, ScriptedLlm};
    use std::sync::Arc;
    use tokio::sync::broadcast;

    fn always_tool() -> Arc<ScriptedLlm> {
        Arc::new(ScriptedLlm::new(|call| {
            Ok(tool_response(
                &format!("call_{}", call.messages.len()),
                "echo",
                r#"{"text": "again"}"#,
                0.01,
            ))
        }))
    }

    #[tokio::test]
    async fn test_completes_after_one_turn() {
        let llm = Arc::new(ScriptedLlm::new(|_| Ok(text_response("done", 0.25))));
        let ctx = context(llm.clone());

        let result = AgentSession::new(AgentId::new(), AgentRole::Coder, "test-model", 1.0)
            .run("write hello world", Vec::new(), &ctx)
            .await;

        assert_eq!(result.status, AgentStatus::Completed);
        assert_eq!(result.turns, 1);
        assert_eq!(result.output, "done");
        assert!((result.cost_usd - 0.25).abs() < 1e-9);
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn test_zero_ceiling_makes_no_calls() {
        let llm = always_tool();
        let ctx = context(llm.clone());

        let result = AgentSession::new(AgentId::new(), AgentRole::Coder, "test-model", 0.0)
            .run("anything", Vec::new(), &ctx)
            .await;

        assert_eq!(result.status, AgentStatus::BudgetExhausted);
        assert_eq!(result.turns, 0);
        assert_eq!(llm.call_count(), 0);
        assert!(!result.output.is_empty());
    }

    #[tokio::test]
    async fn test_turn_cap() {
        let llm = always_tool();
        let ctx = context(llm.clone()).with_max_turns(3);

        let result = AgentSession::new(AgentId::new(), AgentRole::Coder, "test-model", 100.0)
            .run("loop forever", Vec::new(), &ctx)
            .await;

        assert_eq!(result.status, AgentStatus::MaxTurns);
        assert_eq!(result.turns, 3);
        assert_eq!(llm.call_count(), 3);
    }

    #[tokio::test]
    async fn test_ceiling_stops_before_next_call() {
        // Each call costs 0.01; the ceiling is met after the third.
        let llm = always_tool();
        let ctx = context(llm.clone());

        let result = AgentSession::new(AgentId::new(), AgentRole::Coder, "test-model", 0.025)
            .run("spend", Vec::new(), &ctx)
            .await;

        assert_eq!(result.status, AgentStatus::BudgetExhausted);
        assert_eq!(llm.call_count(), 3);
        assert!(result.cost_usd >= 0.025);
    }

    #[tokio::test]
    async fn test_tool_batch_runs_in_order_and_is_bundled() {
        let llm = Arc::new(ScriptedLlm::new(|call| {
            if call.messages.len() == 1 {
                Ok(ChatResponse::tool_use(
                    Some("two steps".to_string()),
                    vec![
                        crate::llm::ToolCall::new("a", "echo", r#"{"text": "first"}"#),
                        crate::llm::ToolCall::new("b", "echo", r#"{"text": "second"}"#),
                    ],
                    TokenUsage::new(10, 10).with_cost(0.1),
                ))
            } else {
                Ok(text_response("finished", 0.1))
            }
        }));
        let ctx = context(llm.clone());

        let result = AgentSession::new(AgentId::new(), AgentRole::Coder, "test-model", 1.0)
            .run("do two things", Vec::new(), &ctx)
            .await;
        assert_eq!(result.status, AgentStatus::Completed);
        assert_eq!(result.turns, 2);

        let calls = llm.calls();
        let history = &calls[1].messages;
        assert_eq!(history.len(), 3);
        assert_eq!(history[1].tool_calls.len(), 2);
        let contents: Vec<_> = history[2]
            .tool_results
            .iter()
            .map(|r| (r.tool_call_id.as_str(), r.content.as_str()))
            .collect();
        assert_eq!(contents, vec![("a", "first"), ("b", "second")]);
    }

    #[tokio::test]
    async fn test_backend_error_terminates_with_message() {
        let llm = Arc::new(ScriptedLlm::new(|_| anyhow::bail!("Server error (HTTP 503): overloaded")));
        let ctx = context(llm);

        let result = AgentSession::new(AgentId::new(), AgentRole::Reviewer, "test-model", 1.0)
            .run("review", Vec::new(), &ctx)
            .await;

        assert_eq!(result.status, AgentStatus::Error);
        assert!(result.output.contains("overloaded"));
    }

    #[tokio::test]
    async fn test_backend_panic_ends_only_this_agent() {
        let llm = Arc::new(ScriptedLlm::new(|_| panic!("connection pool poisoned")));
        let ctx = context(llm.clone());

        let result = AgentSession::new(AgentId::new(), AgentRole::Coder, "test-model", 1.0)
            .run("do it", Vec::new(), &ctx)
            .await;

        assert_eq!(result.status, AgentStatus::Error);
        assert_eq!(result.output, "panic: connection pool poisoned");
        assert_eq!(result.turns, 0);
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn test_abort_is_checked_before_each_call() {
        let llm = always_tool();
        let ctx = context(llm.clone());

        let session = AgentSession::new(AgentId::new(), AgentRole::Coder, "test-model", 1.0);
        session.abort();
        let result = session.run("never runs", Vec::new(), &ctx).await;

        assert_eq!(result.status, AgentStatus::Error);
        assert_eq!(llm.call_count(), 0);
        assert!(!result.output.is_empty());
    }

    #[tokio::test]
    async fn test_fallback_output_uses_last_assistant_text() {
        let llm = Arc::new(ScriptedLlm::new(|_| {
            Ok(ChatResponse::tool_use(
                Some("still working".to_string()),
                vec![crate::llm::ToolCall::new("x", "echo", "{}")],
                TokenUsage::new(1, 1).with_cost(0.0),
            ))
        }));
        let ctx = context(llm).with_max_turns(2);

        let result = AgentSession::new(AgentId::new(), AgentRole::Coder, "test-model", 1.0)
            .run("work", Vec::new(), &ctx)
            .await;

        assert_eq!(result.status, AgentStatus::MaxTurns);
        assert_eq!(result.output, "still working");
    }

    #[tokio::test]
    async fn test_spend_is_charged_to_ledger_and_priced_when_missing() {
        // No reported cost: 1M input tokens on an unpriced model hits the fallback rate.
        let llm = Arc::new(ScriptedLlm::new(|_| {
            Ok(ChatResponse::text("ok", TokenUsage::new(1_000_000, 0)))
        }));
        let budget = BudgetManager::new(100.0).into_shared();
        let ctx = context(llm).with_budget(budget.clone());

        let id = AgentId::new();
        budget.write().await.allocate(&id.ledger_key(), 50.0);
        let result = AgentSession::new(id, AgentRole::Coder, "mystery/model", 50.0)
            .run("price me", Vec::new(), &ctx)
            .await;

        let expected = crate::cost::FALLBACK_RATE.input_per_million;
        assert!((result.cost_usd - expected).abs() < 1e-9);
        let ledger = budget.read().await.ledger(&id.ledger_key()).unwrap();
        assert!((ledger.spent - expected).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_events_follow_turn_order() {
        let llm = Arc::new(ScriptedLlm::new(|call| {
            if call.messages.len() == 1 {
                Ok(tool_response("t1", "echo", r#"{"text": "hi"}"#, 0.0))
            } else {
                Ok(text_response("bye", 0.0))
            }
        }));
        let (tx, mut rx) = broadcast::channel(16);
        let task_id = TaskId::new();
        let ctx = context(llm).with_events(task_id, tx);

        AgentSession::new(AgentId::new(), AgentRole::Coder, "test-model", 1.0)
            .run("chat", Vec::new(), &ctx)
            .await;

        let mut names = Vec::new();
        while let Ok(event) = rx.try_recv() {
            assert_eq!(event.task_id(), task_id);
            names.push(event.event_name());
        }
        assert_eq!(names, vec!["thinking", "tool_call", "tool_result", "thinking"]);
    }
}
