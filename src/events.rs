//! Task lifecycle events.
//!
//! Every event carries its task id so that a single subscriber can follow
//! several tasks running on the same orchestrator.

use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::agents::{AgentId, AgentRole, AgentStatus};
use crate::budget::BudgetEvent;
use crate::task::{TaskId, TaskStatus};

/// A structured event emitted while a task runs.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    Started {
        task_id: TaskId,
        description: String,
        budget_usd: f64,
    },
    AgentStarted {
        task_id: TaskId,
        agent_id: AgentId,
        name: String,
        role: AgentRole,
        #[serde(skip_serializing_if = "Option::is_none")]
        subtask_id: Option<String>,
        budget_usd: f64,
    },
    /// A model call is about to be issued.
    Thinking {
        task_id: TaskId,
        agent_id: AgentId,
        turn: u32,
    },
    ToolCall {
        task_id: TaskId,
        agent_id: AgentId,
        tool_call_id: String,
        name: String,
        args: String,
    },
    ToolResult {
        task_id: TaskId,
        agent_id: AgentId,
        tool_call_id: String,
        name: String,
        result: String,
        is_error: bool,
    },
    CostUpdate {
        task_id: TaskId,
        ledger_id: String,
        amount_usd: f64,
        spent_usd: f64,
        remaining_usd: f64,
    },
    BudgetWarning {
        task_id: TaskId,
        threshold_percent: u8,
        spent_usd: f64,
        total_usd: f64,
    },
    BudgetExhausted {
        task_id: TaskId,
        spent_usd: f64,
        total_usd: f64,
    },
    AgentDone {
        task_id: TaskId,
        agent_id: AgentId,
        name: String,
        status: AgentStatus,
        turns: u32,
        cost_usd: f64,
    },
    Completed {
        task_id: TaskId,
        status: TaskStatus,
        total_cost_usd: f64,
    },
    Error {
        task_id: TaskId,
        message: String,
    },
}

impl TaskEvent {
    /// Tag a ledger notification with the task it belongs to.
    pub fn from_budget(task_id: TaskId, event: BudgetEvent) -> Self {
        match event {
            BudgetEvent::Spend {
                ledger_id,
                amount_usd,
                spent_usd,
                remaining_usd,
            } => TaskEvent::CostUpdate {
                task_id,
                ledger_id,
                amount_usd,
                spent_usd,
                remaining_usd,
            },
            BudgetEvent::Warning {
                threshold_percent,
                spent_usd,
                total_usd,
            } => TaskEvent::BudgetWarning {
                task_id,
                threshold_percent,
                spent_usd,
                total_usd,
            },
            BudgetEvent::Exhausted {
                spent_usd,
                total_usd,
            } => TaskEvent::BudgetExhausted {
                task_id,
                spent_usd,
                total_usd,
            },
        }
    }

    pub fn task_id(&self) -> TaskId {
        match self {
            TaskEvent::Started { task_id, .. }
            | TaskEvent::AgentStarted { task_id, .. }
            | TaskEvent::Thinking { task_id, .. }
            | TaskEvent::ToolCall { task_id, .. }
            | TaskEvent::ToolResult { task_id, .. }
            | TaskEvent::CostUpdate { task_id, .. }
            | TaskEvent::BudgetWarning { task_id, .. }
            | TaskEvent::BudgetExhausted { task_id, .. }
            | TaskEvent::AgentDone { task_id, .. }
            | TaskEvent::Completed { task_id, .. }
            | TaskEvent::Error { task_id, .. } => *task_id,
        }
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            TaskEvent::Started { .. } => "started",
            TaskEvent::AgentStarted { .. } => "agent_started",
            TaskEvent::Thinking { .. } => "thinking",
            TaskEvent::ToolCall { .. } => "tool_call",
            TaskEvent::ToolResult { .. } => "tool_result",
            TaskEvent::CostUpdate { .. } => "cost_update",
            TaskEvent::BudgetWarning { .. } => "budget_warning",
            TaskEvent::BudgetExhausted { .. } => "budget_exhausted",
            TaskEvent::AgentDone { .. } => "agent_done",
            TaskEvent::Completed { .. } => "completed",
            TaskEvent::Error { .. } => "error",
        }
    }
}

/// Log every event from `events` until the channel closes.
///
/// A lagging receiver skips what it missed and keeps going. Returns the number
/// of events logged.
pub async fn log_events(mut events: broadcast::Receiver<TaskEvent>) -> usize {
    let mut logged = 0;
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event logger lagged, skipping events");
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        match &event {
            TaskEvent::AgentStarted {
                name, budget_usd, ..
            } => tracing::info!(agent = %name, budget_usd, "Agent started"),
            TaskEvent::AgentDone {
                name,
                status,
                cost_usd,
                ..
            } => tracing::info!(agent = %name, status = %status, cost_usd, "Agent done"),
            TaskEvent::BudgetWarning {
                threshold_percent, ..
            } => tracing::info!("Budget {}% used", threshold_percent),
            _ => tracing::debug!(event = event.event_name(), "Task event"),
        }
        logged += 1;
    }
    logged
}
