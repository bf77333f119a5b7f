//! Task submission and result types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agents::AgentResult;
use crate::llm::ContentPart;

/// Unique identifier for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Create a new unique task ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A task submitted to the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    pub description: String,
    /// Hard ceiling for the whole task, in US dollars
    pub budget_usd: f64,
    /// Model used by every agent of the task
    pub model: String,
    /// Optional repository the task is about
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    /// Media attachments forwarded to the planner and every agent
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<ContentPart>,
}

impl TaskRequest {
    pub fn new(description: impl Into<String>, budget_usd: f64, model: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            budget_usd,
            model: model.into(),
            repo: None,
            attachments: Vec::new(),
        }
    }

    pub fn with_repo(mut self, repo: impl Into<String>) -> Self {
        self.repo = Some(repo.into());
        self
    }

    pub fn with_attachment(mut self, attachment: ContentPart) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn with_attachments(mut self, attachments: Vec<ContentPart>) -> Self {
        self.attachments.extend(attachments);
        self
    }
}

/// Overall outcome of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Completed,
    BudgetExhausted,
    Error,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            TaskStatus::Completed => "completed",
            TaskStatus::BudgetExhausted => "budget_exhausted",
            TaskStatus::Error => "error",
        };
        f.write_str(label)
    }
}

/// Aggregated result of one task, handed out by value on completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub description: String,
    pub status: TaskStatus,
    /// Concatenated per-agent summaries
    pub output: String,
    /// Per-agent results in execution order, planner first
    pub agents: Vec<AgentResult>,
    pub total_cost_usd: f64,
    pub budget_usd: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl TaskResult {
    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}
