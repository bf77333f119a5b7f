//! Agent execution context - shared collaborators for every agent of a task.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::budget::SharedBudget;
use crate::config::DEFAULT_MAX_TURNS;
use crate::cost::PricingTable;
use crate::events::TaskEvent;
use crate::llm::LlmClient;
use crate::task::TaskId;
use crate::tools::ToolRegistry;

/// Shared context passed to agents during execution.
///
/// Cloning is cheap: every collaborator sits behind an `Arc` or a channel handle.
#[derive(Clone)]
pub struct AgentContext {
    /// LLM client for model calls
    pub llm: Arc<dyn LlmClient>,

    /// Tool registry for task execution
    pub tools: Arc<ToolRegistry>,

    /// Used when the backend does not report a call's cost
    pub pricing: Arc<PricingTable>,

    /// Maximum completed model calls per agent
    pub max_turns: u32,

    /// Task ledger that every model call is charged to (optional)
    pub budget: Option<SharedBudget>,

    /// Optional event sink for streaming agent events.
    events: Option<(TaskId, broadcast::Sender<TaskEvent>)>,
}

impl AgentContext {
    /// Create a new agent context.
    pub fn new(llm: Arc<dyn LlmClient>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            llm,
            tools,
            pricing: Arc::new(PricingTable::default()),
            max_turns: DEFAULT_MAX_TURNS,
            budget: None,
            events: None,
        }
    }

    pub fn with_pricing(mut self, pricing: Arc<PricingTable>) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_budget(mut self, budget: SharedBudget) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn with_events(mut self, task_id: TaskId, sender: broadcast::Sender<TaskEvent>) -> Self {
        self.events = Some((task_id, sender));
        self
    }

    /// Send an event built for this context's task, if anyone listens.
    pub fn emit(&self, build: impl FnOnce(TaskId) -> TaskEvent) {
        if let Some((task_id, sender)) = &self.events {
            let _ = sender.send(build(*task_id));
        }
    }

    /// Charge a call to the task ledger.
    ///
    /// Returns `false` once the ledger is exhausted, `true` otherwise
    /// (including when no ledger is attached).
    pub async fn record_spend(&self, ledger_id: &str, amount_usd: f64) -> bool {
        match &self.budget {
            Some(budget) => budget.write().await.record_spend(ledger_id, amount_usd),
            None => true,
        }
    }
}
