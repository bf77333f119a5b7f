//! Orchestrator - task submission surface and the per-task scheduler.
//!
//! One orchestrator serves many tasks. Each task gets its own budget ledger,
//! cancellation token and entry in the active-task map; agents within a task
//! run strictly one at a time.

mod root;

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use self::root::TaskRun;
use super::{AgentContext, AgentId, AgentRole};
use crate::budget::{
    BudgetManager, BudgetSnapshot, SharedBudget, DEFAULT_PLANNER_PERCENT, DEFAULT_RESERVE_PERCENT,
};
use crate::config::{Config, DEFAULT_MAX_TURNS, DEFAULT_OUTPUT_PREVIEW_CHARS};
use crate::cost::PricingTable;
use crate::events::TaskEvent;
use crate::llm::LlmClient;
use crate::task::{TaskId, TaskRequest, TaskResult};
use crate::tools::ToolRegistry;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Tunables shared by every task of an orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Share of each task budget withheld from allocation
    pub reserve_percent: f64,
    /// Share of each task budget handed to the planner
    pub planner_percent: f64,
    pub max_turns: u32,
    /// Per-agent output length in the aggregated task output
    pub output_preview_chars: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            reserve_percent: DEFAULT_RESERVE_PERCENT,
            planner_percent: DEFAULT_PLANNER_PERCENT,
            max_turns: DEFAULT_MAX_TURNS,
            output_preview_chars: DEFAULT_OUTPUT_PREVIEW_CHARS,
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            reserve_percent: config.reserve_percent,
            planner_percent: config.planner_budget_percent,
            max_turns: config.max_turns,
            output_preview_chars: config.output_preview_chars,
        }
    }
}

/// Preconditions checked before any work (or spend) begins.
#[derive(Debug, Clone, thiserror::Error)]
pub enum OrchestratorError {
    #[error("task description must not be empty")]
    EmptyDescription,

    #[error("model must not be empty")]
    EmptyModel,

    #[error("task budget must be a positive, finite amount (got {0})")]
    InvalidBudget(f64),

    #[error("task {0} did not run to completion: {1}")]
    Join(TaskId, String),
}

/// An agent currently running inside a task.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveAgent {
    pub agent_id: AgentId,
    pub name: String,
    pub role: AgentRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtask_id: Option<String>,
}

pub(crate) struct ActiveTask {
    description: String,
    cancel: CancellationToken,
    budget: SharedBudget,
    agents: HashMap<AgentId, ActiveAgent>,
}

type ActiveTasks = Arc<RwLock<HashMap<TaskId, ActiveTask>>>;

/// Handle to a task running in the background.
pub struct TaskHandle {
    task_id: TaskId,
    handle: JoinHandle<TaskResult>,
}

impl TaskHandle {
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Wait for the task's result.
    pub async fn wait(self) -> Result<TaskResult, OrchestratorError> {
        let task_id = self.task_id;
        self.handle
            .await
            .map_err(|e| OrchestratorError::Join(task_id, e.to_string()))
    }
}

/// Decomposes tasks, allocates sub-budgets and schedules agents.
#[derive(Clone)]
pub struct Orchestrator {
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
    pricing: Arc<PricingTable>,
    settings: OrchestratorSettings,
    active: ActiveTasks,
    events: broadcast::Sender<TaskEvent>,
}

impl Orchestrator {
    pub fn new(llm: Arc<dyn LlmClient>, tools: ToolRegistry) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            llm,
            tools: Arc::new(tools),
            pricing: Arc::new(PricingTable::default()),
            settings: OrchestratorSettings::default(),
            active: Arc::new(RwLock::new(HashMap::new())),
            events,
        }
    }

    pub fn with_pricing(mut self, pricing: Arc<PricingTable>) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Subscribe to events of every task run by this orchestrator.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    /// Start a task in the background.
    pub async fn submit(&self, request: TaskRequest) -> Result<TaskHandle, OrchestratorError> {
        let run = self.prepare(request).await?;
        let task_id = run.task_id();
        let handle = tokio::spawn(run.execute());
        Ok(TaskHandle { task_id, handle })
    }

    /// Run a task to completion.
    ///
    /// Only precondition violations are errors; every failure after work
    /// starts is reported inside the returned [`TaskResult`].
    pub async fn run_task(&self, request: TaskRequest) -> Result<TaskResult, OrchestratorError> {
        let run = self.prepare(request).await?;
        Ok(run.execute().await)
    }

    /// Ids of tasks that are still running.
    pub async fn active_tasks(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.active.read().await.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Description of a running task.
    pub async fn task_description(&self, task_id: TaskId) -> Option<String> {
        self.active
            .read()
            .await
            .get(&task_id)
            .map(|task| task.description.clone())
    }

    /// Agents currently running inside a task.
    pub async fn active_agents(&self, task_id: TaskId) -> Vec<ActiveAgent> {
        self.active
            .read()
            .await
            .get(&task_id)
            .map(|task| task.agents.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Current ledger of a running task.
    pub async fn budget_snapshot(&self, task_id: TaskId) -> Option<BudgetSnapshot> {
        let budget = {
            let active = self.active.read().await;
            Arc::clone(&active.get(&task_id)?.budget)
        };
        let snapshot = budget.read().await.snapshot();
        Some(snapshot)
    }

    /// Best-effort cancellation.
    ///
    /// Flips the abort flag of every agent of the task and drops it from the
    /// active set. A model call or tool batch already in flight finishes first.
    pub async fn cancel_task(&self, task_id: TaskId) -> bool {
        match self.active.write().await.remove(&task_id) {
            Some(task) => {
                task.cancel.cancel();
                tracing::info!(task_id = %task_id, "Task cancelled");
                true
            }
            None => false,
        }
    }

    fn validate(request: &TaskRequest) -> Result<(), OrchestratorError> {
        if request.description.trim().is_empty() {
            return Err(OrchestratorError::EmptyDescription);
        }
        if request.model.trim().is_empty() {
            return Err(OrchestratorError::EmptyModel);
        }
        if !request.budget_usd.is_finite() || request.budget_usd <= 0.0 {
            return Err(OrchestratorError::InvalidBudget(request.budget_usd));
        }
        Ok(())
    }

    /// Validate and register a task so it is visible (and cancellable) right away.
    async fn prepare(&self, request: TaskRequest) -> Result<TaskRun, OrchestratorError> {
        Self::validate(&request)?;

        let task_id = TaskId::new();
        let budget = BudgetManager::new(request.budget_usd)
            .with_reserve_percent(self.settings.reserve_percent)
            .into_shared();
        let cancel = CancellationToken::new();

        let ctx = AgentContext::new(Arc::clone(&self.llm), Arc::clone(&self.tools))
            .with_pricing(Arc::clone(&self.pricing))
            .with_max_turns(self.settings.max_turns)
            .with_budget(Arc::clone(&budget))
            .with_events(task_id, self.events.clone());

        self.active.write().await.insert(
            task_id,
            ActiveTask {
                description: request.description.clone(),
                cancel: cancel.clone(),
                budget: Arc::clone(&budget),
                agents: HashMap::new(),
            },
        );

        Ok(TaskRun::new(self.clone(), task_id, request, budget, cancel, ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{text_response, ScriptedLlm};

    fn orchestrator() -> Orchestrator {
        let llm = Arc::new(ScriptedLlm::new(|_| Ok(text_response("[]", 0.0))));
        Orchestrator::new(llm, ToolRegistry::new())
    }

    #[tokio::test]
    async fn test_preconditions_fail_loudly() {
        let orch = orchestrator();

        let err = orch
            .run_task(TaskRequest::new("  ", 1.0, "m"))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::EmptyDescription));

        let err = orch
            .run_task(TaskRequest::new("task", 1.0, ""))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::EmptyModel));

        for budget in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let err = orch
                .run_task(TaskRequest::new("task", budget, "m"))
                .await
                .unwrap_err();
            assert!(matches!(err, OrchestratorError::InvalidBudget(_)));
        }
        assert!(orch.active_tasks().await.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_unknown_task() {
        assert!(!orchestrator().cancel_task(TaskId::new()).await);
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = Config::new("key".to_string(), "m".to_string());
        config.reserve_percent = 5.0;
        config.max_turns = 7;

        let settings = OrchestratorSettings::from_config(&config);
        assert_eq!(settings.reserve_percent, 5.0);
        assert_eq!(settings.max_turns, 7);
    }
}
