//! Per-task pipeline: plan, schedule, aggregate.
//!
//! # Task Processing Flow
//! ```text
//! 1. Planner agent (planner share of the budget) proposes subtasks
//! 2. No usable decomposition: one coder agent gets all remaining headroom
//! 3. Otherwise, in dependency order:
//!    a. allocate total x complexity multiplier (stop when nothing is left)
//!    b. run the subtask's agent
//!    c. release the unspent allocation, mark the subtask completed
//! 4. Aggregate per-agent summaries into the task result
//! ```

use std::collections::{BTreeSet, HashMap};
use std::panic::AssertUnwindSafe;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use super::{ActiveAgent, Orchestrator};
use crate::agents::session::panic_message;
use crate::agents::{AgentContext, AgentId, AgentResult, AgentRole, AgentSession};
use crate::budget::{planner_budget, subtask_budget, SharedBudget};
use crate::events::TaskEvent;
use crate::task::{
    drop_unknown_dependencies, execution_order, parse_plan, SubTask, TaskId, TaskRequest,
    TaskResult, TaskStatus,
};

/// Characters of each dependency's output quoted in a subtask prompt.
const DEPENDENCY_PREVIEW_CHARS: usize = 2000;

const CANCELLED_MESSAGE: &str = "task cancelled";

/// One task's execution state, consumed by [`TaskRun::execute`].
pub(super) struct TaskRun {
    orchestrator: Orchestrator,
    task_id: TaskId,
    request: TaskRequest,
    budget: SharedBudget,
    cancel: CancellationToken,
    ctx: AgentContext,
}

impl TaskRun {
    pub(super) fn new(
        orchestrator: Orchestrator,
        task_id: TaskId,
        request: TaskRequest,
        budget: SharedBudget,
        cancel: CancellationToken,
        ctx: AgentContext,
    ) -> Self {
        Self {
            orchestrator,
            task_id,
            request,
            budget,
            cancel,
            ctx,
        }
    }

    pub(super) fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Run the whole pipeline. Never fails: every problem ends up in the result.
    pub(super) async fn execute(self) -> TaskResult {
        let started_at = Utc::now();
        let task_id = self.task_id;

        tracing::info!(
            task_id = %task_id,
            budget_usd = self.request.budget_usd,
            model = %self.request.model,
            "Task starting"
        );
        self.emit(TaskEvent::Started {
            task_id,
            description: self.request.description.clone(),
            budget_usd: self.request.budget_usd,
        });

        let forwarder = self.spawn_budget_forwarder().await;

        let mut results = Vec::new();
        let outcome = AssertUnwindSafe(self.drive(&mut results))
            .catch_unwind()
            .await;

        let mut error = match outcome {
            Ok(()) => None,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(task_id = %task_id, "Task pipeline panicked: {}", message);
                Some(message)
            }
        };
        if error.is_none() && self.cancel.is_cancelled() {
            error = Some(CANCELLED_MESSAGE.to_string());
        }

        let (total_cost_usd, remaining_usd) = {
            let budget = self.budget.read().await;
            (budget.spent(), budget.remaining())
        };
        let status = if error.is_some() {
            TaskStatus::Error
        } else if remaining_usd <= 0.0 {
            TaskStatus::BudgetExhausted
        } else {
            TaskStatus::Completed
        };
        let output = aggregate_output(&results, self.orchestrator.settings.output_preview_chars);

        // Drop every ledger handle so the forwarder drains and stops.
        self.orchestrator.active.write().await.remove(&task_id);
        let TaskRun {
            orchestrator,
            request,
            budget,
            ctx,
            ..
        } = self;
        drop(budget);
        drop(ctx);
        let _ = forwarder.await;

        if let Some(message) = &error {
            let _ = orchestrator.events.send(TaskEvent::Error {
                task_id,
                message: message.clone(),
            });
        }
        let _ = orchestrator.events.send(TaskEvent::Completed {
            task_id,
            status,
            total_cost_usd,
        });
        tracing::info!(
            task_id = %task_id,
            status = %status,
            total_cost_usd,
            agents = results.len(),
            "Task finished"
        );

        TaskResult {
            task_id,
            description: request.description,
            status,
            output,
            agents: results,
            total_cost_usd,
            budget_usd: request.budget_usd,
            error,
            started_at,
            finished_at: Utc::now(),
        }
    }

    fn emit(&self, event: TaskEvent) {
        let _ = self.orchestrator.events.send(event);
    }

    /// Relay ledger notifications onto the task event channel until the ledger is dropped.
    async fn spawn_budget_forwarder(&self) -> tokio::task::JoinHandle<()> {
        let mut rx = self.budget.read().await.subscribe();
        let events = self.orchestrator.events.clone();
        let task_id = self.task_id;

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let _ = events.send(TaskEvent::from_budget(task_id, event));
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(task_id = %task_id, skipped, "Budget event forwarder lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    async fn drive(&self, results: &mut Vec<AgentResult>) {
        let subtasks = self.plan(results).await;

        if self.cancel.is_cancelled() {
            return;
        }
        match subtasks {
            Some(subtasks) => self.run_subtasks(subtasks, results).await,
            None => self.run_single(results).await,
        }
    }

    /// Ask the planner for a decomposition. `None` means single-agent execution.
    async fn plan(&self, results: &mut Vec<AgentResult>) -> Option<Vec<SubTask>> {
        let total = self.request.budget_usd;
        let requested = planner_budget(total, self.orchestrator.settings.planner_percent);
        let agent_id = AgentId::new();
        let allocated = self.allocate(agent_id, requested).await;

        let result = self
            .run_agent(agent_id, AgentRole::Planner, allocated, self.planner_prompt(), None)
            .await;
        let plan = parse_plan(&result.output);
        results.push(result);

        match plan {
            Ok(subtasks) => {
                tracing::info!(task_id = %self.task_id, subtasks = subtasks.len(), "Task decomposed");
                Some(subtasks)
            }
            Err(e) => {
                tracing::warn!(task_id = %self.task_id, "No usable decomposition, running a single agent: {}", e);
                None
            }
        }
    }

    async fn run_single(&self, results: &mut Vec<AgentResult>) {
        let agent_id = AgentId::new();
        let requested = self.budget.read().await.remaining();
        let allocated = self.allocate(agent_id, requested).await;

        let result = self
            .run_agent(agent_id, AgentRole::Coder, allocated, self.single_prompt(), None)
            .await;
        results.push(result);
    }

    async fn run_subtasks(&self, mut subtasks: Vec<SubTask>, results: &mut Vec<AgentResult>) {
        let dropped = drop_unknown_dependencies(&mut subtasks);
        if dropped > 0 {
            tracing::debug!(task_id = %self.task_id, dropped, "Ignoring unknown subtask dependencies");
        }

        let total = self.request.budget_usd;
        let mut completed: BTreeSet<String> = BTreeSet::new();
        let mut outputs: HashMap<String, String> = HashMap::new();
        let order = execution_order(&subtasks);

        for (position, index) in order.iter().copied().enumerate() {
            if self.cancel.is_cancelled() {
                tracing::info!(task_id = %self.task_id, "Task cancelled, not scheduling further subtasks");
                return;
            }

            let subtask = &subtasks[index];
            if !subtask.is_ready(&completed) {
                tracing::warn!(
                    task_id = %self.task_id,
                    subtask = %subtask.id,
                    "Skipping subtask with unmet dependencies"
                );
                continue;
            }

            let agent_id = AgentId::new();
            let allocated = self
                .allocate(agent_id, subtask_budget(total, subtask.complexity))
                .await;
            if allocated <= 0.0 {
                self.budget.write().await.release(&agent_id.ledger_key());
                tracing::warn!(
                    task_id = %self.task_id,
                    abandoned = order.len() - position,
                    "Budget headroom exhausted, abandoning remaining subtasks"
                );
                return;
            }

            let prompt = self.subtask_prompt(subtask, &outputs);
            let result = self
                .run_agent(agent_id, subtask.agent_type, allocated, prompt, Some(subtask))
                .await;

            // Completed for dependency purposes even when the agent failed.
            completed.insert(subtask.id.clone());
            outputs.insert(subtask.id.clone(), result.output.clone());
            results.push(result);
        }
    }

    async fn allocate(&self, agent_id: AgentId, requested: f64) -> f64 {
        self.budget
            .write()
            .await
            .allocate(&agent_id.ledger_key(), requested)
    }

    /// Run one agent under its sub-budget, then reclaim whatever it left unspent.
    async fn run_agent(
        &self,
        agent_id: AgentId,
        role: AgentRole,
        allocated: f64,
        prompt: String,
        subtask: Option<&SubTask>,
    ) -> AgentResult {
        let name = match subtask {
            Some(subtask) => format!("{}-{}", role, subtask.id),
            None => role.name().to_string(),
        };
        let mut session = AgentSession::new(agent_id, role, self.request.model.clone(), allocated)
            .with_name(name.clone())
            .with_abort(self.cancel.child_token());
        if let Some(subtask) = subtask {
            session = session.with_subtask(subtask.id.clone());
        }

        let subtask_id = subtask.map(|s| s.id.clone());
        self.set_active_agent(
            agent_id,
            Some(ActiveAgent {
                agent_id,
                name: name.clone(),
                role,
                subtask_id: subtask_id.clone(),
            }),
        )
        .await;
        self.emit(TaskEvent::AgentStarted {
            task_id: self.task_id,
            agent_id,
            name: name.clone(),
            role,
            subtask_id,
            budget_usd: allocated,
        });

        let result = session
            .run(&prompt, self.request.attachments.clone(), &self.ctx)
            .await;

        let reclaimed = self.budget.write().await.release(&agent_id.ledger_key());
        tracing::debug!(
            task_id = %self.task_id,
            agent = %name,
            reclaimed_usd = reclaimed,
            "Reclaimed unspent sub-budget"
        );
        self.set_active_agent(agent_id, None).await;
        self.emit(TaskEvent::AgentDone {
            task_id: self.task_id,
            agent_id,
            name,
            status: result.status,
            turns: result.turns,
            cost_usd: result.cost_usd,
        });

        result
    }

    async fn set_active_agent(&self, agent_id: AgentId, agent: Option<ActiveAgent>) {
        let mut active = self.orchestrator.active.write().await;
        // A cancelled task is no longer in the map.
        let Some(task) = active.get_mut(&self.task_id) else {
            return;
        };
        match agent {
            Some(agent) => {
                task.agents.insert(agent_id, agent);
            }
            None => {
                task.agents.remove(&agent_id);
            }
        }
    }

    fn repo_line(&self) -> String {
        match &self.request.repo {
            Some(repo) => format!("\nRepository: {}", repo),
            None => String::new(),
        }
    }

    fn planner_prompt(&self) -> String {
        format!(
            "Task: {}{}\n\nBreak this task into subtasks, or reply with [] if a single agent should do it.",
            self.request.description,
            self.repo_line()
        )
    }

    fn single_prompt(&self) -> String {
        format!("{}{}", self.request.description, self.repo_line())
    }

    fn subtask_prompt(&self, subtask: &SubTask, outputs: &HashMap<String, String>) -> String {
        let mut prompt = format!(
            "Overall task: {}{}\n\nYour subtask ({}): {}",
            self.request.description,
            self.repo_line(),
            subtask.id,
            subtask.description
        );

        let finished: Vec<String> = subtask
            .depends_on
            .iter()
            .filter_map(|dep| {
                outputs
                    .get(dep)
                    .map(|output| format!("### Subtask {}\n{}", dep, truncate_chars(output, DEPENDENCY_PREVIEW_CHARS)))
            })
            .collect();
        if !finished.is_empty() {
            prompt.push_str("\n\nResults of the subtasks this one depends on:\n\n");
            prompt.push_str(&finished.join("\n\n"));
        }
        prompt
    }
}

/// One section per agent, in execution order.
fn aggregate_output(results: &[AgentResult], preview_chars: usize) -> String {
    results
        .iter()
        .map(|r| format!("### {} [{}]\n{}", r.name, r.status, truncate_chars(&r.output, preview_chars)))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
