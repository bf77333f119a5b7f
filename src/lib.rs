//! # budget_swarm
//!
//! Budget-constrained scheduler for cooperating LLM agents.
//!
//! One task runs under a hard dollar ceiling. A planner agent proposes a
//! dependency-ordered decomposition; the orchestrator hands each subtask a
//! sub-budget, runs its agent, and reclaims whatever the agent left unspent.
//!
//! ## Architecture
//!
//! ```text
//!        ┌──────────────────────────────────┐
//!        │           Orchestrator           │
//!        │  plan → schedule → aggregate     │
//!        └───────┬───────────────┬──────────┘
//!                │               │
//!                ▼               ▼
//!      ┌──────────────┐  ┌──────────────────┐
//!      │ AgentSession │  │  BudgetManager   │
//!      │ (tool loop)  │──▶ (global ceiling, │
//!      └──────┬───────┘  │  sub-ledgers)    │
//!             │          └──────────────────┘
//!             ▼
//!   LlmClient + ToolRegistry
//! ```
//!
//! ## Modules
//! - `agents`: agent loop, presets and the orchestrator
//! - `budget`: ledger, sub-budget allocation rules
//! - `cost`: per-model pricing table
//! - `llm`: backend contract and the OpenRouter adapter
//! - `tools`: tool trait and never-failing registry
//! - `task`: task requests/results, subtasks and planner-output parsing
//! - `events`: task lifecycle events

pub mod agents;
pub mod budget;
pub mod config;
pub mod cost;
pub mod events;
pub mod llm;
pub mod task;
pub mod tools;

#[cfg(test)]
pub(crate) mod test_support;

pub use agents::{Orchestrator, OrchestratorError, OrchestratorSettings};
pub use config::Config;
pub use task::{TaskRequest, TaskResult, TaskStatus};
