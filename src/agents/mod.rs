//! Agents module - task execution system.
//!
//! # Components
//! - **AgentSession**: the bounded tool-calling loop, one per agent execution
//! - **AgentContext**: collaborators shared by every agent of a task
//! - **Orchestrator**: plans a task, allocates sub-budgets and schedules agents
//!
//! # Presets
//! Every agent runs under an [`AgentRole`] (planner, coder, researcher,
//! reviewer), which fixes its display name and system prompt.

mod context;
pub mod orchestrator;
mod presets;
mod session;
mod types;

pub use context::AgentContext;
pub use orchestrator::{
    ActiveAgent, Orchestrator, OrchestratorError, OrchestratorSettings, TaskHandle,
};
pub use session::AgentSession;
pub use types::{AgentId, AgentResult, AgentRole, AgentStatus};
