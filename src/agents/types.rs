//! Core types for the agent system.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::presets;

/// Unique identifier for an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(Uuid);

impl AgentId {
    /// Create a new unique agent ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Key under which this agent's spend is recorded in the budget ledger.
    pub fn ledger_key(&self) -> String {
        self.0.to_string()
    }
}

impl std::str::FromStr for AgentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Preset an agent runs under: a display name plus a system prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    Planner,
    Coder,
    Researcher,
    Reviewer,
}

impl AgentRole {
    pub fn name(&self) -> &'static str {
        match self {
            AgentRole::Planner => "planner",
            AgentRole::Coder => "coder",
            AgentRole::Researcher => "researcher",
            AgentRole::Reviewer => "reviewer",
        }
    }

    pub fn system_prompt(&self) -> &'static str {
        match self {
            AgentRole::Planner => presets::PLANNER_PROMPT,
            AgentRole::Coder => presets::CODER_PROMPT,
            AgentRole::Researcher => presets::RESEARCHER_PROMPT,
            AgentRole::Reviewer => presets::REVIEWER_PROMPT,
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for AgentRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "planner" => Ok(AgentRole::Planner),
            "coder" => Ok(AgentRole::Coder),
            "researcher" => Ok(AgentRole::Researcher),
            "reviewer" => Ok(AgentRole::Reviewer),
            other => Err(format!("unknown agent role: {}", other)),
        }
    }
}

/// How an agent's loop ended.
///
/// Budget and turn exhaustion are normal terminal states, not failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Completed,
    BudgetExhausted,
    MaxTurns,
    Error,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            AgentStatus::Completed => "completed",
            AgentStatus::BudgetExhausted => "budget_exhausted",
            AgentStatus::MaxTurns => "max_turns",
            AgentStatus::Error => "error",
        };
        f.write_str(label)
    }
}

/// Result of one agent execution.
///
/// # Invariants
/// - `output` is never empty
/// - `cost_usd` is the sum of every model call the agent made
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub agent_id: AgentId,
    pub name: String,
    pub role: AgentRole,
    pub model: String,
    /// Subtask this agent worked on, when it ran as part of a decomposition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtask_id: Option<String>,
    pub status: AgentStatus,
    pub output: String,
    pub turns: u32,
    /// Ceiling the agent ran under
    pub budget_usd: f64,
    pub cost_usd: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl AgentResult {
    pub fn is_success(&self) -> bool {
        self.status == AgentStatus::Completed
    }
}
