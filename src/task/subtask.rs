//! Subtask definitions, planner-output parsing and dependency ordering.
//!
//! The planner answers in free text. The first well-formed JSON array in that
//! text is the decomposition; anything else is a [`PlanError`], which callers
//! treat exactly like an empty decomposition.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::agents::AgentRole;

/// Relative size of a subtask, which drives its share of the task budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Medium,
    Complex,
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Complexity::Simple => "simple",
            Complexity::Medium => "medium",
            Complexity::Complex => "complex",
        };
        f.write_str(label)
    }
}

/// One unit of planned work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubTask {
    #[serde(deserialize_with = "id_from_value")]
    pub id: String,
    pub description: String,
    #[serde(rename = "agentType", alias = "agent_type")]
    pub agent_type: AgentRole,
    pub complexity: Complexity,
    #[serde(
        rename = "dependsOn",
        alias = "depends_on",
        default,
        deserialize_with = "ids_from_values"
    )]
    pub depends_on: BTreeSet<String>,
}

impl SubTask {
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        agent_type: AgentRole,
        complexity: Complexity,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            agent_type,
            complexity,
            depends_on: BTreeSet::new(),
        }
    }

    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.depends_on.insert(id.into());
        self
    }

    /// True when every declared dependency is in `completed`.
    pub fn is_ready(&self, completed: &BTreeSet<String>) -> bool {
        self.depends_on.iter().all(|dep| completed.contains(dep))
    }
}

fn id_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// Planners emit ids as numbers or strings interchangeably.
fn id_from_value<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = Value::deserialize(deserializer)?;
    id_to_string(&value)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| serde::de::Error::custom(format!("invalid subtask id: {}", value)))
}

fn ids_from_values<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<BTreeSet<String>, D::Error> {
    let values = Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default();
    values
        .iter()
        .map(|v| {
            id_to_string(v)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid dependency id: {}", v)))
        })
        .collect()
}

/// Why a planner answer could not be used as a decomposition.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PlanError {
    #[error("no JSON array found in planner output")]
    NoArray,

    #[error("planner returned an empty decomposition")]
    Empty,

    #[error("subtask {index} is malformed: {reason}")]
    Malformed { index: usize, reason: String },

    #[error("subtask {index} has an empty description")]
    EmptyDescription { index: usize },

    #[error("duplicate subtask id '{0}'")]
    DuplicateId(String),
}

/// Find the first well-formed JSON array embedded in `text`.
fn first_json_array(text: &str) -> Option<Vec<Value>> {
    text.match_indices('[').find_map(|(start, _)| {
        serde_json::Deserializer::from_str(&text[start..])
            .into_iter::<Value>()
            .next()
            .and_then(Result::ok)
            .and_then(|value| match value {
                Value::Array(items) => Some(items),
                _ => None,
            })
    })
}

/// Parse planner output into subtasks.
///
/// An empty array yields [`PlanError::Empty`] so that every way of not
/// decomposing goes through the same degraded path.
pub fn parse_plan(text: &str) -> Result<Vec<SubTask>, PlanError> {
    let items = first_json_array(text).ok_or(PlanError::NoArray)?;
    if items.is_empty() {
        return Err(PlanError::Empty);
    }

    let mut seen = BTreeSet::new();
    let mut subtasks = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        let mut subtask: SubTask =
            serde_json::from_value(item).map_err(|e| PlanError::Malformed {
                index,
                reason: e.to_string(),
            })?;

        subtask.description = subtask.description.trim().to_string();
        if subtask.description.is_empty() {
            return Err(PlanError::EmptyDescription { index });
        }
        if !seen.insert(subtask.id.clone()) {
            return Err(PlanError::DuplicateId(subtask.id));
        }
        subtasks.push(subtask);
    }
    Ok(subtasks)
}

/// Remove dependency ids that name no subtask in the plan.
///
/// Missing dependencies count as already satisfied. Returns how many were dropped.
pub fn drop_unknown_dependencies(subtasks: &mut [SubTask]) -> usize {
    let known: BTreeSet<String> = subtasks.iter().map(|s| s.id.clone()).collect();
    let mut dropped = 0;
    for subtask in subtasks.iter_mut() {
        let before = subtask.depends_on.len();
        subtask.depends_on.retain(|dep| known.contains(dep));
        dropped += before - subtask.depends_on.len();
    }
    dropped
}

/// Dependency-respecting execution order, as indices into `subtasks`.
///
/// Postorder depth-first traversal in input order: every subtask comes after
/// the subtasks it depends on. Unknown dependency ids are ignored and a cycle
/// is cut at the edge that closes it, so every subtask appears exactly once.
pub fn execution_order(subtasks: &[SubTask]) -> Vec<usize> {
    let index_of: HashMap<&str, usize> = subtasks
        .iter()
        .enumerate()
        .map(|(i, s)| (s.id.as_str(), i))
        .collect();

    fn visit(
        node: usize,
        subtasks: &[SubTask],
        index_of: &HashMap<&str, usize>,
        visited: &mut [bool],
        order: &mut Vec<usize>,
    ) {
        if visited[node] {
            return;
        }
        visited[node] = true;
        for dep in &subtasks[node].depends_on {
            if let Some(&next) = index_of.get(dep.as_str()) {
                visit(next, subtasks, index_of, visited, order);
            }
        }
        order.push(node);
    }

    let mut visited = vec![false; subtasks.len()];
    let mut order = Vec::with_capacity(subtasks.len());
    for node in 0..subtasks.len() {
        visit(node, subtasks, &index_of, &mut visited, &mut order);
    }
    order
}
