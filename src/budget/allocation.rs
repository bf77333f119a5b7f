//! Sub-budget sizing for planner and subtask agents.
//!
//! All sizes are fractions of the task's *total* budget, not of what is left;
//! the ledger clamps each request to the headroom available at allocation time.

use crate::task::Complexity;

/// Percentage of the total budget handed to the planning agent.
pub const DEFAULT_PLANNER_PERCENT: f64 = 10.0;

/// Share of the total budget requested for a subtask of the given complexity.
///
/// | complexity | multiplier |
/// |---|---|
/// | simple | 0.10 |
/// | medium | 0.20 |
/// | complex | 0.35 |
pub fn complexity_multiplier(complexity: Complexity) -> f64 {
    match complexity {
        Complexity::Simple => 0.10,
        Complexity::Medium => 0.20,
        Complexity::Complex => 0.35,
    }
}

/// Amount to request for a subtask.
pub fn subtask_budget(total_usd: f64, complexity: Complexity) -> f64 {
    total_usd * complexity_multiplier(complexity)
}

/// Amount to request for the planner, given a planner share in percent.
pub fn planner_budget(total_usd: f64, planner_percent: f64) -> f64 {
    total_usd * planner_percent / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multipliers_grow_with_complexity() {
        assert_eq!(complexity_multiplier(Complexity::Simple), 0.10);
        assert_eq!(complexity_multiplier(Complexity::Medium), 0.20);
        assert_eq!(complexity_multiplier(Complexity::Complex), 0.35);
    }

    #[test]
    fn test_budgets_scale_total() {
        assert!((subtask_budget(10.0, Complexity::Complex) - 3.5).abs() < 1e-9);
        assert!((planner_budget(5.0, DEFAULT_PLANNER_PERCENT) - 0.5).abs() < 1e-9);
    }
}
