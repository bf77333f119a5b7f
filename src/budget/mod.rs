//! Budget module - spend ledger and sub-budget sizing.
//!
//! # Key Concepts
//! - BudgetManager: one global ceiling per task, per-agent sub-ledgers,
//!   threshold warnings and reclamation of unspent allocations
//! - Allocation: how much the planner and each subtask may request

mod allocation;
mod ledger;

pub use allocation::{
    complexity_multiplier, planner_budget, subtask_budget, DEFAULT_PLANNER_PERCENT,
};
pub use ledger::{
    BudgetEvent, BudgetManager, BudgetSnapshot, SharedBudget, SubLedger, DEFAULT_RESERVE_PERCENT,
};
