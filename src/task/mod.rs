//! Task module - submitted tasks, their results, and planned subtasks.

pub mod task;
mod subtask;

pub use subtask::{drop_unknown_dependencies, execution_order, parse_plan, Complexity, PlanError, SubTask};
pub use task::{TaskId, TaskRequest, TaskResult, TaskStatus};
