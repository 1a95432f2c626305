//! Cost and budget accounting.

mod models;
mod tracker;

pub use models::{CostRecord, TaskBudget, TaskCostSummary};
pub use tracker::{CostRepositorySink, CostTracker};
