//! Per-task cost tracker with soft budget gates.
//!
//! The in-memory tally is authoritative within the process; an optional
//! repository sink receives a durable copy of every record. Budget checks
//! are a soft in-process gate, not a cross-process coordinator.

use dashmap::DashMap;
use tracing::warn;

use super::models::{CostRecord, TaskBudget, TaskCostSummary};

/// Durable destination for cost records.
pub trait CostRepositorySink: Send + Sync {
    /// Persist a record. Failures are logged and swallowed by the tracker.
    fn insert(&self, record: &CostRecord) -> anyhow::Result<()>;
}

/// Tracks cost, tokens, and LLM-call counts per task.
#[derive(Default)]
pub struct CostTracker {
    summaries: DashMap<String, TaskCostSummary>,
    repository: Option<Box<dyn CostRepositorySink>>,
}

impl CostTracker {
    /// In-memory tracker with no durable sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracker that writes through to a repository.
    pub fn with_repository(repository: Box<dyn CostRepositorySink>) -> Self {
        Self {
            summaries: DashMap::new(),
            repository: Some(repository),
        }
    }

    /// Record a cost event. `is_llm_call` bumps the call counter.
    pub fn record(&self, record: &CostRecord, is_llm_call: bool) {
        {
            let mut summary = self.summaries.entry(record.task_id.clone()).or_default();
            summary.total_cost_usd += record.cost_usd;
            summary.total_tokens += record.tokens;
            if is_llm_call {
                summary.llm_calls += 1;
            }
        }

        if let Some(repo) = &self.repository {
            if let Err(error) = repo.insert(record) {
                warn!(task_id = %record.task_id, %error, "cost record write-through failed");
            }
        }
    }

    /// Current summary for a task (zeroes for unseen tasks).
    pub fn summary(&self, task_id: &str) -> TaskCostSummary {
        self.summaries
            .get(task_id)
            .map(|entry| *entry.value())
            .unwrap_or_default()
    }

    /// Whether the task stays within `budget` after adding the given usage.
    /// Returns `false` as soon as any cap would be exceeded.
    pub fn check_budget(
        &self,
        task_id: &str,
        budget: &TaskBudget,
        additional_cost: f64,
        additional_tokens: u64,
        is_llm_call: bool,
    ) -> bool {
        let summary = self.summary(task_id);

        if let Some(max_cost) = budget.max_cost_usd {
            if summary.total_cost_usd + additional_cost > max_cost {
                return false;
            }
        }
        if let Some(max_tokens) = budget.max_tokens {
            if summary.total_tokens + additional_tokens > max_tokens {
                return false;
            }
        }
        if let Some(max_calls) = budget.max_llm_calls {
            let next_calls = summary.llm_calls + u64::from(is_llm_call);
            if next_calls > max_calls {
                return false;
            }
        }

        true
    }

    /// Remaining headroom under each cap: (cost, tokens, llm calls).
    /// `None` where the cap is unlimited; floors at zero once exceeded.
    pub fn get_remaining(
        &self,
        task_id: &str,
        budget: &TaskBudget,
    ) -> (Option<f64>, Option<u64>, Option<u64>) {
        let summary = self.summary(task_id);
        (
            budget
                .max_cost_usd
                .map(|max| (max - summary.total_cost_usd).max(0.0)),
            budget
                .max_tokens
                .map(|max| max.saturating_sub(summary.total_tokens)),
            budget
                .max_llm_calls
                .map(|max| max.saturating_sub(summary.llm_calls)),
        )
    }

    /// Drop the in-memory tally for a task.
    pub fn clear(&self, task_id: &str) {
        self.summaries.remove(task_id);
    }
}
