//! Cost data model: records, budgets, and per-task summaries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single immutable cost event produced by a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostRecord {
    /// Record id.
    pub id: String,
    /// Tenant that incurred the cost.
    pub tenant_id: Option<String>,
    /// Owning task.
    pub task_id: String,
    /// Reasoning chain, when the call was made inside one.
    pub chain_id: Option<String>,
    /// Step within the chain.
    pub step_id: Option<String>,
    /// Tool that incurred the cost.
    pub tool_name: String,
    /// Cost in USD.
    pub cost_usd: f64,
    /// Tokens consumed.
    pub tokens: u64,
    /// Model name, for LLM calls.
    pub model: Option<String>,
    /// When the cost was recorded.
    pub created_at: DateTime<Utc>,
}

impl CostRecord {
    /// Create a record for the given task and tool.
    pub fn new(task_id: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id: None,
            task_id: task_id.into(),
            chain_id: None,
            step_id: None,
            tool_name: tool_name.into(),
            cost_usd: 0.0,
            tokens: 0,
            model: None,
            created_at: Utc::now(),
        }
    }

    /// Builder: set tenant.
    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Builder: set chain and step.
    pub fn with_chain(mut self, chain_id: impl Into<String>, step_id: Option<String>) -> Self {
        self.chain_id = Some(chain_id.into());
        self.step_id = step_id;
        self
    }

    /// Builder: set usage.
    pub fn with_usage(mut self, cost_usd: f64, tokens: u64) -> Self {
        self.cost_usd = cost_usd;
        self.tokens = tokens;
        self
    }

    /// Builder: set model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Budget caps for a task. Any unset cap is unlimited.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TaskBudget {
    /// Maximum spend in USD.
    pub max_cost_usd: Option<f64>,
    /// Maximum tokens.
    pub max_tokens: Option<u64>,
    /// Maximum LLM calls.
    pub max_llm_calls: Option<u64>,
}

impl TaskBudget {
    /// A budget with no caps.
    pub fn unlimited() -> Self {
        Self::default()
    }
}

/// Running tally for a single task.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TaskCostSummary {
    /// Total cost in USD.
    pub total_cost_usd: f64,
    /// Total tokens.
    pub total_tokens: u64,
    /// Number of LLM calls.
    pub llm_calls: u64,
}
