//! Autonomous execution configuration and sub-agent context tracking.

use serde::{Deserialize, Serialize};

use super::models::Skill;

/// Platform defaults for autonomous skill execution, overridable per skill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutonomousConfig {
    pub max_iterations: u32,
    pub max_retries_per_tool: u32,
    pub timeout_per_iteration_ms: u64,
    pub early_termination: bool,
    pub model: String,
    pub temperature: f64,
    pub enable_error_recovery: bool,
}

impl Default for AutonomousConfig {
    fn default() -> Self {
        Self {
            max_iterations: 15,
            max_retries_per_tool: 3,
            timeout_per_iteration_ms: 30_000,
            early_termination: true,
            model: "claude-sonnet-4".into(),
            temperature: 0.0,
            enable_error_recovery: true,
        }
    }
}

impl AutonomousConfig {
    /// Platform defaults overridden by any fields the skill's metadata sets.
    pub fn for_skill(defaults: &AutonomousConfig, skill: &Skill) -> AutonomousConfig {
        let mut config = defaults.clone();
        let metadata = &skill.metadata;

        if let Some(max_iterations) = metadata.max_iterations {
            config.max_iterations = max_iterations;
        }
        if let Some(max_retries) = metadata.max_retries_per_tool {
            config.max_retries_per_tool = max_retries;
        }
        if let Some(timeout) = &metadata.timeout_per_iteration {
            if let Some(timeout_ms) = parse_timeout_ms(timeout) {
                config.timeout_per_iteration_ms = timeout_ms;
            }
        }
        if let Some(early_termination) = metadata.early_termination {
            config.early_termination = early_termination;
        }
        if let Some(model) = &metadata.model {
            config.model = model.clone();
        }

        config
    }
}

/// Parse a duration string like "30s", "5m", or "30000ms" to milliseconds.
/// Bare numbers are taken as seconds.
pub fn parse_timeout_ms(raw: &str) -> Option<u64> {
    let text = raw.trim().to_lowercase();
    if let Some(stripped) = text.strip_suffix("ms") {
        return stripped.parse().ok();
    }
    if let Some(stripped) = text.strip_suffix('s') {
        return stripped.parse::<u64>().ok().map(|s| s * 1000);
    }
    if let Some(stripped) = text.strip_suffix('m') {
        return stripped.parse::<u64>().ok().map(|m| m * 60_000);
    }
    text.parse::<u64>().ok().map(|s| s * 1000)
}

/// Tracks sub-agent depth and iteration budgets across forked executions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// Current fork depth; the root context is depth 0.
    pub depth: u32,
    /// Maximum fork depth.
    pub max_depth: u32,
    /// Floor for a child's iteration budget.
    pub min_child_iterations: u32,
    /// Task that created this context, when forked.
    pub parent_task_id: Option<String>,
    /// Skill that created this context, when forked.
    pub skill_name: Option<String>,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self {
            depth: 0,
            max_depth: 3,
            min_child_iterations: 3,
            parent_task_id: None,
            skill_name: None,
        }
    }
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether another fork level is permitted.
    pub fn can_spawn_sub_agent(&self) -> bool {
        self.depth < self.max_depth
    }

    /// Context for a forked child.
    pub fn create_child(&self, parent_task_id: &str, skill_name: &str) -> ExecutionContext {
        ExecutionContext {
            depth: self.depth + 1,
            max_depth: self.max_depth,
            min_child_iterations: self.min_child_iterations,
            parent_task_id: Some(parent_task_id.to_string()),
            skill_name: Some(skill_name.to_string()),
        }
    }

    /// A child's iteration budget: half the parent's, floored.
    pub fn child_iteration_budget(&self, base_iterations: u32) -> u32 {
        (base_iterations / 2).max(self.min_child_iterations)
    }
}
