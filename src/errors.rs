//! Platform error taxonomy.
//!
//! Every failure mode in the core carries a unique stable code so that
//! transports and audit sinks can classify errors without string matching.
//! Tool-level retryable failures are retried inside the executor; what
//! surfaces here is the post-retry outcome.

use thiserror::Error;

/// Errors produced by the orchestration core.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// Tool lookup failed.
    #[error("Tool not found: {name}")]
    ToolNotFound { name: String },

    /// A tool with the same name is already registered.
    #[error("Tool already registered: {name}")]
    ToolAlreadyRegistered { name: String },

    /// Tool arguments failed validation against the definition.
    #[error("Tool '{tool_name}' validation failed: {message}")]
    ToolValidation { tool_name: String, message: String },

    /// Tool execution failed after exhausting any retry budget.
    #[error("Tool '{tool_name}' execution failed: {message}")]
    ToolExecution { tool_name: String, message: String },

    /// Tool execution exceeded its timeout.
    #[error("Tool '{tool_name}' timed out after {timeout_ms}ms")]
    ToolTimeout { tool_name: String, timeout_ms: u64 },

    /// Tool is not permitted in the current context (skill whitelist or roles).
    #[error("Tool '{tool_name}' not permitted: {message}")]
    ToolPermissionDenied { tool_name: String, message: String },

    /// Rate limit exceeded for the tenant or tool.
    #[error("Rate limit exceeded: {message}")]
    RateLimitExceeded { message: String },

    /// A cost/token/call budget would be exceeded by the requested call.
    #[error("Cost budget exceeded for task {task_id}: {message}")]
    CostBudgetExceeded { task_id: String, message: String },

    /// The requested model is not on the approved list.
    #[error("Model not approved: {model}")]
    ModelNotApproved { model: String },

    /// The LLM reply could not be parsed into the ReAct protocol.
    #[error("Invalid LLM response: {message}")]
    InvalidLlmResponse { message: String },

    /// The LLM call itself failed.
    #[error("LLM call failed: {message}")]
    LlmCallFailed { message: String },

    /// The reasoning loop exhausted its iteration cap.
    #[error("Maximum iterations ({max_iterations}) exceeded: {context}")]
    MaxIterationsExceeded { max_iterations: u32, context: String },

    /// Skill lookup failed.
    #[error("Skill not found: {name}")]
    SkillNotFound { name: String },

    /// A forked skill would exceed the sub-agent depth limit.
    #[error("Sub-agent depth limit ({max_depth}) exceeded at depth {depth}")]
    SubAgentDepthExceeded { depth: u32, max_depth: u32 },

    /// Handoff conflict or missing session.
    #[error("Handoff error: {message}")]
    Handoff { message: String },

    /// Prompt lookup failed for a required layer.
    #[error("Prompt not found: {reference}")]
    PromptNotFound { reference: String },

    /// Prompt composition input failed validation.
    #[error("Prompt validation failed: {message}")]
    PromptValidation { message: String },

    /// Template rendering failed.
    #[error("Prompt render failed: {message}")]
    PromptRender { message: String },

    /// A locked merge point was overridden by a higher layer.
    #[error("Merge point '{merge_point}' conflict: {message}")]
    MergePointConflict { merge_point: String, message: String },

    /// Task lookup failed.
    #[error("Task not found: {task_id}")]
    TaskNotFound { task_id: String },

    /// Agent lookup failed.
    #[error("Agent not found: {agent_id}")]
    AgentNotFound { agent_id: String },

    /// Agent-level processing failure.
    #[error("Agent processing error: {message}")]
    AgentProcessing { message: String },

    /// Catch-all for unexpected internal failures.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl PlatformError {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            PlatformError::ToolNotFound { .. } => "tool_not_found",
            PlatformError::ToolAlreadyRegistered { .. } => "tool_already_registered",
            PlatformError::ToolValidation { .. } => "tool_validation_error",
            PlatformError::ToolExecution { .. } => "tool_execution_error",
            PlatformError::ToolTimeout { .. } => "tool_timeout",
            PlatformError::ToolPermissionDenied { .. } => "tool_permission_denied",
            PlatformError::RateLimitExceeded { .. } => "rate_limit_exceeded",
            PlatformError::CostBudgetExceeded { .. } => "cost_budget_exceeded",
            PlatformError::ModelNotApproved { .. } => "model_not_approved",
            PlatformError::InvalidLlmResponse { .. } => "invalid_llm_response",
            PlatformError::LlmCallFailed { .. } => "llm_call_failed",
            PlatformError::MaxIterationsExceeded { .. } => "max_iterations_exceeded",
            PlatformError::SkillNotFound { .. } => "skill_not_found",
            PlatformError::SubAgentDepthExceeded { .. } => "sub_agent_depth_exceeded",
            PlatformError::Handoff { .. } => "handoff_error",
            PlatformError::PromptNotFound { .. } => "prompt_not_found",
            PlatformError::PromptValidation { .. } => "prompt_validation_error",
            PlatformError::PromptRender { .. } => "prompt_render_error",
            PlatformError::MergePointConflict { .. } => "merge_point_conflict",
            PlatformError::TaskNotFound { .. } => "task_not_found",
            PlatformError::AgentNotFound { .. } => "agent_not_found",
            PlatformError::AgentProcessing { .. } => "agent_processing_error",
            PlatformError::Internal { .. } => "internal_error",
        }
    }

    /// Shorthand for an internal error with a formatted message.
    pub fn internal(message: impl Into<String>) -> Self {
        PlatformError::Internal {
            message: message.into(),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PlatformError>;
