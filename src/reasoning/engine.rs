//! Reasoning engine: the facade a reasoning loop drives.
//!
//! Owns the chain for one run and routes every LLM and tool call through
//! the executor so budget gates, retries, and cost attribution apply
//! uniformly. Strictly sequential: one engine, one chain, no concurrency.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};

use super::chain::{ReasoningChain, StepPayload};
use crate::cost::TaskBudget;
use crate::errors::{PlatformError, Result};
use crate::llm::LlmMessage;
use crate::tools::{ToolCallContext, ToolDefinition, ToolExecutor, ToolResult};
use crate::visibility::VisibilityLevel;

/// Outcome of an LLM call made through the engine.
#[derive(Debug, Clone)]
pub struct LlmCallOutcome {
    /// Id of the tool-result step recording the call.
    pub step_id: String,
    /// Completion text.
    pub content: String,
    /// Model that served the call.
    pub model: String,
    /// Total tokens consumed.
    pub tokens_used: u64,
}

/// Drives one reasoning chain against the tool executor.
pub struct ReasoningEngine {
    chain: ReasoningChain,
    executor: Arc<ToolExecutor>,
    budget: TaskBudget,
    cancellation: Option<crate::tasks::engine::CancellationSignal>,
}

impl ReasoningEngine {
    pub fn new(
        task_id: impl Into<String>,
        agent_id: impl Into<String>,
        tenant_id: Option<String>,
        executor: Arc<ToolExecutor>,
        budget: TaskBudget,
    ) -> Self {
        Self {
            chain: ReasoningChain::new(task_id, agent_id, tenant_id),
            executor,
            budget,
            cancellation: None,
        }
    }

    /// Builder: attach the task's cancellation signal so loops can poll it.
    pub fn with_cancellation(
        mut self,
        signal: crate::tasks::engine::CancellationSignal,
    ) -> Self {
        self.cancellation = Some(signal);
        self
    }

    /// Whether the owning task has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .map(|signal| signal.is_cancelled())
            .unwrap_or(false)
    }

    /// The chain id for this run.
    pub fn chain_id(&self) -> &str {
        &self.chain.id
    }

    /// Read access to the chain.
    pub fn chain(&self) -> &ReasoningChain {
        &self.chain
    }

    /// The budget applied to calls made through this engine.
    pub fn budget(&self) -> &TaskBudget {
        &self.budget
    }

    /// The executor this engine dispatches through.
    pub fn executor(&self) -> &Arc<ToolExecutor> {
        &self.executor
    }

    /// Tool definitions visible under the current skill scope.
    pub fn available_tools(&self) -> Vec<ToolDefinition> {
        self.executor.visible_definitions()
    }

    /// Whether the budget still allows the given claim.
    pub fn check_budget(&self, extra_cost: f64, extra_tokens: u64, is_llm_call: bool) -> bool {
        self.executor.cost_tracker().check_budget(
            &self.chain.task_id,
            &self.budget,
            extra_cost,
            extra_tokens,
            is_llm_call,
        )
    }

    /// Record a thinking step.
    pub fn add_thinking(&mut self, text: impl Into<String>, confidence: Option<f64>) -> Result<String> {
        self.chain
            .add_thinking(text, confidence, VisibilityLevel::Summary)
    }

    /// Record a synthesis step.
    pub fn add_synthesis(
        &mut self,
        conclusion: impl Into<String>,
        sources: Vec<String>,
    ) -> Result<String> {
        self.chain
            .add_synthesis(conclusion, sources, VisibilityLevel::Summary)
    }

    /// Call the LLM tool with the conversation and system prompt, recording
    /// a tool_call/tool_result pair in the chain.
    pub async fn call_llm(
        &mut self,
        messages: &[LlmMessage],
        system: &str,
        model: &str,
        temperature: f64,
    ) -> Result<LlmCallOutcome> {
        let mut arguments: HashMap<String, Value> = HashMap::new();
        arguments.insert(
            "messages".to_string(),
            json!(messages
                .iter()
                .map(|m| json!({"role": m.role, "content": m.content}))
                .collect::<Vec<Value>>()),
        );
        arguments.insert("system".to_string(), json!(system));
        arguments.insert("model".to_string(), json!(model));
        arguments.insert("temperature".to_string(), json!(temperature));

        let result = self.dispatch("llm", arguments, VisibilityLevel::Full).await?;

        if !result.success {
            return Err(PlatformError::LlmCallFailed {
                message: result
                    .error
                    .unwrap_or_else(|| "no error detail".to_string()),
            });
        }

        let value = result.value.unwrap_or_default();
        let content = value
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let model = value
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or(model)
            .to_string();

        let step_id = self
            .chain
            .steps()
            .last()
            .map(|step| step.id.clone())
            .unwrap_or_default();

        Ok(LlmCallOutcome {
            step_id,
            content,
            model,
            tokens_used: result.tokens_used,
        })
    }

    /// Dispatch a tool by name, recording the call/result pair. Executor
    /// level failures (validation, permission, budget) propagate as errors;
    /// tool-level failures come back as an unsuccessful [`ToolResult`].
    pub async fn call_tool(
        &mut self,
        tool_name: &str,
        arguments: HashMap<String, Value>,
    ) -> Result<ToolResult> {
        self.dispatch(tool_name, arguments, VisibilityLevel::Full)
            .await
    }

    async fn dispatch(
        &mut self,
        tool_name: &str,
        arguments: HashMap<String, Value>,
        visibility: VisibilityLevel,
    ) -> Result<ToolResult> {
        let (_, correlation_id) =
            self.chain
                .add_tool_call(tool_name, arguments.clone(), visibility)?;

        let mut context = ToolCallContext::new(&self.chain.task_id, &self.chain.agent_id)
            .with_chain(self.chain.id.clone());
        context.tenant_id = self.chain.tenant_id.clone();
        context.correlation_id = correlation_id.clone();

        let dispatched = self
            .executor
            .execute_scoped(
                tool_name,
                &context,
                arguments,
                Some(&self.budget),
                VisibilityLevel::Full,
            )
            .await;

        match dispatched {
            Ok(result) => {
                self.chain.add_tool_result(
                    &correlation_id,
                    result.success,
                    result.value.clone(),
                    result.error.clone(),
                    result.tokens_used,
                    result.cost_usd,
                    visibility,
                )?;
                Ok(result)
            }
            Err(error) => {
                // Record the failed dispatch so the chain stays paired, then
                // propagate the executor-level error.
                self.chain.add_tool_result(
                    &correlation_id,
                    false,
                    None,
                    Some(error.to_string()),
                    0,
                    0.0,
                    visibility,
                )?;
                Err(error)
            }
        }
    }

    /// Finish the run successfully and hand back the chain.
    pub fn finish_completed(mut self) -> ReasoningChain {
        self.chain.mark_completed();
        self.chain
    }

    /// Finish the run as failed and hand back the chain.
    pub fn finish_failed(mut self) -> ReasoningChain {
        self.chain.mark_failed();
        self.chain
    }

    /// Number of tool_call steps whose tool matches `name`.
    pub fn tool_call_count(&self, name: &str) -> usize {
        self.chain
            .steps()
            .iter()
            .filter(|step| {
                matches!(&step.payload, StepPayload::ToolCall { tool_name, .. } if tool_name == name)
            })
            .count()
    }
}
