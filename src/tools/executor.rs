//! Tool execution pipeline.
//!
//! A single invocation surface that layers argument validation, skill
//! whitelist enforcement, budget gating, timeout, retry with exponential
//! backoff, result truncation, sensitive-field redaction, caching, and
//! cost attribution over the raw [`Tool`] implementations.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::BoxStream;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};

use super::base::{StreamingTool, Tool, ToolCallContext, ToolResult};
use super::registry::ToolRegistry;
use super::types::ToolType;
use crate::cost::{CostRecord, CostTracker, TaskBudget};
use crate::errors::{PlatformError, Result};
use crate::visibility::VisibilityLevel;

/// Executor-wide configuration.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum items kept in truncatable list fields.
    pub truncate_max_items: usize,
    /// Models permitted for LLM tools. Empty = any model.
    pub approved_models: Vec<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            truncate_max_items: 10,
            approved_models: Vec::new(),
        }
    }
}

/// One activation of a skill's allowed-tools filter.
#[derive(Debug, Clone)]
struct SkillScope {
    skill_name: String,
    /// `None` means the skill does not restrict tools.
    allowed_tools: Option<Vec<String>>,
}

struct CachedEntry {
    result: ToolResult,
    stored_at: Instant,
    ttl: Duration,
}

/// Uniform tool invocation surface.
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    cost_tracker: Arc<CostTracker>,
    config: ExecutorConfig,
    /// Stack of active skill scopes; the top one filters execution.
    skill_scopes: Mutex<Vec<SkillScope>>,
    cache: Mutex<HashMap<String, CachedEntry>>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, cost_tracker: Arc<CostTracker>) -> Self {
        Self::with_config(registry, cost_tracker, ExecutorConfig::default())
    }

    pub fn with_config(
        registry: Arc<ToolRegistry>,
        cost_tracker: Arc<CostTracker>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            registry,
            cost_tracker,
            config,
            skill_scopes: Mutex::new(Vec::new()),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// The registry this executor dispatches through.
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// The tracker receiving cost records.
    pub fn cost_tracker(&self) -> &Arc<CostTracker> {
        &self.cost_tracker
    }

    // -----------------------------------------------------------------------
    // Skill scopes
    // -----------------------------------------------------------------------

    /// Push a skill's allowed-tools filter onto the scope stack.
    pub fn activate_skill(&self, skill_name: &str, allowed_tools: Option<Vec<String>>) {
        self.skill_scopes.lock().push(SkillScope {
            skill_name: skill_name.to_string(),
            allowed_tools,
        });
    }

    /// Pop the named skill scope (and anything stacked above it).
    pub fn deactivate_skill(&self, skill_name: &str) {
        let mut scopes = self.skill_scopes.lock();
        if let Some(position) = scopes.iter().rposition(|s| s.skill_name == skill_name) {
            scopes.truncate(position);
        }
    }

    /// Name of the currently active skill, if any.
    pub fn active_skill(&self) -> Option<String> {
        self.skill_scopes
            .lock()
            .last()
            .map(|scope| scope.skill_name.clone())
    }

    /// Tool definitions visible under the current skill scope.
    pub fn visible_definitions(&self) -> Vec<super::base::ToolDefinition> {
        let scopes = self.skill_scopes.lock();
        match scopes.last().and_then(|scope| scope.allowed_tools.clone()) {
            Some(allowed) => self.registry.list_allowed(&allowed),
            None => self.registry.list(),
        }
    }

    fn check_skill_scope(&self, tool_name: &str) -> Result<()> {
        let scopes = self.skill_scopes.lock();
        if let Some(scope) = scopes.last() {
            if let Some(allowed) = &scope.allowed_tools {
                if !allowed.iter().any(|name| name == tool_name) {
                    return Err(PlatformError::ToolPermissionDenied {
                        tool_name: tool_name.to_string(),
                        message: format!(
                            "not in allowed tools of skill '{}'",
                            scope.skill_name
                        ),
                    });
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    /// Execute a tool without a budget gate, at full visibility.
    pub async fn execute(
        &self,
        tool_name: &str,
        context: &ToolCallContext,
        arguments: HashMap<String, Value>,
    ) -> Result<ToolResult> {
        self.execute_scoped(tool_name, context, arguments, None, VisibilityLevel::Full)
            .await
    }

    /// Execute a tool through the full pipeline.
    ///
    /// `budget` gates the call against the task's tally; `caller_visibility`
    /// controls sensitive-field redaction on the returned result.
    pub async fn execute_scoped(
        &self,
        tool_name: &str,
        context: &ToolCallContext,
        arguments: HashMap<String, Value>,
        budget: Option<&TaskBudget>,
        caller_visibility: VisibilityLevel,
    ) -> Result<ToolResult> {
        let tool = self.registry.get(tool_name)?;
        let definition = tool.definition().clone();

        definition.validate_arguments(&arguments)?;
        let arguments = definition.apply_defaults(&arguments);

        self.check_skill_scope(tool_name)?;

        let is_llm = definition.tool_type == ToolType::Llm;
        if let Some(budget) = budget {
            let claimed_cost = context.max_cost_usd.unwrap_or(0.0);
            let claimed_tokens = context.max_tokens.unwrap_or(0);
            let within = self.cost_tracker.check_budget(
                &context.task_id,
                budget,
                claimed_cost,
                claimed_tokens,
                is_llm,
            );
            if !within {
                return Err(PlatformError::CostBudgetExceeded {
                    task_id: context.task_id.clone(),
                    message: format!("budget would be exceeded by tool '{}'", tool_name),
                });
            }
        }

        if is_llm && !self.config.approved_models.is_empty() {
            if let Some(Value::String(model)) = arguments.get("model") {
                if !self.config.approved_models.iter().any(|m| m == model) {
                    return Err(PlatformError::ModelNotApproved {
                        model: model.clone(),
                    });
                }
            }
        }

        // Cache hit short-circuits dispatch and post-processing.
        let cache_key = definition
            .cache_ttl_seconds
            .map(|_| Self::cache_key(tool_name, &arguments));
        if let Some(key) = &cache_key {
            if let Some(cached) = self.cache_lookup(key) {
                debug!(tool = tool_name, "serving cached tool result");
                return Ok(cached);
            }
        }

        let timeout_ms = match context.remaining_budget_ms {
            Some(remaining) => definition.timeout_ms.min(remaining),
            None => definition.timeout_ms,
        };

        let mut result = self
            .dispatch_with_retry(tool.as_ref(), context, &arguments, timeout_ms)
            .await?;

        if result.success {
            result = result.truncate_for_context(self.config.truncate_max_items);
            if caller_visibility != VisibilityLevel::Full
                && !definition.visibility.sensitive_fields.is_empty()
            {
                if let Some(value) = &mut result.value {
                    let sensitive = &definition.visibility.sensitive_fields;
                    for (key, field_value) in value.iter_mut() {
                        if sensitive.iter().any(|field| field == key) {
                            *field_value = Value::String("[REDACTED]".to_string());
                        } else {
                            crate::visibility::redact_sensitive_fields(field_value, sensitive);
                        }
                    }
                }
            }
        }

        let record = CostRecord::new(&context.task_id, tool_name)
            .with_usage(result.cost_usd, result.tokens_used);
        let record = match &context.tenant_id {
            Some(tenant) => record.with_tenant(tenant.clone()),
            None => record,
        };
        let record = match &context.chain_id {
            Some(chain) => record.with_chain(chain.clone(), None),
            None => record,
        };
        self.cost_tracker.record(&record, is_llm);

        if let (Some(key), Some(ttl)) = (cache_key, definition.cache_ttl_seconds) {
            if result.success {
                self.cache_store(key, &result, Duration::from_secs(ttl));
            }
        }

        Ok(result)
    }

    /// Execute a streaming tool: same validation and scope checks, then the
    /// raw chunk stream. The final chunk carries `done=true` plus metadata.
    pub async fn execute_streaming(
        &self,
        tool: &dyn StreamingTool,
        context: &ToolCallContext,
        arguments: HashMap<String, Value>,
    ) -> Result<BoxStream<'static, Result<HashMap<String, Value>>>> {
        let definition = tool.definition();
        definition.validate_arguments(&arguments)?;
        let arguments = definition.apply_defaults(&arguments);
        self.check_skill_scope(&definition.name)?;
        tool.execute_streaming(context, arguments).await
    }

    async fn dispatch_with_retry(
        &self,
        tool: &dyn Tool,
        context: &ToolCallContext,
        arguments: &HashMap<String, Value>,
        timeout_ms: u64,
    ) -> Result<ToolResult> {
        let definition = tool.definition();
        let retry = &definition.retry;
        let mut attempt: u32 = 0;

        loop {
            let started = Instant::now();
            let outcome = tokio::time::timeout(
                Duration::from_millis(timeout_ms),
                tool.execute(context, arguments.clone()),
            )
            .await;

            let error_text = match outcome {
                Err(_) => {
                    return Err(PlatformError::ToolTimeout {
                        tool_name: definition.name.clone(),
                        timeout_ms,
                    });
                }
                Ok(Ok(mut result)) => {
                    if result.success {
                        result.retry_count = attempt;
                        return Ok(result);
                    }
                    let error = result
                        .error
                        .clone()
                        .unwrap_or_else(|| "unknown error".to_string());
                    if attempt >= retry.max_retries || !retry.is_retryable(&error) {
                        result.retry_count = attempt;
                        result.duration_ms = started.elapsed().as_millis() as u64;
                        return Ok(result);
                    }
                    error
                }
                Ok(Err(error)) => {
                    let text = error.to_string();
                    if attempt >= retry.max_retries || !retry.is_retryable(&text) {
                        return Err(error);
                    }
                    text
                }
            };

            warn!(
                tool = %definition.name,
                attempt,
                error = %error_text,
                "retrying tool after retryable error"
            );
            tokio::time::sleep(retry.backoff_for_attempt(attempt)).await;
            attempt += 1;
        }
    }

    // -----------------------------------------------------------------------
    // Result cache
    // -----------------------------------------------------------------------

    fn cache_key(tool_name: &str, arguments: &HashMap<String, Value>) -> String {
        let mut keys: Vec<&String> = arguments.keys().collect();
        keys.sort();
        let canonical: Vec<String> = keys
            .iter()
            .map(|k| format!("{}={}", k, arguments[k.as_str()]))
            .collect();
        format!("{}::{}", tool_name, canonical.join("&"))
    }

    fn cache_lookup(&self, key: &str) -> Option<ToolResult> {
        let mut cache = self.cache.lock();
        match cache.get(key) {
            Some(entry) if entry.stored_at.elapsed() <= entry.ttl => {
                let mut result = entry.result.clone();
                result.cached = true;
                Some(result)
            }
            Some(_) => {
                cache.remove(key);
                None
            }
            None => None,
        }
    }

    fn cache_store(&self, key: String, result: &ToolResult, ttl: Duration) {
        self.cache.lock().insert(
            key,
            CachedEntry {
                result: result.clone(),
                stored_at: Instant::now(),
                ttl,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::tools::base::{
        ToolDefinition, ToolParameter, ToolRetryConfig, ToolVisibilityConfig,
    };
    use crate::tools::types::ParameterType;

    struct EchoTool {
        definition: ToolDefinition,
    }

    impl EchoTool {
        fn new() -> Arc<dyn Tool> {
            Arc::new(Self {
                definition: ToolDefinition::new(
                    "echo",
                    ToolType::Function,
                    "Echo the input",
                    vec![ToolParameter::required(
                        "text",
                        ParameterType::String,
                        "Text to echo",
                    )],
                    1000,
                )
                .unwrap(),
            })
        }
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn definition(&self) -> &ToolDefinition {
            &self.definition
        }

        async fn execute(
            &self,
            _context: &ToolCallContext,
            arguments: HashMap<String, Value>,
        ) -> Result<ToolResult> {
            let mut value = HashMap::new();
            value.insert("echo".to_string(), arguments["text"].clone());
            Ok(ToolResult::ok(value, 1))
        }
    }

    struct FlakyTool {
        definition: ToolDefinition,
        calls: AtomicU32,
        fail_times: u32,
    }

    impl FlakyTool {
        fn new(fail_times: u32) -> Arc<FlakyTool> {
            let retry = ToolRetryConfig {
                max_retries: 3,
                backoff_ms: 1,
                backoff_multiplier: 1.0,
                retryable_errors: vec!["transient".into()],
            };
            Arc::new(Self {
                definition: ToolDefinition::new(
                    "flaky",
                    ToolType::Api,
                    "Fails a few times",
                    vec![],
                    1000,
                )
                .unwrap()
                .with_retry(retry),
                calls: AtomicU32::new(0),
                fail_times,
            })
        }
    }

    #[async_trait]
    impl Tool for FlakyTool {
        fn definition(&self) -> &ToolDefinition {
            &self.definition
        }

        async fn execute(
            &self,
            _context: &ToolCallContext,
            _arguments: HashMap<String, Value>,
        ) -> Result<ToolResult> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_times {
                Ok(ToolResult::failed("transient glitch", 1))
            } else {
                let mut value = HashMap::new();
                value.insert("ok".to_string(), json!(true));
                Ok(ToolResult::ok(value, 1))
            }
        }
    }

    struct SlowTool {
        definition: ToolDefinition,
    }

    #[async_trait]
    impl Tool for SlowTool {
        fn definition(&self) -> &ToolDefinition {
            &self.definition
        }

        async fn execute(
            &self,
            _context: &ToolCallContext,
            _arguments: HashMap<String, Value>,
        ) -> Result<ToolResult> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(ToolResult::ok(HashMap::new(), 200))
        }
    }

    fn executor_with(tools: Vec<Arc<dyn Tool>>) -> ToolExecutor {
        let registry = Arc::new(ToolRegistry::new());
        for tool in tools {
            registry.register(tool).unwrap();
        }
        ToolExecutor::new(registry, Arc::new(CostTracker::new()))
    }

    fn context() -> ToolCallContext {
        ToolCallContext::new("task-1", "agent-1")
    }

    #[tokio::test]
    async fn test_execute_happy_path() {
        let executor = executor_with(vec![EchoTool::new()]);
        let mut args = HashMap::new();
        args.insert("text".to_string(), json!("hello"));

        let result = executor.execute("echo", &context(), args).await.unwrap();
        assert!(result.success);
        assert_eq!(result.value.unwrap()["echo"], json!("hello"));
    }

    #[tokio::test]
    async fn test_execute_validation_failure() {
        let executor = executor_with(vec![EchoTool::new()]);
        let err = executor
            .execute("echo", &context(), HashMap::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "tool_validation_error");
    }

    #[tokio::test]
    async fn test_execute_unknown_tool() {
        let executor = executor_with(vec![]);
        let err = executor
            .execute("missing", &context(), HashMap::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "tool_not_found");
    }

    #[tokio::test]
    async fn test_skill_whitelist_blocks_tool() {
        let executor = executor_with(vec![EchoTool::new()]);
        executor.activate_skill("restricted", Some(vec!["other_tool".to_string()]));

        let mut args = HashMap::new();
        args.insert("text".to_string(), json!("hi"));
        let err = executor.execute("echo", &context(), args).await.unwrap_err();
        assert_eq!(err.code(), "tool_permission_denied");

        executor.deactivate_skill("restricted");
        let mut args = HashMap::new();
        args.insert("text".to_string(), json!("hi"));
        assert!(executor.execute("echo", &context(), args).await.is_ok());
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let flaky = FlakyTool::new(2);
        let executor = executor_with(vec![flaky.clone() as Arc<dyn Tool>]);

        let result = executor
            .execute("flaky", &context(), HashMap::new())
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.retry_count, 2);
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_returns_failure() {
        let flaky = FlakyTool::new(10);
        let executor = executor_with(vec![flaky as Arc<dyn Tool>]);

        let result = executor
            .execute("flaky", &context(), HashMap::new())
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.retry_count, 3);
    }

    #[tokio::test]
    async fn test_timeout_produces_tool_timeout() {
        let slow: Arc<dyn Tool> = Arc::new(SlowTool {
            definition: ToolDefinition::new("slow", ToolType::Function, "slow", vec![], 20)
                .unwrap(),
        });
        let executor = executor_with(vec![slow]);

        let err = executor
            .execute("slow", &context(), HashMap::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "tool_timeout");
    }

    #[tokio::test]
    async fn test_remaining_budget_tightens_timeout() {
        let slow: Arc<dyn Tool> = Arc::new(SlowTool {
            definition: ToolDefinition::new("slow", ToolType::Function, "slow", vec![], 10_000)
                .unwrap(),
        });
        let executor = executor_with(vec![slow]);

        let mut ctx = context();
        ctx.remaining_budget_ms = Some(20);
        let err = executor
            .execute("slow", &ctx, HashMap::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "tool_timeout");
    }

    #[tokio::test]
    async fn test_budget_gate_refuses_call() {
        let executor = executor_with(vec![EchoTool::new()]);
        let budget = TaskBudget {
            max_tokens: Some(100),
            ..TaskBudget::default()
        };

        let mut ctx = context();
        ctx.max_tokens = Some(500);
        let mut args = HashMap::new();
        args.insert("text".to_string(), json!("hi"));

        let err = executor
            .execute_scoped("echo", &ctx, args, Some(&budget), VisibilityLevel::Full)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "cost_budget_exceeded");
    }

    #[tokio::test]
    async fn test_sensitive_fields_redacted_for_summary_viewers() {
        struct SecretTool {
            definition: ToolDefinition,
        }

        #[async_trait]
        impl Tool for SecretTool {
            fn definition(&self) -> &ToolDefinition {
                &self.definition
            }

            async fn execute(
                &self,
                _context: &ToolCallContext,
                _arguments: HashMap<String, Value>,
            ) -> Result<ToolResult> {
                let mut value = HashMap::new();
                value.insert("api_key".to_string(), json!("sk-12345"));
                value.insert(
                    "nested".to_string(),
                    json!({"password": "hunter2", "note": "fine"}),
                );
                Ok(ToolResult::ok(value, 1))
            }
        }

        let definition = ToolDefinition::new(
            "secret_fetch",
            ToolType::Api,
            "Returns secrets",
            vec![],
            1000,
        )
        .unwrap()
        .with_visibility(ToolVisibilityConfig {
            default_level: VisibilityLevel::Full,
            summary_template: None,
            sensitive_fields: vec!["api_key".into(), "password".into()],
        });

        let executor = executor_with(vec![Arc::new(SecretTool { definition })]);
        let result = executor
            .execute_scoped(
                "secret_fetch",
                &context(),
                HashMap::new(),
                None,
                VisibilityLevel::Summary,
            )
            .await
            .unwrap();

        let value = result.value.unwrap();
        assert_eq!(value["api_key"], json!("[REDACTED]"));
        assert_eq!(value["nested"]["password"], json!("[REDACTED]"));
        assert_eq!(value["nested"]["note"], json!("fine"));
    }

    #[tokio::test]
    async fn test_cached_tool_short_circuits() {
        struct CountingTool {
            definition: ToolDefinition,
            calls: AtomicU32,
        }

        #[async_trait]
        impl Tool for CountingTool {
            fn definition(&self) -> &ToolDefinition {
                &self.definition
            }

            async fn execute(
                &self,
                _context: &ToolCallContext,
                _arguments: HashMap<String, Value>,
            ) -> Result<ToolResult> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                let mut value = HashMap::new();
                value.insert("n".to_string(), json!(1));
                Ok(ToolResult::ok(value, 1))
            }
        }

        let tool = Arc::new(CountingTool {
            definition: ToolDefinition::new("counted", ToolType::Api, "cached", vec![], 1000)
                .unwrap()
                .with_cache_ttl(60),
            calls: AtomicU32::new(0),
        });
        let executor = executor_with(vec![tool.clone() as Arc<dyn Tool>]);

        let first = executor
            .execute("counted", &context(), HashMap::new())
            .await
            .unwrap();
        assert!(!first.cached);
        let second = executor
            .execute("counted", &context(), HashMap::new())
            .await
            .unwrap();
        assert!(second.cached);
        assert_eq!(tool.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unapproved_model_rejected() {
        use crate::llm::testing::ScriptedLlmClient;
        use crate::tools::builtin::LlmTool;

        let registry = Arc::new(ToolRegistry::new());
        registry
            .register(Arc::new(LlmTool::new(
                Arc::new(ScriptedLlmClient::new(vec!["unused"])),
                "claude-sonnet-4",
            )))
            .unwrap();
        let executor = ToolExecutor::with_config(
            registry,
            Arc::new(CostTracker::new()),
            ExecutorConfig {
                approved_models: vec!["claude-sonnet-4".into()],
                ..ExecutorConfig::default()
            },
        );

        let mut args = HashMap::new();
        args.insert("messages".to_string(), json!([{"role": "user", "content": "hi"}]));
        args.insert("model".to_string(), json!("mystery-model"));

        let err = executor.execute("llm", &context(), args).await.unwrap_err();
        assert_eq!(err.code(), "model_not_approved");
    }

    #[tokio::test]
    async fn test_cost_recorded_per_call() {
        let executor = executor_with(vec![EchoTool::new()]);
        let mut args = HashMap::new();
        args.insert("text".to_string(), json!("hi"));
        executor.execute("echo", &context(), args).await.unwrap();

        // Non-LLM tool: no llm_calls, but a record exists with zero usage.
        let summary = executor.cost_tracker().summary("task-1");
        assert_eq!(summary.llm_calls, 0);
    }
}
