//! Base tool abstractions.
//!
//! Defines the [`ToolDefinition`] family describing a tool's contract, the
//! [`ToolCallContext`] threaded through every invocation, the [`ToolResult`]
//! returned by implementations, and the [`Tool`]/[`StreamingTool`] traits.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::stream::BoxStream;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::{AuditLevel, ParameterType, ToolType};
use crate::errors::{PlatformError, Result};
use crate::visibility::VisibilityLevel;

static SNAKE_CASE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("invalid snake_case regex"));

// ---------------------------------------------------------------------------
// Parameter specification
// ---------------------------------------------------------------------------

/// Specification for a single tool parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameter {
    /// Parameter name (snake_case).
    pub name: String,
    /// Parameter type.
    #[serde(rename = "type")]
    pub param_type: ParameterType,
    /// Human-readable description.
    pub description: String,
    /// Whether the parameter must be supplied.
    #[serde(default)]
    pub required: bool,
    /// Default value used when an optional parameter is omitted.
    #[serde(default)]
    pub default: Option<Value>,
}

impl ToolParameter {
    /// Create a required parameter.
    pub fn required(
        name: impl Into<String>,
        param_type: ParameterType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: description.into(),
            required: true,
            default: None,
        }
    }

    /// Create an optional parameter with an optional default.
    pub fn optional(
        name: impl Into<String>,
        param_type: ParameterType,
        description: impl Into<String>,
        default: Option<Value>,
    ) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: description.into(),
            required: false,
            default,
        }
    }
}

// ---------------------------------------------------------------------------
// Retry / visibility / permission configuration
// ---------------------------------------------------------------------------

/// Retry behavior for a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRetryConfig {
    /// Maximum retry attempts after the initial call.
    pub max_retries: u32,
    /// Initial backoff delay in milliseconds.
    pub backoff_ms: u64,
    /// Multiplier applied per attempt.
    pub backoff_multiplier: f64,
    /// Error-text patterns (regex) that qualify for retry. An empty list
    /// means no error is retryable.
    #[serde(default)]
    pub retryable_errors: Vec<String>,
}

impl Default for ToolRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_ms: 1000,
            backoff_multiplier: 2.0,
            retryable_errors: Vec::new(),
        }
    }
}

impl ToolRetryConfig {
    /// Whether the given error text matches a retryable pattern.
    pub fn is_retryable(&self, error: &str) -> bool {
        self.retryable_errors.iter().any(|pattern| {
            Regex::new(pattern)
                .map(|re| re.is_match(error))
                .unwrap_or_else(|_| error.contains(pattern.as_str()))
        })
    }

    /// Backoff delay for the given attempt (0-based).
    pub fn backoff_for_attempt(&self, attempt: u32) -> std::time::Duration {
        let millis = self.backoff_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        std::time::Duration::from_millis(millis as u64)
    }
}

/// Visibility and summarization configuration for tool results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolVisibilityConfig {
    /// Default visibility level for results of this tool.
    #[serde(default = "default_full")]
    pub default_level: VisibilityLevel,
    /// Optional `{field}` template used when summarizing results.
    #[serde(default)]
    pub summary_template: Option<String>,
    /// Result fields redacted for viewers without full visibility.
    #[serde(default)]
    pub sensitive_fields: Vec<String>,
}

impl Default for ToolVisibilityConfig {
    fn default() -> Self {
        Self {
            default_level: VisibilityLevel::Full,
            summary_template: None,
            sensitive_fields: Vec::new(),
        }
    }
}

fn default_full() -> VisibilityLevel {
    VisibilityLevel::Full
}

/// Permission requirements for executing a tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolPermissions {
    /// Roles required to execute this tool (empty = unrestricted).
    #[serde(default)]
    pub required_roles: Vec<String>,
    /// Audit level for executions of this tool.
    #[serde(default)]
    pub audit_level: AuditLevel,
}

// ---------------------------------------------------------------------------
// Tool definition
// ---------------------------------------------------------------------------

/// Complete specification for a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique snake_case name.
    pub name: String,
    /// Kind tag.
    #[serde(rename = "type")]
    pub tool_type: ToolType,
    /// Human-readable description.
    pub description: String,
    /// Ordered parameter specs.
    #[serde(default)]
    pub parameters: Vec<ToolParameter>,
    /// Execution timeout in milliseconds.
    pub timeout_ms: u64,
    /// Retry behavior.
    #[serde(default)]
    pub retry: ToolRetryConfig,
    /// Optional result cache TTL in seconds (None = no caching).
    #[serde(default)]
    pub cache_ttl_seconds: Option<u64>,
    /// Visibility configuration.
    #[serde(default)]
    pub visibility: ToolVisibilityConfig,
    /// Permission requirements.
    #[serde(default)]
    pub permissions: ToolPermissions,
}

impl ToolDefinition {
    /// Construct a definition, validating naming conventions.
    pub fn new(
        name: impl Into<String>,
        tool_type: ToolType,
        description: impl Into<String>,
        parameters: Vec<ToolParameter>,
        timeout_ms: u64,
    ) -> Result<Self> {
        let name = name.into();
        if !SNAKE_CASE_RE.is_match(&name) {
            return Err(PlatformError::ToolValidation {
                tool_name: name.clone(),
                message: format!("tool name '{}' must be snake_case", name),
            });
        }
        for param in &parameters {
            if !SNAKE_CASE_RE.is_match(&param.name) {
                return Err(PlatformError::ToolValidation {
                    tool_name: name.clone(),
                    message: format!("parameter name '{}' must be snake_case", param.name),
                });
            }
        }
        Ok(Self {
            name,
            tool_type,
            description: description.into(),
            parameters,
            timeout_ms,
            retry: ToolRetryConfig::default(),
            cache_ttl_seconds: None,
            visibility: ToolVisibilityConfig::default(),
            permissions: ToolPermissions::default(),
        })
    }

    /// Builder: set retry config.
    pub fn with_retry(mut self, retry: ToolRetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Builder: set cache TTL.
    pub fn with_cache_ttl(mut self, seconds: u64) -> Self {
        self.cache_ttl_seconds = Some(seconds);
        self
    }

    /// Builder: set visibility config.
    pub fn with_visibility(mut self, visibility: ToolVisibilityConfig) -> Self {
        self.visibility = visibility;
        self
    }

    /// Builder: set permissions.
    pub fn with_permissions(mut self, permissions: ToolPermissions) -> Self {
        self.permissions = permissions;
        self
    }

    /// Validate arguments against the parameter list: required parameters
    /// present, no unknown keys, primitive types compatible.
    pub fn validate_arguments(&self, arguments: &HashMap<String, Value>) -> Result<()> {
        for param in &self.parameters {
            if param.required && !arguments.contains_key(&param.name) {
                return Err(PlatformError::ToolValidation {
                    tool_name: self.name.clone(),
                    message: format!("required parameter '{}' missing", param.name),
                });
            }
        }

        let known: std::collections::HashSet<&str> =
            self.parameters.iter().map(|p| p.name.as_str()).collect();
        let mut unknown: Vec<&str> = arguments
            .keys()
            .map(|k| k.as_str())
            .filter(|k| !known.contains(k))
            .collect();
        if !unknown.is_empty() {
            unknown.sort_unstable();
            return Err(PlatformError::ToolValidation {
                tool_name: self.name.clone(),
                message: format!("unknown parameters: {}", unknown.join(", ")),
            });
        }

        for param in &self.parameters {
            if let Some(value) = arguments.get(&param.name) {
                if !value.is_null() && !param.param_type.matches(value) {
                    return Err(PlatformError::ToolValidation {
                        tool_name: self.name.clone(),
                        message: format!(
                            "parameter '{}' expected {:?}, got {}",
                            param.name, param.param_type, value
                        ),
                    });
                }
            }
        }

        Ok(())
    }

    /// Arguments with defaults filled in for omitted optional parameters.
    pub fn apply_defaults(&self, arguments: &HashMap<String, Value>) -> HashMap<String, Value> {
        let mut filled = arguments.clone();
        for param in &self.parameters {
            if !filled.contains_key(&param.name) {
                if let Some(default) = &param.default {
                    filled.insert(param.name.clone(), default.clone());
                }
            }
        }
        filled
    }
}

// ---------------------------------------------------------------------------
// Call context
// ---------------------------------------------------------------------------

/// Execution context threaded through every tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallContext {
    /// Correlates the call with its result step in the reasoning chain.
    pub correlation_id: String,
    /// Owning task.
    pub task_id: String,
    /// Calling agent.
    pub agent_id: String,
    /// Tenant, when known.
    #[serde(default)]
    pub tenant_id: Option<String>,
    /// Reasoning chain this call belongs to.
    #[serde(default)]
    pub chain_id: Option<String>,
    /// Per-call token cap.
    #[serde(default)]
    pub max_tokens: Option<u64>,
    /// Per-call cost cap in USD.
    #[serde(default)]
    pub max_cost_usd: Option<f64>,
    /// Remaining wall-clock budget for this call in milliseconds. The
    /// effective timeout is the smaller of this and the definition timeout.
    #[serde(default)]
    pub remaining_budget_ms: Option<u64>,
}

impl ToolCallContext {
    /// Minimal context for a task/agent pair with a fresh correlation id.
    pub fn new(task_id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            correlation_id: uuid::Uuid::new_v4().to_string(),
            task_id: task_id.into(),
            agent_id: agent_id.into(),
            tenant_id: None,
            chain_id: None,
            max_tokens: None,
            max_cost_usd: None,
            remaining_budget_ms: None,
        }
    }

    /// Builder: set tenant.
    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Builder: set chain.
    pub fn with_chain(mut self, chain_id: impl Into<String>) -> Self {
        self.chain_id = Some(chain_id.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Tool result
// ---------------------------------------------------------------------------

/// Outcome of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether execution succeeded.
    pub success: bool,
    /// Result fields on success.
    #[serde(default)]
    pub value: Option<HashMap<String, Value>>,
    /// Error message on failure (required when `success` is false).
    #[serde(default)]
    pub error: Option<String>,
    /// Execution duration in milliseconds.
    pub duration_ms: u64,
    /// Tokens consumed (LLM tools).
    #[serde(default)]
    pub tokens_used: u64,
    /// Cost in USD (LLM tools).
    #[serde(default)]
    pub cost_usd: f64,
    /// Whether the result was served from cache.
    #[serde(default)]
    pub cached: bool,
    /// Retries attempted before this outcome.
    #[serde(default)]
    pub retry_count: u32,
    /// Result fields that may be truncated to save context.
    #[serde(default)]
    pub truncatable_fields: Vec<String>,
}

impl ToolResult {
    /// Successful result with the given value map.
    pub fn ok(value: HashMap<String, Value>, duration_ms: u64) -> Self {
        Self {
            success: true,
            value: Some(value),
            error: None,
            duration_ms,
            tokens_used: 0,
            cost_usd: 0.0,
            cached: false,
            retry_count: 0,
            truncatable_fields: Vec::new(),
        }
    }

    /// Failed result. The error message must be non-empty.
    pub fn failed(error: impl Into<String>, duration_ms: u64) -> Self {
        let error = error.into();
        debug_assert!(!error.is_empty(), "failed results require an error message");
        Self {
            success: false,
            value: None,
            error: Some(error),
            duration_ms,
            tokens_used: 0,
            cost_usd: 0.0,
            cached: false,
            retry_count: 0,
            truncatable_fields: Vec::new(),
        }
    }

    /// Builder: attach usage numbers.
    pub fn with_usage(mut self, tokens: u64, cost_usd: f64) -> Self {
        self.tokens_used = tokens;
        self.cost_usd = cost_usd;
        self
    }

    /// Builder: mark fields as truncatable.
    pub fn with_truncatable(mut self, fields: Vec<String>) -> Self {
        self.truncatable_fields = fields;
        self
    }

    /// Truncate list fields named in `truncatable_fields` to `max_items`,
    /// attaching a `<field>_truncation_note` describing what was dropped.
    /// Non-list fields and everything else are preserved.
    pub fn truncate_for_context(&self, max_items: usize) -> ToolResult {
        let value = match &self.value {
            Some(v) if !self.truncatable_fields.is_empty() => v,
            _ => return self.clone(),
        };

        let mut truncated = value.clone();
        for field in &self.truncatable_fields {
            if let Some(Value::Array(items)) = truncated.get(field) {
                if items.len() > max_items {
                    let original = items.len();
                    let kept: Vec<Value> = items.iter().take(max_items).cloned().collect();
                    truncated.insert(field.clone(), Value::Array(kept));
                    truncated.insert(
                        format!("{}_truncation_note", field),
                        Value::String(format!("Showing {} of {} items", max_items, original)),
                    );
                }
            }
        }

        let mut result = self.clone();
        result.value = Some(truncated);
        result
    }
}

// ---------------------------------------------------------------------------
// Tool traits
// ---------------------------------------------------------------------------

/// Abstract interface implemented by all tools.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The tool's definition.
    fn definition(&self) -> &ToolDefinition;

    /// Execute with validated arguments.
    async fn execute(
        &self,
        context: &ToolCallContext,
        arguments: HashMap<String, Value>,
    ) -> Result<ToolResult>;

    /// Human-readable summary of a result, using the definition's
    /// `summary_template` when it fully applies.
    fn summarize(&self, result: &ToolResult) -> String {
        let definition = self.definition();
        if !result.success {
            return format!(
                "Tool '{}' failed: {}",
                definition.name,
                result.error.as_deref().unwrap_or("unknown error")
            );
        }

        if let (Some(template), Some(value)) =
            (&definition.visibility.summary_template, &result.value)
        {
            let mut summary = template.clone();
            for (key, val) in value {
                let placeholder = format!("{{{}}}", key);
                if summary.contains(&placeholder) {
                    summary = summary.replace(&placeholder, &stringify_value(val));
                }
            }
            if !summary.contains('{') {
                return summary;
            }
        }

        match &result.value {
            Some(value) if !value.is_empty() => {
                let count = value.len();
                format!(
                    "Tool '{}' succeeded with {} result field{}",
                    definition.name,
                    count,
                    if count == 1 { "" } else { "s" }
                )
            }
            _ => format!("Tool '{}' succeeded", definition.name),
        }
    }
}

impl std::fmt::Debug for dyn Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("definition", self.definition())
            .finish()
    }
}

/// Render a JSON value without the quoting noise of `Value::to_string` for
/// plain strings.
pub fn stringify_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Tools that produce a bounded sequence of result chunks. The final chunk
/// carries `done=true` plus summary metadata (model, token counts).
#[async_trait]
pub trait StreamingTool: Tool {
    /// Execute with streaming results.
    async fn execute_streaming(
        &self,
        context: &ToolCallContext,
        arguments: HashMap<String, Value>,
    ) -> Result<BoxStream<'static, Result<HashMap<String, Value>>>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_definition() -> ToolDefinition {
        ToolDefinition::new(
            "search",
            ToolType::Function,
            "Search things",
            vec![
                ToolParameter::required("query", ParameterType::String, "Search query"),
                ToolParameter::optional(
                    "limit",
                    ParameterType::Integer,
                    "Max results",
                    Some(json!(10)),
                ),
            ],
            5000,
        )
        .unwrap()
    }

    #[test]
    fn test_snake_case_enforced() {
        let bad = ToolDefinition::new("Search", ToolType::Function, "x", vec![], 1000);
        assert!(bad.is_err());

        let bad_param = ToolDefinition::new(
            "search",
            ToolType::Function,
            "x",
            vec![ToolParameter::required(
                "Query",
                ParameterType::String,
                "q",
            )],
            1000,
        );
        assert!(bad_param.is_err());
    }

    #[test]
    fn test_validate_required_missing() {
        let def = sample_definition();
        let err = def.validate_arguments(&HashMap::new()).unwrap_err();
        assert_eq!(err.code(), "tool_validation_error");
        assert!(err.to_string().contains("query"));
    }

    #[test]
    fn test_validate_unknown_parameter() {
        let def = sample_definition();
        let mut args = HashMap::new();
        args.insert("query".to_string(), json!("rust"));
        args.insert("bogus".to_string(), json!(1));
        let err = def.validate_arguments(&args).unwrap_err();
        assert!(err.to_string().contains("bogus"));
    }

    #[test]
    fn test_validate_type_mismatch() {
        let def = sample_definition();
        let mut args = HashMap::new();
        args.insert("query".to_string(), json!(42));
        assert!(def.validate_arguments(&args).is_err());
    }

    #[test]
    fn test_apply_defaults() {
        let def = sample_definition();
        let mut args = HashMap::new();
        args.insert("query".to_string(), json!("rust"));
        let filled = def.apply_defaults(&args);
        assert_eq!(filled.get("limit"), Some(&json!(10)));
    }

    #[test]
    fn test_retry_config_matching() {
        let retry = ToolRetryConfig {
            retryable_errors: vec!["timeout".into(), "rate limit".into()],
            ..ToolRetryConfig::default()
        };
        assert!(retry.is_retryable("connection timeout after 5s"));
        assert!(retry.is_retryable("hit rate limit"));
        assert!(!retry.is_retryable("file not found"));
    }

    #[test]
    fn test_backoff_grows_exponentially() {
        let retry = ToolRetryConfig {
            backoff_ms: 100,
            backoff_multiplier: 2.0,
            ..ToolRetryConfig::default()
        };
        assert_eq!(retry.backoff_for_attempt(0).as_millis(), 100);
        assert_eq!(retry.backoff_for_attempt(1).as_millis(), 200);
        assert_eq!(retry.backoff_for_attempt(2).as_millis(), 400);
    }

    #[test]
    fn test_truncate_for_context() {
        let mut value = HashMap::new();
        value.insert(
            "matches".to_string(),
            json!(["a", "b", "c", "d", "e"]),
        );
        value.insert("count".to_string(), json!(5));
        let result = ToolResult::ok(value, 10).with_truncatable(vec!["matches".into()]);

        let truncated = result.truncate_for_context(2);
        let fields = truncated.value.unwrap();
        assert_eq!(fields.get("matches").unwrap().as_array().unwrap().len(), 2);
        assert_eq!(
            fields.get("matches_truncation_note").unwrap(),
            &json!("Showing 2 of 5 items")
        );
        assert_eq!(fields.get("count"), Some(&json!(5)));
    }

    #[test]
    fn test_truncate_leaves_small_lists_alone() {
        let mut value = HashMap::new();
        value.insert("matches".to_string(), json!(["a"]));
        let result = ToolResult::ok(value, 1).with_truncatable(vec!["matches".into()]);
        let truncated = result.truncate_for_context(10);
        assert!(!truncated.value.unwrap().contains_key("matches_truncation_note"));
    }
}
