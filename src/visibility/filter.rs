//! Role-based event filtering and redaction.
//!
//! Resolution order for an effective visibility cap: the record's own
//! visibility first (hidden is never emitted), then a per-tool-kind rule,
//! then a per-role rule, then the configured default. Records above the
//! cap are demoted to short synthetic summaries; message text is always
//! scrubbed for secret-looking `key=value` pairs.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use super::{ViewerRole, VisibilityLevel};
use crate::reasoning::{ReasoningChain, ReasoningStep, StepPayload};
use crate::tasks::{Part, TaskEvent, TaskEventKind};
use crate::tools::{ToolRegistry, ToolType};

static SECRET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(api[_-]?key|password|secret|token)\s*[:=]\s*"?[^"\s]+"?"#)
        .expect("invalid secret regex")
});

/// Replace secret-looking assignments in free text with `<key>=[REDACTED]`.
pub fn redact_sensitive_text(text: &str) -> String {
    SECRET_RE
        .replace_all(text, |caps: &regex::Captures<'_>| {
            format!("{}=[REDACTED]", &caps[1])
        })
        .into_owned()
}

/// Replace values under the named fields with `[REDACTED]`, recursing
/// through nested maps and arrays.
pub fn redact_sensitive_fields(value: &mut Value, sensitive_fields: &[String]) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map.iter_mut() {
                if sensitive_fields.iter().any(|field| field == key) {
                    *nested = Value::String("[REDACTED]".to_string());
                } else {
                    redact_sensitive_fields(nested, sensitive_fields);
                }
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                redact_sensitive_fields(item, sensitive_fields);
            }
        }
        _ => {}
    }
}

fn rank(level: VisibilityLevel) -> u8 {
    match level {
        VisibilityLevel::Hidden => 0,
        VisibilityLevel::Summary => 1,
        VisibilityLevel::Full => 2,
    }
}

/// Filter configuration: kind and role rules over the default.
#[derive(Debug, Clone, Default)]
pub struct FilterConfig {
    /// Cap applied when no other rule matches.
    pub default_level: VisibilityLevel,
    /// Demotions per tool kind (e.g. all `function` calls hidden).
    pub tool_kind_rules: HashMap<ToolType, VisibilityLevel>,
    /// Demotions per viewer role.
    pub role_rules: HashMap<ViewerRole, VisibilityLevel>,
    /// Tool name → kind mapping used to resolve kind rules.
    pub tool_types: HashMap<String, ToolType>,
}

impl FilterConfig {
    /// Populate the tool name → kind map from a registry.
    pub fn with_registry(mut self, registry: &ToolRegistry) -> Self {
        for definition in registry.list() {
            self.tool_types.insert(definition.name, definition.tool_type);
        }
        self
    }
}

/// Role-scoped view over events and reasoning steps.
#[derive(Clone)]
pub struct EventFilter {
    role: Option<ViewerRole>,
    config: FilterConfig,
}

impl EventFilter {
    /// Filter for a known role with default configuration.
    pub fn for_role(role: ViewerRole) -> Self {
        Self {
            role: Some(role),
            config: FilterConfig::default(),
        }
    }

    /// Filter for an unknown/absent role (treated as summary-only).
    pub fn anonymous() -> Self {
        Self {
            role: None,
            config: FilterConfig::default(),
        }
    }

    /// Builder: apply a configuration.
    pub fn with_config(mut self, config: FilterConfig) -> Self {
        self.config = config;
        self
    }

    /// The cap granted by the viewer's role alone.
    fn role_cap(&self) -> VisibilityLevel {
        match self.role {
            Some(role) => self
                .config
                .role_rules
                .get(&role)
                .copied()
                .unwrap_or_else(|| role.max_visibility()),
            // Unknown role: most restrictive of summary and the default.
            None => {
                if rank(self.config.default_level) < rank(VisibilityLevel::Summary) {
                    self.config.default_level
                } else {
                    VisibilityLevel::Summary
                }
            }
        }
    }

    /// Cap for a step, considering any tool-kind rule.
    fn step_cap(&self, step: &ReasoningStep) -> VisibilityLevel {
        let tool_name = match &step.payload {
            StepPayload::ToolCall { tool_name, .. } => Some(tool_name.as_str()),
            _ => None,
        };
        if let Some(name) = tool_name {
            if let Some(tool_type) = self.config.tool_types.get(name) {
                if let Some(level) = self.config.tool_kind_rules.get(tool_type) {
                    return *level;
                }
            }
        }
        self.role_cap()
    }

    /// Filter one task event. `None` means suppressed.
    pub fn filter_event(&self, event: &TaskEvent) -> Option<TaskEvent> {
        if event.visibility == VisibilityLevel::Hidden {
            return None;
        }

        let cap = self.role_cap();
        if rank(event.visibility) > rank(cap) {
            // Full events are visible only to full-visibility viewers.
            return None;
        }

        let mut filtered = event.clone();
        if let TaskEventKind::Message { parts, .. } = &mut filtered.kind {
            for part in parts.iter_mut() {
                if let Part::Text { text } = part {
                    *text = redact_sensitive_text(text);
                }
            }
        }
        Some(filtered)
    }

    /// Run a whole event stream through the filter.
    pub fn filter_stream(&self, mut input: crate::tasks::TaskEventStream) -> crate::tasks::TaskEventStream {
        let filter = self.clone();
        let (sender, stream) = crate::tasks::TaskEventStream::channel();
        tokio::spawn(async move {
            while let Some(event) = input.next().await {
                if let Some(filtered) = filter.filter_event(&event) {
                    if sender.send(filtered).await.is_err() {
                        break;
                    }
                }
            }
        });
        stream
    }

    /// Filter one reasoning step. Steps above the viewer's cap are demoted
    /// to a synthetic summary rather than dropped; hidden steps vanish.
    pub fn filter_step(&self, step: &ReasoningStep) -> Option<ReasoningStep> {
        self.filter_step_with_names(step, &HashMap::new())
    }

    /// Filter a whole chain's steps, resolving tool names for result
    /// summaries through the chain's correlation ids.
    pub fn filter_chain_steps(&self, chain: &ReasoningChain) -> Vec<ReasoningStep> {
        let mut names_by_correlation: HashMap<String, String> = HashMap::new();
        for step in chain.steps() {
            if let StepPayload::ToolCall {
                tool_name,
                correlation_id,
                ..
            } = &step.payload
            {
                names_by_correlation.insert(correlation_id.clone(), tool_name.clone());
            }
        }

        chain
            .steps()
            .iter()
            .filter_map(|step| self.filter_step_with_names(step, &names_by_correlation))
            .collect()
    }

    fn filter_step_with_names(
        &self,
        step: &ReasoningStep,
        names_by_correlation: &HashMap<String, String>,
    ) -> Option<ReasoningStep> {
        if step.visibility == VisibilityLevel::Hidden {
            return None;
        }

        let cap = self.step_cap(step);
        if cap == VisibilityLevel::Hidden {
            return None;
        }

        if rank(step.visibility) <= rank(cap) {
            return Some(step.clone());
        }

        // Demote: replace the payload with a short synthetic summary.
        let summary = match &step.payload {
            StepPayload::ToolCall { tool_name, .. } => format!("Called {}", tool_name),
            StepPayload::ToolResult {
                correlation_id,
                success,
                ..
            } => {
                let tool = names_by_correlation
                    .get(correlation_id)
                    .map(String::as_str)
                    .unwrap_or("tool");
                if *success {
                    format!("Tool {} succeeded", tool)
                } else {
                    format!("Tool {} failed", tool)
                }
            }
            StepPayload::Thinking { .. } | StepPayload::Synthesis { .. } => {
                format!("Reasoning step #{}", step.step_number)
            }
        };

        let mut demoted = step.clone();
        demoted.visibility = VisibilityLevel::Summary;
        demoted.payload = StepPayload::Thinking {
            text: summary,
            confidence: None,
        };
        Some(demoted)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap as StdHashMap;

    use serde_json::json;

    use super::*;
    use crate::tasks::TaskState;

    #[test]
    fn test_redact_api_key() {
        let text = "Connecting with api_key: sk-12345 now";
        let redacted = redact_sensitive_text(text);
        assert!(!redacted.contains("sk-12345"));
        assert!(redacted.contains("api_key=[REDACTED]"));
    }

    #[test]
    fn test_redact_multiple_and_case_insensitive() {
        let text = "API_KEY=key123 Password: pass456 token=tok789";
        let redacted = redact_sensitive_text(text);
        assert!(!redacted.contains("key123"));
        assert!(!redacted.contains("pass456"));
        assert!(!redacted.contains("tok789"));
        assert_eq!(redacted.matches("[REDACTED]").count(), 3);
    }

    #[test]
    fn test_redact_fields_recursive() {
        let mut value = json!({
            "api_key": "sk-123",
            "nested": {"password": "hunter2", "items": [{"token": "t-1", "ok": 1}]},
            "plain": "visible"
        });
        redact_sensitive_fields(
            &mut value,
            &["api_key".into(), "password".into(), "token".into()],
        );
        assert_eq!(value["api_key"], json!("[REDACTED]"));
        assert_eq!(value["nested"]["password"], json!("[REDACTED]"));
        assert_eq!(value["nested"]["items"][0]["token"], json!("[REDACTED]"));
        assert_eq!(value["plain"], json!("visible"));
    }

    #[test]
    fn test_hidden_events_never_emitted() {
        for role in [ViewerRole::EndUser, ViewerRole::Developer, ViewerRole::Admin] {
            let filter = EventFilter::for_role(role);
            let event = TaskEvent::text_message("t", "secret step")
                .with_visibility(VisibilityLevel::Hidden);
            assert!(filter.filter_event(&event).is_none());
        }
    }

    #[test]
    fn test_summary_events_visible_to_all() {
        let event = TaskEvent::status("t", TaskState::Working);
        assert!(EventFilter::for_role(ViewerRole::EndUser)
            .filter_event(&event)
            .is_some());
        assert!(EventFilter::anonymous().filter_event(&event).is_some());
    }

    #[test]
    fn test_full_events_only_for_full_roles() {
        let event =
            TaskEvent::text_message("t", "debug detail").with_visibility(VisibilityLevel::Full);
        assert!(EventFilter::for_role(ViewerRole::EndUser)
            .filter_event(&event)
            .is_none());
        assert!(EventFilter::for_role(ViewerRole::Developer)
            .filter_event(&event)
            .is_some());
        assert!(EventFilter::for_role(ViewerRole::Admin)
            .filter_event(&event)
            .is_some());
    }

    #[test]
    fn test_message_text_redacted_on_emission() {
        let filter = EventFilter::for_role(ViewerRole::EndUser);
        let event = TaskEvent::text_message("t", "your password=letmein is set");
        let filtered = filter.filter_event(&event).unwrap();
        assert!(!filtered.message_text().contains("letmein"));
    }

    #[tokio::test]
    async fn test_filter_stream_applies_per_event_rules() {
        let filter = EventFilter::for_role(ViewerRole::EndUser);
        let (sender, stream) = crate::tasks::TaskEventStream::channel();
        let filtered = filter.filter_stream(stream);

        tokio::spawn(async move {
            sender
                .send(TaskEvent::status("t", TaskState::Working))
                .await
                .unwrap();
            sender
                .send(
                    TaskEvent::text_message("t", "internal detail")
                        .with_visibility(VisibilityLevel::Full),
                )
                .await
                .unwrap();
            sender
                .send(TaskEvent::done("t", TaskState::Completed))
                .await
                .unwrap();
        });

        let events = filtered.collect().await;
        assert_eq!(events.len(), 2);
        assert!(events.last().unwrap().is_done());
    }

    fn chain_with_call() -> ReasoningChain {
        let mut chain = ReasoningChain::new("task-1", "agent-1", None);
        chain
            .add_thinking("pondering deeply", None, VisibilityLevel::Full)
            .unwrap();
        let (_, cid) = chain
            .add_tool_call("calculator", StdHashMap::new(), VisibilityLevel::Full)
            .unwrap();
        chain
            .add_tool_result(&cid, true, None, None, 0, 0.0, VisibilityLevel::Full)
            .unwrap();
        chain
    }

    #[test]
    fn test_steps_demoted_to_summaries_for_end_user() {
        let chain = chain_with_call();
        let filter = EventFilter::for_role(ViewerRole::EndUser);
        let steps = filter.filter_chain_steps(&chain);

        assert_eq!(steps.len(), 3);
        let texts: Vec<String> = steps
            .iter()
            .map(|s| match &s.payload {
                StepPayload::Thinking { text, .. } => text.clone(),
                other => panic!("expected demoted payload, got {:?}", other),
            })
            .collect();
        assert_eq!(texts[0], "Reasoning step #0");
        assert_eq!(texts[1], "Called calculator");
        assert_eq!(texts[2], "Tool calculator succeeded");
    }

    #[test]
    fn test_steps_untouched_for_developer() {
        let chain = chain_with_call();
        let filter = EventFilter::for_role(ViewerRole::Developer);
        let steps = filter.filter_chain_steps(&chain);
        assert!(matches!(
            &steps[0].payload,
            StepPayload::Thinking { text, .. } if text == "pondering deeply"
        ));
        assert!(matches!(&steps[1].payload, StepPayload::ToolCall { .. }));
    }

    #[test]
    fn test_tool_kind_rule_hides_calls() {
        let chain = chain_with_call();
        let mut config = FilterConfig::default();
        config
            .tool_types
            .insert("calculator".into(), ToolType::Function);
        config
            .tool_kind_rules
            .insert(ToolType::Function, VisibilityLevel::Hidden);

        let filter = EventFilter::for_role(ViewerRole::Developer).with_config(config);
        let steps = filter.filter_chain_steps(&chain);

        // The call vanishes; the thinking and result remain.
        assert_eq!(steps.len(), 2);
        assert!(steps
            .iter()
            .all(|s| !matches!(&s.payload, StepPayload::ToolCall { .. })));
    }
}
