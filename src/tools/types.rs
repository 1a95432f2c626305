//! Shared tool enums.

use serde::{Deserialize, Serialize};

/// Kind tag for a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolType {
    /// Plain callable function.
    Function,
    /// External HTTP API wrapper.
    Api,
    /// Shell command runner.
    Bash,
    /// Filesystem read/write.
    FileSystem,
    /// Recursive path matcher.
    Glob,
    /// Content search.
    Grep,
    /// Language-model call.
    Llm,
    /// Skill invocation.
    Skill,
}

/// Audit level recorded for a tool execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditLevel {
    None,
    Basic,
    Detailed,
    Full,
}

impl Default for AuditLevel {
    fn default() -> Self {
        AuditLevel::Basic
    }
}

/// Primitive parameter types accepted by tool definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    String,
    Integer,
    Float,
    Boolean,
    Array,
    Object,
}

impl ParameterType {
    /// Whether a JSON value is compatible with this parameter type.
    /// Integers are accepted where floats are declared.
    pub fn matches(&self, value: &serde_json::Value) -> bool {
        use serde_json::Value;
        match self {
            ParameterType::String => value.is_string(),
            ParameterType::Integer => value.is_i64() || value.is_u64(),
            ParameterType::Float => value.is_number(),
            ParameterType::Boolean => value.is_boolean(),
            ParameterType::Array => value.is_array(),
            ParameterType::Object => matches!(value, Value::Object(_)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parameter_type_matching() {
        assert!(ParameterType::String.matches(&json!("hi")));
        assert!(!ParameterType::String.matches(&json!(1)));
        assert!(ParameterType::Integer.matches(&json!(3)));
        assert!(!ParameterType::Integer.matches(&json!(3.5)));
        assert!(ParameterType::Float.matches(&json!(3)));
        assert!(ParameterType::Float.matches(&json!(3.5)));
        assert!(ParameterType::Array.matches(&json!([1, 2])));
        assert!(ParameterType::Object.matches(&json!({"a": 1})));
    }

    #[test]
    fn test_tool_type_serde() {
        assert_eq!(
            serde_json::to_string(&ToolType::FileSystem).unwrap(),
            "\"file_system\""
        );
        assert_eq!(serde_json::to_string(&ToolType::Llm).unwrap(), "\"llm\"");
    }
}
