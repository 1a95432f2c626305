//! ReAct system prompt construction.
//!
//! The default system prompt concatenates tool descriptions with the JSON
//! response-format spec and the critical rules the loop depends on. A
//! custom prompt (for example from a skill) prefixes the default rules.

use crate::tools::{ToolDefinition, ToolParameter};

const RESPONSE_FORMAT: &str = r#"Respond with a single JSON object and nothing else:
{
  "thought": "your reasoning for this step",
  "action": "tool_name",
  "action_input": {"param": "value"},
  "final_answer": "your answer once the task is solved",
  "is_final": false
}

Either "action" with "action_input", or "final_answer" with "is_final": true, must be present."#;

const CRITICAL_RULES: &str = r#"Critical rules:
- Use at least one tool before giving a final answer.
- Respond in valid JSON only; no prose before or after the object.
- Resolve skill-relative paths against the skill's base path.
- Execute scripts via the bash tool, never by reading the file."#;

/// Build the default ReAct system prompt from the visible tools.
pub fn build_react_system_prompt(tools: &[ToolDefinition]) -> String {
    let mut sections = Vec::new();
    sections.push(
        "You are an autonomous agent that solves tasks by reasoning and using tools.".to_string(),
    );
    sections.push(describe_tools(tools));
    sections.push(RESPONSE_FORMAT.to_string());
    sections.push(CRITICAL_RULES.to_string());
    sections.join("\n\n")
}

/// Build a system prompt with custom instructions prefixed to the default
/// rules and tool descriptions.
pub fn build_custom_system_prompt(instructions: &str, tools: &[ToolDefinition]) -> String {
    format!(
        "{}\n\n{}",
        instructions.trim_end(),
        build_react_system_prompt(tools)
    )
}

fn describe_tools(tools: &[ToolDefinition]) -> String {
    if tools.is_empty() {
        return "No tools are available.".to_string();
    }

    let mut lines = vec!["Available tools:".to_string()];
    for tool in tools {
        lines.push(format!("- {}: {}", tool.name, tool.description));
        for param in &tool.parameters {
            lines.push(format!("    {}", describe_parameter(param)));
        }
    }
    lines.join("\n")
}

fn describe_parameter(param: &ToolParameter) -> String {
    let requirement = if param.required {
        "required".to_string()
    } else {
        match &param.default {
            Some(default) => format!("optional, default {}", default),
            None => "optional".to_string(),
        }
    };
    format!(
        "{} ({:?}, {}): {}",
        param.name, param.param_type, requirement, param.description
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::types::{ParameterType, ToolType};

    fn sample_tools() -> Vec<ToolDefinition> {
        vec![ToolDefinition::new(
            "calculator",
            ToolType::Function,
            "Evaluate arithmetic",
            vec![
                ToolParameter::required("expression", ParameterType::String, "The expression"),
                ToolParameter::optional(
                    "precision",
                    ParameterType::Integer,
                    "Digits",
                    Some(serde_json::json!(2)),
                ),
            ],
            1000,
        )
        .unwrap()]
    }

    #[test]
    fn test_default_prompt_lists_tools_and_rules() {
        let prompt = build_react_system_prompt(&sample_tools());
        assert!(prompt.contains("calculator: Evaluate arithmetic"));
        assert!(prompt.contains("expression (String, required)"));
        assert!(prompt.contains("precision (Integer, optional, default 2)"));
        assert!(prompt.contains("valid JSON only"));
        assert!(prompt.contains("\"is_final\""));
    }

    #[test]
    fn test_custom_prompt_prefixes_rules() {
        let prompt = build_custom_system_prompt("You are a data wrangler.", &sample_tools());
        let custom_pos = prompt.find("data wrangler").unwrap();
        let rules_pos = prompt.find("Critical rules").unwrap();
        assert!(custom_pos < rules_pos);
    }

    #[test]
    fn test_empty_tool_list() {
        let prompt = build_react_system_prompt(&[]);
        assert!(prompt.contains("No tools are available."));
    }
}
