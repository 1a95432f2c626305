//! Autonomous agent with the bounded ReAct loop.
//!
//! Drives an LLM over the JSON reply protocol: think, pick a tool, observe
//! the result, repeat, until the model emits a terminal answer or a bound
//! (iterations, budget, cancellation) stops the run.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::models::{Agent, AgentIdentity};
use super::parser::ReActParser;
use super::prompts::{build_custom_system_prompt, build_react_system_prompt};
use crate::errors::{PlatformError, Result};
use crate::llm::LlmMessage;
use crate::reasoning::ReasoningEngine;
use crate::tasks::models::{Message, MessageRole, Task};

/// Characters kept from a tool observation before truncation.
const OBSERVATION_BUDGET: usize = 2_000;

const JSON_REMINDER: &str =
    "\n\nIMPORTANT: Respond with valid JSON only as specified in the system prompt.";

/// Zero-config autonomous agent: give it a task, it picks tools and
/// iterates until solved.
pub struct AutonomousAgent {
    identity: AgentIdentity,
    custom_system_prompt: Option<String>,
    max_iterations: u32,
    model: String,
    temperature: f64,
    parser: ReActParser,
}

impl AutonomousAgent {
    pub fn new(identity: AgentIdentity, model: impl Into<String>) -> Self {
        Self {
            identity,
            custom_system_prompt: None,
            max_iterations: 15,
            model: model.into(),
            temperature: 0.0,
            parser: ReActParser::new(),
        }
    }

    /// Builder: custom system instructions prefixed to the ReAct rules.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.custom_system_prompt = Some(prompt.into());
        self
    }

    /// Builder: iteration cap.
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Builder: sampling temperature.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    fn build_system_prompt(&self, engine: &ReasoningEngine) -> String {
        let tools = engine.available_tools();
        match &self.custom_system_prompt {
            Some(custom) => build_custom_system_prompt(custom, &tools),
            None => build_react_system_prompt(&tools),
        }
    }

    /// First user turn: prior task messages rendered as a history block,
    /// then the current message, then the JSON-mode reminder.
    fn build_user_content(task: &Task, current_message: &str) -> String {
        let history = if task.messages.len() > 1 {
            &task.messages[..task.messages.len() - 1]
        } else {
            &[]
        };

        let mut lines = Vec::new();
        for message in history {
            let label = match message.role {
                MessageRole::User => "User",
                _ => "Assistant",
            };
            let text = message.text();
            if !text.trim().is_empty() {
                lines.push(format!("{}: {}", label, text));
            }
        }

        if lines.is_empty() {
            format!("{}{}", current_message, JSON_REMINDER)
        } else {
            format!(
                "## Conversation History\n{}\n\n{}{}",
                lines.join("\n"),
                current_message,
                JSON_REMINDER
            )
        }
    }

    fn format_observation(value: &Option<HashMap<String, Value>>) -> String {
        let rendered = match value {
            Some(map) => serde_json::to_string(map).unwrap_or_else(|_| "{}".to_string()),
            None => "{}".to_string(),
        };
        if rendered.chars().count() > OBSERVATION_BUDGET {
            let head: String = rendered.chars().take(OBSERVATION_BUDGET).collect();
            format!("Observation: {}...(truncated)", head)
        } else {
            format!("Observation: {}", rendered)
        }
    }

    fn conversation_tail(conversation: &[LlmMessage]) -> String {
        let start = conversation.len().saturating_sub(2);
        conversation[start..]
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl Agent for AutonomousAgent {
    fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    async fn reason(&self, task: &Task, engine: &mut ReasoningEngine) -> Result<String> {
        let system_prompt = self.build_system_prompt(engine);
        let user_message = task
            .latest_user_message()
            .unwrap_or_else(|| "Please help me with this task.".to_string());

        let mut conversation =
            vec![LlmMessage::user(Self::build_user_content(task, &user_message))];

        for iteration in 0..self.max_iterations {
            if engine.is_cancelled() {
                return Err(PlatformError::AgentProcessing {
                    message: "task cancelled".into(),
                });
            }

            if !engine.check_budget(0.0, 0, true) {
                return Err(PlatformError::CostBudgetExceeded {
                    task_id: task.id.clone(),
                    message: "budget exhausted before next LLM call".into(),
                });
            }

            engine.add_thinking(
                format!(
                    "Iteration {}/{}: analyzing next step",
                    iteration + 1,
                    self.max_iterations
                ),
                None,
            )?;

            // One parse retry per iteration: remind the model about JSON
            // mode once, then give up on the chain.
            let mut parse_attempt = 0;
            let (reply, llm_content, llm_step_id) = loop {
                let outcome = engine
                    .call_llm(&conversation, &system_prompt, &self.model, self.temperature)
                    .await?;

                match self.parser.parse(&outcome.content) {
                    Ok(reply) => break (reply, outcome.content, outcome.step_id),
                    Err(error) if parse_attempt == 0 => {
                        debug!(%error, "reply parse failed, sending JSON reminder");
                        conversation.push(LlmMessage::assistant(outcome.content));
                        conversation
                            .push(LlmMessage::user("Respond with valid JSON only."));
                        parse_attempt += 1;
                    }
                    Err(error) => return Err(error),
                }
            };

            if let Some(thought) = &reply.thought {
                engine.add_thinking(format!("Thought: {}", thought), None)?;
            }

            if reply.is_final {
                let final_message = reply
                    .final_answer
                    .filter(|answer| !answer.is_empty())
                    .unwrap_or_else(|| "Task completed.".to_string());
                engine.add_synthesis(
                    format!("Task completed: {}", final_message),
                    vec![llm_step_id],
                )?;
                return Ok(final_message);
            }

            let action = reply.action.ok_or_else(|| PlatformError::InvalidLlmResponse {
                message: "reply is not final but names no action".into(),
            })?;

            engine.add_thinking(format!("Action: {}", action), None)?;

            // Tool-level failures become observations fed back to the model;
            // executor-level failures (validation, permission, budget)
            // propagate and fail the chain.
            let result = engine
                .call_tool(&action, reply.action_input.unwrap_or_default())
                .await?;

            if engine.is_cancelled() {
                return Err(PlatformError::AgentProcessing {
                    message: "task cancelled".into(),
                });
            }

            let observation = if result.success {
                Self::format_observation(&result.value)
            } else {
                format!(
                    "Observation: Error - {}",
                    result.error.as_deref().unwrap_or("unknown error")
                )
            };

            conversation.push(LlmMessage::assistant(llm_content));
            conversation.push(LlmMessage::user(observation));
        }

        Err(PlatformError::MaxIterationsExceeded {
            max_iterations: self.max_iterations,
            context: Self::conversation_tail(&conversation),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cost::{CostTracker, TaskBudget};
    use crate::llm::testing::ScriptedLlmClient;
    use crate::reasoning::StepKind;
    use crate::tools::builtin::{CalculatorTool, LlmTool};
    use crate::tools::{ToolExecutor, ToolRegistry};

    fn engine_for(replies: Vec<&str>, budget: TaskBudget) -> ReasoningEngine {
        let registry = Arc::new(ToolRegistry::new());
        registry.register(Arc::new(CalculatorTool::new())).unwrap();
        registry
            .register(Arc::new(LlmTool::new(
                Arc::new(ScriptedLlmClient::new(replies)),
                "claude-sonnet-4",
            )))
            .unwrap();
        let executor = Arc::new(ToolExecutor::new(registry, Arc::new(CostTracker::new())));
        ReasoningEngine::new("task-1", "agent-1", None, executor, budget)
    }

    fn agent() -> AutonomousAgent {
        AutonomousAgent::new(
            AgentIdentity::new("auto-1", "Autonomous", "solves tasks"),
            "claude-sonnet-4",
        )
    }

    #[tokio::test]
    async fn test_arithmetic_scenario() {
        let replies = vec![
            r#"{"thought": "use calc", "action": "calculator",
                "action_input": {"expression": "5 + 3"}, "is_final": false}"#,
            r#"{"thought": "got 8", "final_answer": "The result of 5 + 3 is 8.",
                "is_final": true}"#,
        ];
        let mut engine = engine_for(replies, TaskBudget::unlimited());
        let task = Task::new("What is 5 + 3?", "user-1");

        let answer = agent().reason(&task, &mut engine).await.unwrap();
        assert_eq!(answer, "The result of 5 + 3 is 8.");

        let chain = engine.chain();
        assert_eq!(chain.metrics.synthesis_steps, 1);
        // One calculator pair plus two LLM pairs.
        let calc_calls = chain
            .steps()
            .iter()
            .filter(|s| {
                matches!(&s.payload, crate::reasoning::StepPayload::ToolCall { tool_name, .. }
                         if tool_name == "calculator")
            })
            .count();
        assert_eq!(calc_calls, 1);
        let summary = engine.executor().cost_tracker().summary("task-1");
        assert_eq!(summary.llm_calls, 2);
    }

    #[tokio::test]
    async fn test_max_iterations_exceeded() {
        let action = r#"{"thought": "keep going", "action": "calculator",
                         "action_input": {"expression": "1 + 1"}, "is_final": false}"#;
        let mut engine = engine_for(vec![action; 5], TaskBudget::unlimited());
        let task = Task::new("never ends", "user-1");

        let err = agent()
            .with_max_iterations(2)
            .reason(&task, &mut engine)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "max_iterations_exceeded");
        assert!(err.to_string().contains("Observation"));
    }

    #[tokio::test]
    async fn test_parse_retry_then_failure() {
        let mut engine = engine_for(
            vec!["this is not json", "still not json"],
            TaskBudget::unlimited(),
        );
        let task = Task::new("hi", "user-1");

        let err = agent().reason(&task, &mut engine).await.unwrap_err();
        assert_eq!(err.code(), "invalid_llm_response");
    }

    #[tokio::test]
    async fn test_parse_retry_then_success() {
        let replies = vec![
            "garbage output",
            r#"{"final_answer": "Recovered.", "is_final": true}"#,
        ];
        let mut engine = engine_for(replies, TaskBudget::unlimited());
        let task = Task::new("hi", "user-1");

        let answer = agent().reason(&task, &mut engine).await.unwrap();
        assert_eq!(answer, "Recovered.");
    }

    #[tokio::test]
    async fn test_empty_final_answer_defaults() {
        let replies = vec![r#"{"final_answer": "", "is_final": true}"#];
        let mut engine = engine_for(replies, TaskBudget::unlimited());
        let task = Task::new("hi", "user-1");

        let answer = agent().reason(&task, &mut engine).await.unwrap();
        assert_eq!(answer, "Task completed.");
    }

    #[tokio::test]
    async fn test_budget_stops_loop_before_call() {
        let budget = TaskBudget {
            max_llm_calls: Some(0),
            ..TaskBudget::default()
        };
        let mut engine = engine_for(vec!["unused"], budget);
        let task = Task::new("hi", "user-1");

        let err = agent().reason(&task, &mut engine).await.unwrap_err();
        assert_eq!(err.code(), "cost_budget_exceeded");
        // No LLM pair was recorded: the gate fired before dispatch.
        assert!(engine
            .chain()
            .steps()
            .iter()
            .all(|s| s.kind != StepKind::ToolCall));
    }

    #[tokio::test]
    async fn test_tool_error_absorbed_as_observation() {
        let replies = vec![
            r#"{"action": "calculator", "action_input": {"expression": "bad"},
                "is_final": false}"#,
            r#"{"final_answer": "Could not compute.", "is_final": true}"#,
        ];
        let mut engine = engine_for(replies, TaskBudget::unlimited());
        let task = Task::new("hi", "user-1");

        let answer = agent().reason(&task, &mut engine).await.unwrap();
        assert_eq!(answer, "Could not compute.");
    }

    #[tokio::test]
    async fn test_history_block_built_from_prior_messages() {
        let mut task = Task::new("first question", "user-1");
        task.messages.push(Message::agent_text("first answer"));
        task.messages.push(Message::user_text("second question"));

        let content =
            AutonomousAgent::build_user_content(&task, "second question");
        assert!(content.starts_with("## Conversation History"));
        assert!(content.contains("User: first question"));
        assert!(content.contains("Assistant: first answer"));
        assert!(content.contains(JSON_REMINDER.trim_start()));
    }
}
