//! The LLM consumed as a specialised tool.
//!
//! Wraps an [`LlmClient`] behind the standard tool contract so reasoning
//! loops dispatch model calls through the same pipeline as every other
//! tool: budget gates, timeouts, retry, and cost attribution all apply.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::{json, Value};

use crate::errors::{PlatformError, Result};
use crate::llm::{LlmClient, LlmMessage, LlmRequest};
use crate::tools::base::{
    StreamingTool, Tool, ToolCallContext, ToolDefinition, ToolParameter, ToolResult,
    ToolRetryConfig,
};
use crate::tools::types::{ParameterType, ToolType};

/// Adapter exposing an [`LlmClient`] as the `llm` tool.
pub struct LlmTool {
    definition: ToolDefinition,
    client: Arc<dyn LlmClient>,
    default_model: String,
}

impl LlmTool {
    pub fn new(client: Arc<dyn LlmClient>, default_model: impl Into<String>) -> Self {
        let retry = ToolRetryConfig {
            max_retries: 2,
            backoff_ms: 500,
            backoff_multiplier: 2.0,
            // Provider hiccups worth retrying; anything else surfaces.
            retryable_errors: vec![
                "timeout".into(),
                "rate limit".into(),
                "connection".into(),
                "overloaded".into(),
            ],
        };
        let definition = ToolDefinition::new(
            "llm",
            ToolType::Llm,
            "Call the language model with a conversation and optional system prompt",
            vec![
                ToolParameter::required(
                    "messages",
                    ParameterType::Array,
                    "Ordered list of {role, content} messages",
                ),
                ToolParameter::optional(
                    "system",
                    ParameterType::String,
                    "System prompt passed separately from the messages",
                    None,
                ),
                ToolParameter::optional("model", ParameterType::String, "Model identifier", None),
                ToolParameter::optional(
                    "temperature",
                    ParameterType::Float,
                    "Sampling temperature",
                    Some(json!(0.0)),
                ),
                ToolParameter::optional(
                    "max_tokens",
                    ParameterType::Integer,
                    "Completion token cap",
                    None,
                ),
            ],
            120_000,
        )
        .expect("llm definition is valid")
        .with_retry(retry);

        Self {
            definition,
            client,
            default_model: default_model.into(),
        }
    }

    fn build_request(
        &self,
        context: &ToolCallContext,
        arguments: &HashMap<String, Value>,
    ) -> Result<LlmRequest> {
        let raw_messages = arguments
            .get("messages")
            .and_then(Value::as_array)
            .ok_or_else(|| PlatformError::ToolValidation {
                tool_name: "llm".into(),
                message: "messages must be an array".into(),
            })?;

        let mut messages = Vec::with_capacity(raw_messages.len());
        for raw in raw_messages {
            let role = raw.get("role").and_then(Value::as_str).unwrap_or("user");
            let content = raw.get("content").and_then(Value::as_str).unwrap_or("");
            messages.push(LlmMessage {
                role: role.to_string(),
                content: content.to_string(),
            });
        }

        Ok(LlmRequest {
            messages,
            system: arguments
                .get("system")
                .and_then(Value::as_str)
                .map(String::from),
            model: arguments
                .get("model")
                .and_then(Value::as_str)
                .unwrap_or(&self.default_model)
                .to_string(),
            temperature: arguments
                .get("temperature")
                .and_then(Value::as_f64)
                .unwrap_or(0.0),
            max_tokens: arguments
                .get("max_tokens")
                .and_then(Value::as_u64)
                .or(context.max_tokens)
                .map(|t| t as u32),
        })
    }
}

#[async_trait]
impl Tool for LlmTool {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn execute(
        &self,
        context: &ToolCallContext,
        arguments: HashMap<String, Value>,
    ) -> Result<ToolResult> {
        let request = self.build_request(context, &arguments)?;
        let started = std::time::Instant::now();

        let response = self.client.complete(request).await?;

        let mut value = HashMap::new();
        value.insert("content".to_string(), json!(response.content));
        value.insert("model".to_string(), json!(response.model));
        value.insert("input_tokens".to_string(), json!(response.input_tokens));
        value.insert("output_tokens".to_string(), json!(response.output_tokens));
        value.insert("cost_usd".to_string(), json!(response.cost_usd));

        Ok(ToolResult::ok(value, started.elapsed().as_millis() as u64)
            .with_usage(
                response.input_tokens + response.output_tokens,
                response.cost_usd,
            ))
    }
}

#[async_trait]
impl StreamingTool for LlmTool {
    /// Streaming variant: yields `{token}` chunks then a final
    /// `{done: true, content, model, output_tokens}` chunk.
    ///
    /// Providers without native streaming are adapted by completing the
    /// request and re-chunking the text, which keeps the contract uniform.
    async fn execute_streaming(
        &self,
        context: &ToolCallContext,
        arguments: HashMap<String, Value>,
    ) -> Result<BoxStream<'static, Result<HashMap<String, Value>>>> {
        let request = self.build_request(context, &arguments)?;
        let response = self.client.complete(request).await?;

        let mut chunks: Vec<Result<HashMap<String, Value>>> = Vec::new();
        for word in response.content.split_inclusive(' ') {
            let mut chunk = HashMap::new();
            chunk.insert("token".to_string(), json!(word));
            chunks.push(Ok(chunk));
        }
        let mut last = HashMap::new();
        last.insert("done".to_string(), json!(true));
        last.insert("content".to_string(), json!(response.content));
        last.insert("model".to_string(), json!(response.model));
        last.insert("output_tokens".to_string(), json!(response.output_tokens));
        chunks.push(Ok(last));

        Ok(futures::stream::iter(chunks).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedLlmClient;

    fn messages_arg(text: &str) -> HashMap<String, Value> {
        let mut args = HashMap::new();
        args.insert(
            "messages".to_string(),
            json!([{"role": "user", "content": text}]),
        );
        args
    }

    #[tokio::test]
    async fn test_execute_returns_content_and_usage() {
        let client = Arc::new(ScriptedLlmClient::new(vec!["hello there"]));
        let tool = LlmTool::new(client, "claude-sonnet-4");
        let context = ToolCallContext::new("task-1", "agent-1");

        let result = tool.execute(&context, messages_arg("hi")).await.unwrap();
        assert!(result.success);
        let value = result.value.unwrap();
        assert_eq!(value["content"], json!("hello there"));
        assert_eq!(value["model"], json!("claude-sonnet-4"));
        assert!(result.tokens_used > 0);
    }

    #[tokio::test]
    async fn test_model_override() {
        let client = Arc::new(ScriptedLlmClient::new(vec!["ok"]));
        let tool = LlmTool::new(client, "claude-sonnet-4");
        let context = ToolCallContext::new("task-1", "agent-1");

        let mut args = messages_arg("hi");
        args.insert("model".to_string(), json!("gpt-4"));
        let result = tool.execute(&context, args).await.unwrap();
        assert_eq!(result.value.unwrap()["model"], json!("gpt-4"));
    }

    #[tokio::test]
    async fn test_streaming_ends_with_done_chunk() {
        let client = Arc::new(ScriptedLlmClient::new(vec!["one two three"]));
        let tool = LlmTool::new(client, "claude-sonnet-4");
        let context = ToolCallContext::new("task-1", "agent-1");

        let mut stream = tool
            .execute_streaming(&context, messages_arg("count"))
            .await
            .unwrap();

        let mut chunks = Vec::new();
        while let Some(chunk) = stream.next().await {
            chunks.push(chunk.unwrap());
        }

        assert!(chunks.len() >= 2);
        let last = chunks.last().unwrap();
        assert_eq!(last["done"], json!(true));
        assert_eq!(last["content"], json!("one two three"));
        for chunk in &chunks[..chunks.len() - 1] {
            assert!(chunk.contains_key("token"));
        }
    }
}
