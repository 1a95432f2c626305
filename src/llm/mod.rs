//! LLM provider boundary.
//!
//! The core never talks to a provider SDK directly. It consumes an async
//! request→response seam that returns text plus token counts; concrete
//! clients (OpenAI, Anthropic, Groq, ...) live outside the crate and
//! implement [`LlmClient`]. Provider API keys are read by those clients at
//! execution time from the environment (`OPENAI_API_KEY`,
//! `ANTHROPIC_API_KEY`, `GROQ_API_KEY`, ...).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::Result;

/// A single message in an LLM conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmMessage {
    /// Role: "user", "assistant", or "system".
    pub role: String,
    /// Message text.
    pub content: String,
}

impl LlmMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
        }
    }
}

/// Request sent across the provider boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequest {
    /// Ordered conversation messages.
    pub messages: Vec<LlmMessage>,
    /// Optional system prompt, passed separately from the messages.
    pub system: Option<String>,
    /// Model identifier.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f64,
    /// Optional completion token cap.
    pub max_tokens: Option<u32>,
}

/// Response returned by a provider client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    /// Completion text.
    pub content: String,
    /// Model that actually served the request.
    pub model: String,
    /// Prompt tokens consumed.
    pub input_tokens: u64,
    /// Completion tokens produced.
    pub output_tokens: u64,
    /// Cost attributed to the call, in USD.
    pub cost_usd: f64,
}

/// A chunk of a streaming completion. The final chunk has `done=true` and
/// carries the summary metadata; intermediate chunks carry only `token`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmStreamChunk {
    /// Incremental token text (empty on the final chunk).
    #[serde(default)]
    pub token: String,
    /// True on the terminal chunk.
    #[serde(default)]
    pub done: bool,
    /// Full content, present on the terminal chunk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Model name, present on the terminal chunk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Output token count, present on the terminal chunk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
}

/// Async boundary to an LLM provider.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Complete a conversation, returning text and usage.
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse>;
}

#[cfg(test)]
pub mod testing {
    //! Scripted client used by loop and end-to-end tests.

    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::{LlmClient, LlmRequest, LlmResponse};
    use crate::errors::{PlatformError, Result};

    /// Replays a fixed sequence of replies; fails once the script runs dry.
    pub struct ScriptedLlmClient {
        replies: Mutex<Vec<String>>,
        /// Tokens reported per call.
        pub tokens_per_call: u64,
        /// Cost reported per call.
        pub cost_per_call: f64,
    }

    impl ScriptedLlmClient {
        pub fn new(replies: Vec<&str>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().map(String::from).collect()),
                tokens_per_call: 20,
                cost_per_call: 0.001,
            }
        }

        /// A client that repeats the same reply a fixed number of times.
        pub fn repeating(reply: &str, times: usize) -> Self {
            Self::new(vec![reply; times])
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlmClient {
        async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                return Err(PlatformError::LlmCallFailed {
                    message: "scripted client exhausted".into(),
                });
            }
            let content = replies.remove(0);
            Ok(LlmResponse {
                content,
                model: request.model,
                input_tokens: self.tokens_per_call / 2,
                output_tokens: self.tokens_per_call / 2,
                cost_usd: self.cost_per_call,
            })
        }
    }
}
