//! Parser for the JSON ReAct reply protocol.
//!
//! The LLM answers every iteration with a single JSON object:
//!
//! ```text
//! { "thought": string?, "action": string?, "action_input": object?,
//!   "final_answer": string?, "is_final": boolean }
//! ```
//!
//! Fenced code blocks around the object are permitted and stripped;
//! leading or trailing prose is not. At least one of `action` or
//! `final_answer` must be present, and `is_final=true` requires
//! `final_answer`.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{PlatformError, Result};

static CODE_FENCE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^\s*```(?:json)?\s*(.*?)\s*```\s*$").expect("invalid fence regex")
});

/// One parsed LLM reply: either an action to take or a final answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmReply {
    /// The model's reasoning for this step.
    #[serde(default)]
    pub thought: Option<String>,
    /// Tool name to invoke.
    #[serde(default)]
    pub action: Option<String>,
    /// Arguments for the tool.
    #[serde(default)]
    pub action_input: Option<HashMap<String, Value>>,
    /// Terminal answer text.
    #[serde(default)]
    pub final_answer: Option<String>,
    /// Whether this reply terminates the loop.
    #[serde(default)]
    pub is_final: bool,
}

/// Strict parser for the reply protocol.
#[derive(Debug, Clone, Default)]
pub struct ReActParser;

impl ReActParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse a raw reply into an [`LlmReply`].
    pub fn parse(&self, raw: &str) -> Result<LlmReply> {
        let stripped = strip_code_fence(raw);

        let reply: LlmReply =
            serde_json::from_str(stripped.trim()).map_err(|error| {
                PlatformError::InvalidLlmResponse {
                    message: format!("not a valid protocol object: {} ({})", error, preview(raw)),
                }
            })?;

        if reply.action.is_none() && reply.final_answer.is_none() {
            return Err(PlatformError::InvalidLlmResponse {
                message: format!(
                    "reply has neither action nor final_answer ({})",
                    preview(raw)
                ),
            });
        }

        if reply.is_final && reply.final_answer.is_none() {
            return Err(PlatformError::InvalidLlmResponse {
                message: "is_final=true requires final_answer".to_string(),
            });
        }

        Ok(reply)
    }
}

/// Strip a single surrounding code fence, with or without a `json` tag.
fn strip_code_fence(raw: &str) -> String {
    match CODE_FENCE_RE.captures(raw) {
        Some(caps) => caps[1].to_string(),
        None => raw.to_string(),
    }
}

fn preview(raw: &str) -> String {
    let flat = raw.replace('\n', " ");
    if flat.chars().count() > 120 {
        let head: String = flat.chars().take(120).collect();
        format!("{}...", head)
    } else {
        flat
    }
}
