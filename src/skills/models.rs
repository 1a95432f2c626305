//! Skill data model.

use serde::{Deserialize, Serialize};

use crate::errors::{PlatformError, Result};

/// Maximum length accepted for a skill description.
const MAX_DESCRIPTION_LEN: usize = 1024;

/// How a skill's execution context relates to its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextMode {
    /// Run inside the caller's context.
    Inherit,
    /// Spawn a bounded sub-agent with its own context.
    Fork,
}

/// Declarative metadata of a skill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillMetadata {
    /// Skill name, used for lookup and scope tracking.
    pub name: String,
    /// Short description (at most 1024 characters).
    pub description: String,
    /// Tools the skill may use. `None` leaves the registry unrestricted.
    #[serde(default)]
    pub allowed_tools: Option<Vec<String>>,
    /// Context mode; defaults to inherit.
    #[serde(default)]
    pub context: Option<ContextMode>,
    /// Override for the loop's iteration cap.
    #[serde(default)]
    pub max_iterations: Option<u32>,
    /// Override for per-tool retries.
    #[serde(default)]
    pub max_retries_per_tool: Option<u32>,
    /// Per-iteration timeout, as a duration string ("30s", "5m", "30000ms").
    #[serde(default)]
    pub timeout_per_iteration: Option<String>,
    /// Override for early termination.
    #[serde(default)]
    pub early_termination: Option<bool>,
    /// Override for the model.
    #[serde(default)]
    pub model: Option<String>,
    /// Requested execution mode; anything but "autonomous" is deprecated.
    #[serde(default)]
    pub execution_mode: Option<String>,
}

impl SkillMetadata {
    /// Construct metadata, enforcing the naming and length bounds.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let description = description.into();
        if name.trim().is_empty() {
            return Err(PlatformError::PromptValidation {
                message: "skill name cannot be empty".into(),
            });
        }
        if description.len() > MAX_DESCRIPTION_LEN {
            return Err(PlatformError::PromptValidation {
                message: format!(
                    "skill description exceeds {} characters ({})",
                    MAX_DESCRIPTION_LEN,
                    description.len()
                ),
            });
        }
        Ok(Self {
            name,
            description,
            allowed_tools: None,
            context: None,
            max_iterations: None,
            max_retries_per_tool: None,
            timeout_per_iteration: None,
            early_termination: None,
            model: None,
            execution_mode: None,
        })
    }

    /// Builder: restrict the skill to the given tools.
    pub fn with_allowed_tools(mut self, tools: Vec<String>) -> Self {
        self.allowed_tools = Some(tools);
        self
    }

    /// Builder: set the context mode.
    pub fn with_context(mut self, context: ContextMode) -> Self {
        self.context = Some(context);
        self
    }

    /// Builder: cap iterations.
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }

    /// Builder: override the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// A loaded skill: metadata plus the instruction text and any supporting
/// files (resolved by the out-of-core loader).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skill {
    pub metadata: SkillMetadata,
    /// Instruction text prefixed to the agent's system prompt.
    pub instructions: String,
    /// Base path for the skill's supporting files.
    #[serde(default)]
    pub base_path: Option<String>,
    /// Script paths shipped with the skill.
    #[serde(default)]
    pub scripts: Vec<String>,
}

impl Skill {
    pub fn new(metadata: SkillMetadata, instructions: impl Into<String>) -> Self {
        Self {
            metadata,
            instructions: instructions.into(),
            base_path: None,
            scripts: Vec::new(),
        }
    }
}
