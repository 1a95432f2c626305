//! Agent identity, capabilities, and the core `Agent` trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::reasoning::ReasoningEngine;
use crate::tasks::models::Task;

/// Stable identity of an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentIdentity {
    pub id: String,
    pub name: String,
    pub description: String,
    pub version: String,
}

impl AgentIdentity {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            version: "1.0.0".into(),
        }
    }
}

/// Capability flags advertised by an agent.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AgentCapabilities {
    #[serde(default)]
    pub streaming: bool,
    #[serde(default)]
    pub multi_turn: bool,
    #[serde(default)]
    pub push_notifications: bool,
}

/// Public card describing an agent to its peers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCard {
    pub identity: AgentIdentity,
    pub capabilities: AgentCapabilities,
}

impl AgentCard {
    pub fn new(identity: AgentIdentity) -> Self {
        Self {
            identity,
            capabilities: AgentCapabilities::default(),
        }
    }
}

/// An executable agent: given a task and a reasoning engine, produce the
/// final answer text. The task engine wraps this in the streaming event
/// protocol; implementations never emit events directly.
#[async_trait]
pub trait Agent: Send + Sync {
    /// The agent's identity.
    fn identity(&self) -> &AgentIdentity;

    /// Run the agent's reasoning for the task.
    async fn reason(&self, task: &Task, engine: &mut ReasoningEngine) -> Result<String>;
}

impl std::fmt::Debug for dyn Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("identity", self.identity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_card_serde() {
        let card = AgentCard::new(AgentIdentity::new("a-1", "Helper", "Helps out"));
        let json = serde_json::to_string(&card).unwrap();
        let restored: AgentCard = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.identity.id, "a-1");
        assert!(!restored.capabilities.streaming);
    }
}
