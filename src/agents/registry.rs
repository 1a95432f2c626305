//! Agent registry: id → agent lookup used by orchestration and delegation.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::models::{Agent, AgentCard};
use crate::errors::{PlatformError, Result};

/// Process-wide table of known agents, injected where needed rather than
/// accessed as an ambient global.
#[derive(Default)]
pub struct AgentRegistry {
    agents: RwLock<HashMap<String, Arc<dyn Agent>>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent under its identity id. Re-registration replaces.
    pub fn register(&self, agent: Arc<dyn Agent>) {
        let id = agent.identity().id.clone();
        self.agents.write().insert(id, agent);
    }

    /// Look up an agent by id.
    pub fn get(&self, agent_id: &str) -> Result<Arc<dyn Agent>> {
        self.agents
            .read()
            .get(agent_id)
            .cloned()
            .ok_or_else(|| PlatformError::AgentNotFound {
                agent_id: agent_id.to_string(),
            })
    }

    /// Cards for every registered agent, sorted by id.
    pub fn cards(&self) -> Vec<AgentCard> {
        let mut cards: Vec<AgentCard> = self
            .agents
            .read()
            .values()
            .map(|agent| AgentCard::new(agent.identity().clone()))
            .collect();
        cards.sort_by(|a, b| a.identity.id.cmp(&b.identity.id));
        cards
    }

    pub fn len(&self) -> usize {
        self.agents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.read().is_empty()
    }
}
