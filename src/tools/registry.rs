//! Tool registry.
//!
//! Read-mostly mapping from tool name to implementation. Registration is
//! rare and guarded by a writer lock; lookups clone the shared handle.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::base::{Tool, ToolDefinition};
use crate::errors::{PlatformError, Result};

/// Registry of available tools, optionally viewed through a skill's
/// allowed-tools whitelist.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Fails if a tool with the same name exists.
    pub fn register(&self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.definition().name.clone();
        let mut tools = self.tools.write();
        if tools.contains_key(&name) {
            return Err(PlatformError::ToolAlreadyRegistered { name });
        }
        tools.insert(name, tool);
        Ok(())
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Tool>> {
        self.tools
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| PlatformError::ToolNotFound {
                name: name.to_string(),
            })
    }

    /// Whether a tool is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.tools.read().contains_key(name)
    }

    /// Definitions of all registered tools, sorted by name.
    pub fn list(&self) -> Vec<ToolDefinition> {
        let mut definitions: Vec<ToolDefinition> = self
            .tools
            .read()
            .values()
            .map(|tool| tool.definition().clone())
            .collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    /// Definitions filtered by an allowed-tools whitelist, sorted by name.
    pub fn list_allowed(&self, allowed: &[String]) -> Vec<ToolDefinition> {
        self.list()
            .into_iter()
            .filter(|definition| allowed.iter().any(|name| name == &definition.name))
            .collect()
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.read().is_empty()
    }
}
