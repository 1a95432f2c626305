//! Prompt storage.
//!
//! Versions within a (layer, scope, tenant) cell are strictly increasing;
//! reads return the latest version. The in-memory implementation backs
//! tests and single-process deployments; a durable backend implements the
//! same trait.

use std::collections::HashMap;

use parking_lot::RwLock;

use super::models::{Prompt, PromptLayer};
use crate::errors::{PlatformError, Result};

/// Storage contract for prompts.
pub trait PromptRepository: Send + Sync {
    /// Latest version of the prompt in the given cell, if any.
    fn get_by_layer(
        &self,
        layer: PromptLayer,
        scope_id: &str,
        tenant_id: Option<&str>,
    ) -> Result<Option<Prompt>>;

    /// Store a new prompt version. The version must exceed the latest one
    /// in its cell.
    fn save(&self, prompt: Prompt) -> Result<()>;
}

type CellKey = (PromptLayer, String, Option<String>);

/// In-memory prompt repository.
#[derive(Default)]
pub struct InMemoryPromptRepository {
    cells: RwLock<HashMap<CellKey, Vec<Prompt>>>,
}

impl InMemoryPromptRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PromptRepository for InMemoryPromptRepository {
    fn get_by_layer(
        &self,
        layer: PromptLayer,
        scope_id: &str,
        tenant_id: Option<&str>,
    ) -> Result<Option<Prompt>> {
        let key = (layer, scope_id.to_string(), tenant_id.map(String::from));
        Ok(self
            .cells
            .read()
            .get(&key)
            .and_then(|versions| versions.last())
            .cloned())
    }

    fn save(&self, prompt: Prompt) -> Result<()> {
        let key = (
            prompt.layer,
            prompt.scope_id.clone(),
            prompt.tenant_id.clone(),
        );
        let mut cells = self.cells.write();
        let versions = cells.entry(key).or_default();
        if let Some(latest) = versions.last() {
            if prompt.version <= latest.version {
                return Err(PlatformError::PromptValidation {
                    message: format!(
                        "version {} must exceed latest version {} for {}:{}",
                        prompt.version,
                        latest.version,
                        prompt.layer.as_str(),
                        prompt.scope_id
                    ),
                });
            }
        }
        versions.push(prompt);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_get_latest() {
        let repo = InMemoryPromptRepository::new();
        repo.save(Prompt::new(PromptLayer::Agent, "agent-1", "v1", "one"))
            .unwrap();
        repo.save(
            Prompt::new(PromptLayer::Agent, "agent-1", "v2", "two").with_version(2),
        )
        .unwrap();

        let latest = repo
            .get_by_layer(PromptLayer::Agent, "agent-1", None)
            .unwrap()
            .unwrap();
        assert_eq!(latest.content, "two");
        assert_eq!(latest.version, 2);
    }

    #[test]
    fn test_versions_strictly_increasing() {
        let repo = InMemoryPromptRepository::new();
        repo.save(
            Prompt::new(PromptLayer::Agent, "agent-1", "v2", "two").with_version(2),
        )
        .unwrap();
        let err = repo
            .save(Prompt::new(PromptLayer::Agent, "agent-1", "v1", "late").with_version(2))
            .unwrap_err();
        assert_eq!(err.code(), "prompt_validation_error");
    }

    #[test]
    fn test_tenant_scoping() {
        let repo = InMemoryPromptRepository::new();
        repo.save(
            Prompt::new(PromptLayer::Tenant, "tenant-a", "a", "tenant a prompt")
                .with_tenant("tenant-a"),
        )
        .unwrap();

        assert!(repo
            .get_by_layer(PromptLayer::Tenant, "tenant-a", Some("tenant-a"))
            .unwrap()
            .is_some());
        assert!(repo
            .get_by_layer(PromptLayer::Tenant, "tenant-a", Some("tenant-b"))
            .unwrap()
            .is_none());
    }
}
