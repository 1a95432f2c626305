//! Conversation handoff between agents.
//!
//! A handoff transfers control of a thread from one agent to another with
//! an auditable session record. The canonical session lives under the
//! `handoff_session` key of the conversation's state metadata; an
//! in-memory cache keyed by thread fronts the store and is validated
//! against the tenant on every read.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::conversation::ConversationRepository;
use crate::errors::{PlatformError, Result};

/// Key under which the session is stored in conversation state metadata.
const STATE_METADATA_KEY: &str = "handoff_session";

/// Lifecycle state of a handoff session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandoffState {
    Pending,
    Active,
    Returning,
    Completed,
    Cancelled,
    Error,
}

/// How a handoff finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionStatus {
    Completed,
    Cancelled,
    Error,
}

impl CompletionStatus {
    fn terminal_state(&self) -> HandoffState {
        match self {
            CompletionStatus::Completed => HandoffState::Completed,
            CompletionStatus::Cancelled => HandoffState::Cancelled,
            CompletionStatus::Error => HandoffState::Error,
        }
    }
}

/// Session record for one conversation handoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffSession {
    pub handoff_id: String,
    pub thread_id: String,
    pub tenant_id: String,
    pub user_id: String,
    pub source_agent_id: String,
    pub target_agent_id: String,
    pub state: HandoffState,
    pub context_summary: String,
    pub handoff_reason: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result_summary: Option<String>,
    #[serde(default)]
    pub artifacts_created: Vec<String>,
}

/// Acceptance reply for an initiated handoff. Phase 1 always accepts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffAccept {
    pub thread_id: String,
    pub source_agent_id: String,
    pub target_agent_id: String,
    pub accepted: bool,
    pub rejection_reason: Option<String>,
}

/// Control-return message produced when a handoff finishes; source and
/// target are swapped relative to the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffReturn {
    pub thread_id: String,
    pub tenant_id: String,
    pub source_agent_id: String,
    pub target_agent_id: String,
    pub completion_status: CompletionStatus,
    pub result_summary: Option<String>,
    #[serde(default)]
    pub artifacts_created: Vec<String>,
}

/// Coordinates handoff sessions over the conversation store.
pub struct HandoffManager {
    repository: Arc<dyn ConversationRepository>,
    active: DashMap<String, HandoffSession>,
}

impl HandoffManager {
    pub fn new(repository: Arc<dyn ConversationRepository>) -> Self {
        Self {
            repository,
            active: DashMap::new(),
        }
    }

    /// Initiate a handoff on a thread. Fails with `handoff_error` if the
    /// thread already has an active handoff.
    #[allow(clippy::too_many_arguments)]
    pub fn initiate_handoff(
        &self,
        thread_id: &str,
        tenant_id: &str,
        user_id: &str,
        source_agent_id: &str,
        target_agent_id: &str,
        context_summary: &str,
        handoff_reason: &str,
    ) -> Result<HandoffAccept> {
        for (name, value) in [
            ("thread_id", thread_id),
            ("tenant_id", tenant_id),
            ("user_id", user_id),
            ("source_agent_id", source_agent_id),
            ("target_agent_id", target_agent_id),
            ("context_summary", context_summary),
            ("handoff_reason", handoff_reason),
        ] {
            if value.trim().is_empty() {
                return Err(PlatformError::Handoff {
                    message: format!("{} cannot be empty", name),
                });
            }
        }

        if let Some(existing) = self.get_active_handoff(thread_id, tenant_id)? {
            return Err(PlatformError::Handoff {
                message: format!(
                    "active handoff already exists for thread {} (handoff_id: {})",
                    thread_id, existing.handoff_id
                ),
            });
        }

        // Phase 1: the target auto-accepts; the session starts active.
        let session = HandoffSession {
            handoff_id: Uuid::new_v4().to_string(),
            thread_id: thread_id.to_string(),
            tenant_id: tenant_id.to_string(),
            user_id: user_id.to_string(),
            source_agent_id: source_agent_id.to_string(),
            target_agent_id: target_agent_id.to_string(),
            state: HandoffState::Active,
            context_summary: context_summary.to_string(),
            handoff_reason: handoff_reason.to_string(),
            started_at: Utc::now(),
            completed_at: None,
            result_summary: None,
            artifacts_created: Vec::new(),
        };

        info!(
            thread_id,
            tenant_id,
            source = source_agent_id,
            target = target_agent_id,
            handoff_id = %session.handoff_id,
            "handoff initiated"
        );

        self.persist(&session)?;
        self.active.insert(thread_id.to_string(), session);

        Ok(HandoffAccept {
            thread_id: thread_id.to_string(),
            source_agent_id: source_agent_id.to_string(),
            target_agent_id: target_agent_id.to_string(),
            accepted: true,
            rejection_reason: None,
        })
    }

    /// Active handoff for a thread, if any. Cache first, then the store;
    /// non-active cache entries are evicted on sight.
    pub fn get_active_handoff(
        &self,
        thread_id: &str,
        tenant_id: &str,
    ) -> Result<Option<HandoffSession>> {
        if thread_id.trim().is_empty() || tenant_id.trim().is_empty() {
            return Err(PlatformError::Handoff {
                message: "thread_id and tenant_id cannot be empty".into(),
            });
        }

        if let Some(entry) = self.active.get(thread_id) {
            let session = entry.value().clone();
            drop(entry);
            if session.tenant_id != tenant_id {
                return Err(PlatformError::Handoff {
                    message: format!(
                        "thread {} does not belong to tenant {}",
                        thread_id, tenant_id
                    ),
                });
            }
            if session.state == HandoffState::Active {
                return Ok(Some(session));
            }
            self.active.remove(thread_id);
            return Ok(None);
        }

        let Some(conversation) = self.repository.get_conversation(thread_id, tenant_id)? else {
            return Ok(None);
        };
        let Some(raw) = conversation
            .state_metadata
            .as_ref()
            .and_then(|metadata| metadata.get(STATE_METADATA_KEY))
        else {
            return Ok(None);
        };

        let session: HandoffSession =
            serde_json::from_value(raw.clone()).map_err(|error| PlatformError::Handoff {
                message: format!("stored handoff session is corrupt: {}", error),
            })?;

        if session.state == HandoffState::Active {
            self.active.insert(thread_id.to_string(), session.clone());
            return Ok(Some(session));
        }
        Ok(None)
    }

    /// Complete an active handoff and return control to the initiator.
    pub fn complete_handoff(
        &self,
        thread_id: &str,
        tenant_id: &str,
        completion_status: CompletionStatus,
        result_summary: Option<String>,
        artifacts: Option<Vec<String>>,
    ) -> Result<HandoffReturn> {
        let Some(mut session) = self.get_active_handoff(thread_id, tenant_id)? else {
            return Err(PlatformError::Handoff {
                message: format!("no active handoff found for thread {}", thread_id),
            });
        };

        session.state = completion_status.terminal_state();
        session.completed_at = Some(Utc::now());
        if let Some(summary) = &result_summary {
            session.result_summary = Some(summary.clone());
        }
        if let Some(artifacts) = &artifacts {
            session.artifacts_created = artifacts.clone();
        }

        let duration_seconds = (Utc::now() - session.started_at).num_seconds();
        match completion_status {
            CompletionStatus::Error => warn!(
                thread_id,
                tenant_id,
                handoff_id = %session.handoff_id,
                duration_seconds,
                "handoff error"
            ),
            _ => info!(
                thread_id,
                tenant_id,
                handoff_id = %session.handoff_id,
                status = ?completion_status,
                duration_seconds,
                "handoff finished"
            ),
        }

        self.persist(&session)?;
        self.active.remove(thread_id);

        Ok(HandoffReturn {
            thread_id: thread_id.to_string(),
            tenant_id: tenant_id.to_string(),
            // Control returns to the initiator.
            source_agent_id: session.target_agent_id.clone(),
            target_agent_id: session.source_agent_id.clone(),
            completion_status,
            result_summary,
            artifacts_created: artifacts.unwrap_or_default(),
        })
    }

    /// Cancel an active handoff.
    pub fn cancel_handoff(&self, thread_id: &str, tenant_id: &str) -> Result<HandoffReturn> {
        self.complete_handoff(
            thread_id,
            tenant_id,
            CompletionStatus::Cancelled,
            Some("Handoff cancelled".into()),
            None,
        )
    }

    /// Write the session into the conversation's state metadata, preserving
    /// the conversation's own state and any other metadata keys.
    fn persist(&self, session: &HandoffSession) -> Result<()> {
        let conversation = self
            .repository
            .get_conversation(&session.thread_id, &session.tenant_id)?
            .ok_or_else(|| PlatformError::Handoff {
                message: format!(
                    "conversation {} not found or does not belong to tenant",
                    session.thread_id
                ),
            })?;

        let mut metadata = conversation
            .state_metadata
            .unwrap_or_else(|| serde_json::json!({}));
        metadata[STATE_METADATA_KEY] =
            serde_json::to_value(session).map_err(|error| PlatformError::Handoff {
                message: format!("session serialization failed: {}", error),
            })?;

        self.repository.update_state(
            &session.thread_id,
            &session.tenant_id,
            conversation.state.as_deref().unwrap_or("active"),
            Some(metadata),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::SqliteConversationRepository;

    fn setup() -> (HandoffManager, String) {
        let repository = Arc::new(SqliteConversationRepository::in_memory().unwrap());
        let conversation = repository
            .create_conversation("tenant-a", "user-1", None)
            .unwrap();
        (HandoffManager::new(repository), conversation.id)
    }

    fn initiate(manager: &HandoffManager, thread: &str) -> HandoffAccept {
        manager
            .initiate_handoff(
                thread,
                "tenant-a",
                "user-1",
                "agent-src",
                "agent-dst",
                "user needs billing help",
                "billing specialist required",
            )
            .unwrap()
    }

    #[test]
    fn test_initiate_and_lookup() {
        let (manager, thread) = setup();
        let accept = initiate(&manager, &thread);
        assert!(accept.accepted);
        assert_eq!(accept.target_agent_id, "agent-dst");

        let session = manager
            .get_active_handoff(&thread, "tenant-a")
            .unwrap()
            .unwrap();
        assert_eq!(session.state, HandoffState::Active);
        assert_eq!(session.source_agent_id, "agent-src");
    }

    #[test]
    fn test_conflict_rejected_without_mutation() {
        let (manager, thread) = setup();
        initiate(&manager, &thread);
        let before = manager
            .get_active_handoff(&thread, "tenant-a")
            .unwrap()
            .unwrap();

        let err = manager
            .initiate_handoff(
                &thread,
                "tenant-a",
                "user-1",
                "agent-other",
                "agent-third",
                "context",
                "reason",
            )
            .unwrap_err();
        assert_eq!(err.code(), "handoff_error");

        let after = manager
            .get_active_handoff(&thread, "tenant-a")
            .unwrap()
            .unwrap();
        assert_eq!(after.handoff_id, before.handoff_id);
        assert_eq!(after.source_agent_id, "agent-src");
    }

    #[test]
    fn test_complete_swaps_direction_and_evicts() {
        let (manager, thread) = setup();
        initiate(&manager, &thread);

        let handoff_return = manager
            .complete_handoff(
                &thread,
                "tenant-a",
                CompletionStatus::Completed,
                Some("resolved the billing issue".into()),
                Some(vec!["artifact-1".into()]),
            )
            .unwrap();

        assert_eq!(handoff_return.source_agent_id, "agent-dst");
        assert_eq!(handoff_return.target_agent_id, "agent-src");
        assert_eq!(handoff_return.artifacts_created, vec!["artifact-1"]);

        // Terminal sessions never resurface.
        assert!(manager
            .get_active_handoff(&thread, "tenant-a")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_complete_without_active_fails() {
        let (manager, thread) = setup();
        let err = manager
            .complete_handoff(&thread, "tenant-a", CompletionStatus::Completed, None, None)
            .unwrap_err();
        assert_eq!(err.code(), "handoff_error");
    }

    #[test]
    fn test_persisted_session_survives_cache_loss() {
        let repository = Arc::new(SqliteConversationRepository::in_memory().unwrap());
        let conversation = repository
            .create_conversation("tenant-a", "user-1", None)
            .unwrap();

        let first = HandoffManager::new(repository.clone());
        first
            .initiate_handoff(
                &conversation.id,
                "tenant-a",
                "user-1",
                "agent-src",
                "agent-dst",
                "context",
                "reason",
            )
            .unwrap();

        // A fresh manager has an empty cache and must load from the store.
        let second = HandoffManager::new(repository);
        let session = second
            .get_active_handoff(&conversation.id, "tenant-a")
            .unwrap()
            .unwrap();
        assert_eq!(session.target_agent_id, "agent-dst");
    }

    #[test]
    fn test_tenant_mismatch_on_cached_entry() {
        let (manager, thread) = setup();
        initiate(&manager, &thread);

        let err = manager.get_active_handoff(&thread, "tenant-b").unwrap_err();
        assert_eq!(err.code(), "handoff_error");
    }

    #[test]
    fn test_cancel_sets_cancelled_state() {
        let (manager, thread) = setup();
        initiate(&manager, &thread);

        let handoff_return = manager.cancel_handoff(&thread, "tenant-a").unwrap();
        assert_eq!(
            handoff_return.completion_status,
            CompletionStatus::Cancelled
        );
        assert!(manager
            .get_active_handoff(&thread, "tenant-a")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_blank_fields_rejected() {
        let (manager, thread) = setup();
        let err = manager
            .initiate_handoff(&thread, "tenant-a", "user-1", "", "dst", "ctx", "why")
            .unwrap_err();
        assert!(err.to_string().contains("source_agent_id"));
    }
}
