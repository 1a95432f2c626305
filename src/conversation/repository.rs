//! SQLite conversation repository.
//!
//! Every read carries the tenant predicate in SQL: a lookup with the wrong
//! tenant returns nothing, never a permission error. Writes against a
//! conversation the tenant does not own fail the same not-found way.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use super::models::{Conversation, ConversationMessage};
use crate::errors::{PlatformError, Result};

/// Storage contract consumed by the handoff manager and task engine.
pub trait ConversationRepository: Send + Sync {
    fn create_conversation(
        &self,
        tenant_id: &str,
        user_id: &str,
        title: Option<String>,
    ) -> Result<Conversation>;

    /// Tenant-scoped lookup; `None` when absent or owned by another tenant.
    fn get_conversation(&self, id: &str, tenant_id: &str) -> Result<Option<Conversation>>;

    /// Append a message. Fails not-found-style for the wrong tenant.
    fn add_message(
        &self,
        conversation_id: &str,
        tenant_id: &str,
        role: &str,
        content: &str,
    ) -> Result<ConversationMessage>;

    /// Ordered messages of a conversation.
    fn list_messages(
        &self,
        conversation_id: &str,
        tenant_id: &str,
    ) -> Result<Vec<ConversationMessage>>;

    /// Persist conversation state plus its metadata document.
    fn update_state(
        &self,
        conversation_id: &str,
        tenant_id: &str,
        state: &str,
        state_metadata: Option<Value>,
    ) -> Result<()>;
}

/// rusqlite-backed repository.
pub struct SqliteConversationRepository {
    connection: Arc<Mutex<Connection>>,
}

impl SqliteConversationRepository {
    /// Open (or create) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let connection = Connection::open(path)?;
        let repository = Self {
            connection: Arc::new(Mutex::new(connection)),
        };
        repository.initialize()?;
        Ok(repository)
    }

    /// In-memory database, handy for tests and ephemeral runs.
    pub fn in_memory() -> anyhow::Result<Self> {
        let connection = Connection::open_in_memory()?;
        let repository = Self {
            connection: Arc::new(Mutex::new(connection)),
        };
        repository.initialize()?;
        Ok(repository)
    }

    fn initialize(&self) -> anyhow::Result<()> {
        let connection = self.connection.lock();
        connection.execute_batch(
            "CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                title TEXT,
                state TEXT,
                state_metadata TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_conversations_tenant
                ON conversations (tenant_id);
            CREATE TABLE IF NOT EXISTS conversation_messages (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL
                    REFERENCES conversations (id) ON DELETE CASCADE,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                timestamp TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_conversation
                ON conversation_messages (conversation_id, timestamp);",
        )?;
        Ok(())
    }

    fn not_found(conversation_id: &str) -> PlatformError {
        PlatformError::internal(format!(
            "conversation {} not found or not owned by tenant",
            conversation_id
        ))
    }
}

fn storage_error(error: rusqlite::Error) -> PlatformError {
    PlatformError::internal(format!("conversation store error: {}", error))
}

fn parse_timestamp(raw: String) -> DateTime<Utc> {
    raw.parse().unwrap_or_else(|_| Utc::now())
}

impl ConversationRepository for SqliteConversationRepository {
    fn create_conversation(
        &self,
        tenant_id: &str,
        user_id: &str,
        title: Option<String>,
    ) -> Result<Conversation> {
        let conversation = Conversation::new(tenant_id, user_id, title);
        let connection = self.connection.lock();
        connection
            .execute(
                "INSERT INTO conversations
                     (id, tenant_id, user_id, title, state, state_metadata,
                      created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    conversation.id,
                    conversation.tenant_id,
                    conversation.user_id,
                    conversation.title,
                    conversation.state,
                    conversation
                        .state_metadata
                        .as_ref()
                        .map(|metadata| metadata.to_string()),
                    conversation.created_at.to_rfc3339(),
                    conversation.updated_at.to_rfc3339(),
                ],
            )
            .map_err(storage_error)?;
        Ok(conversation)
    }

    fn get_conversation(&self, id: &str, tenant_id: &str) -> Result<Option<Conversation>> {
        let connection = self.connection.lock();
        connection
            .query_row(
                "SELECT id, tenant_id, user_id, title, state, state_metadata,
                        created_at, updated_at
                 FROM conversations WHERE id = ?1 AND tenant_id = ?2",
                params![id, tenant_id],
                |row| {
                    Ok(Conversation {
                        id: row.get(0)?,
                        tenant_id: row.get(1)?,
                        user_id: row.get(2)?,
                        title: row.get(3)?,
                        state: row.get(4)?,
                        state_metadata: row
                            .get::<_, Option<String>>(5)?
                            .and_then(|raw| serde_json::from_str(&raw).ok()),
                        created_at: parse_timestamp(row.get(6)?),
                        updated_at: parse_timestamp(row.get(7)?),
                    })
                },
            )
            .optional()
            .map_err(storage_error)
    }

    fn add_message(
        &self,
        conversation_id: &str,
        tenant_id: &str,
        role: &str,
        content: &str,
    ) -> Result<ConversationMessage> {
        if self.get_conversation(conversation_id, tenant_id)?.is_none() {
            return Err(Self::not_found(conversation_id));
        }

        let message = ConversationMessage::new(conversation_id, role, content);
        let connection = self.connection.lock();
        connection
            .execute(
                "INSERT INTO conversation_messages
                     (id, conversation_id, role, content, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    message.id,
                    message.conversation_id,
                    message.role,
                    message.content,
                    message.timestamp.to_rfc3339(),
                ],
            )
            .map_err(storage_error)?;
        Ok(message)
    }

    fn list_messages(
        &self,
        conversation_id: &str,
        tenant_id: &str,
    ) -> Result<Vec<ConversationMessage>> {
        if self.get_conversation(conversation_id, tenant_id)?.is_none() {
            return Ok(Vec::new());
        }

        let connection = self.connection.lock();
        let mut statement = connection
            .prepare(
                "SELECT id, conversation_id, role, content, timestamp
                 FROM conversation_messages
                 WHERE conversation_id = ?1
                 ORDER BY timestamp, id",
            )
            .map_err(storage_error)?;
        let rows = statement
            .query_map(params![conversation_id], |row| {
                Ok(ConversationMessage {
                    id: row.get(0)?,
                    conversation_id: row.get(1)?,
                    role: row.get(2)?,
                    content: row.get(3)?,
                    timestamp: parse_timestamp(row.get(4)?),
                })
            })
            .map_err(storage_error)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row.map_err(storage_error)?);
        }
        Ok(messages)
    }

    fn update_state(
        &self,
        conversation_id: &str,
        tenant_id: &str,
        state: &str,
        state_metadata: Option<Value>,
    ) -> Result<()> {
        let connection = self.connection.lock();
        let updated = connection
            .execute(
                "UPDATE conversations
                 SET state = ?1, state_metadata = ?2, updated_at = ?3
                 WHERE id = ?4 AND tenant_id = ?5",
                params![
                    state,
                    state_metadata.as_ref().map(|metadata| metadata.to_string()),
                    Utc::now().to_rfc3339(),
                    conversation_id,
                    tenant_id,
                ],
            )
            .map_err(storage_error)?;
        if updated == 0 {
            return Err(Self::not_found(conversation_id));
        }
        Ok(())
    }
}
