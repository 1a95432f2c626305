//! Append-only audit log.
//!
//! Events are never modified or deleted outside a tenant purge. The core
//! writes here; fan-out to external sinks happens above the core.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Outcome of the audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Success,
    Failure,
    Denied,
}

/// One audit event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub tenant_id: Option<String>,
    pub user_id: Option<String>,
    pub agent_id: Option<String>,
    pub task_id: Option<String>,
    pub event_type: String,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub action: String,
    pub outcome: AuditOutcome,
    pub metadata: Value,
}

impl AuditEvent {
    pub fn new(
        event_type: impl Into<String>,
        action: impl Into<String>,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            tenant_id: None,
            user_id: None,
            agent_id: None,
            task_id: None,
            event_type: event_type.into(),
            resource_type: None,
            resource_id: None,
            action: action.into(),
            outcome,
            metadata: Value::Object(serde_json::Map::new()),
        }
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_resource(
        mut self,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        self.resource_type = Some(resource_type.into());
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// rusqlite-backed audit log.
pub struct SqliteAuditLog {
    connection: Arc<Mutex<Connection>>,
}

impl SqliteAuditLog {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn in_memory() -> anyhow::Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(connection: Connection) -> anyhow::Result<Self> {
        let log = Self {
            connection: Arc::new(Mutex::new(connection)),
        };
        log.initialize()?;
        Ok(log)
    }

    fn initialize(&self) -> anyhow::Result<()> {
        self.connection.lock().execute_batch(
            "CREATE TABLE IF NOT EXISTS audit_events (
                id TEXT PRIMARY KEY,
                timestamp TEXT NOT NULL,
                tenant_id TEXT,
                user_id TEXT,
                agent_id TEXT,
                task_id TEXT,
                event_type TEXT NOT NULL,
                resource_type TEXT,
                resource_id TEXT,
                action TEXT NOT NULL,
                outcome TEXT NOT NULL,
                metadata TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_audit_tenant_timestamp
                ON audit_events (tenant_id, timestamp);
            CREATE INDEX IF NOT EXISTS idx_audit_type_timestamp
                ON audit_events (event_type, timestamp);",
        )?;
        Ok(())
    }

    /// Append an event.
    pub fn record(&self, event: &AuditEvent) -> anyhow::Result<()> {
        self.connection.lock().execute(
            "INSERT INTO audit_events
                 (id, timestamp, tenant_id, user_id, agent_id, task_id,
                  event_type, resource_type, resource_id, action, outcome, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                event.id,
                event.timestamp.to_rfc3339(),
                event.tenant_id,
                event.user_id,
                event.agent_id,
                event.task_id,
                event.event_type,
                event.resource_type,
                event.resource_id,
                event.action,
                serde_json::to_string(&event.outcome)?,
                event.metadata.to_string(),
            ],
        )?;
        Ok(())
    }

    /// Most recent events for a tenant, newest first.
    pub fn list_for_tenant(
        &self,
        tenant_id: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<AuditEvent>> {
        let connection = self.connection.lock();
        let mut statement = connection.prepare(
            "SELECT id, timestamp, tenant_id, user_id, agent_id, task_id,
                    event_type, resource_type, resource_id, action, outcome, metadata
             FROM audit_events WHERE tenant_id = ?1
             ORDER BY timestamp DESC LIMIT ?2",
        )?;
        let rows = statement.query_map(params![tenant_id, limit as i64], |row| {
            Ok(AuditEvent {
                id: row.get(0)?,
                timestamp: row
                    .get::<_, String>(1)?
                    .parse()
                    .unwrap_or_else(|_| Utc::now()),
                tenant_id: row.get(2)?,
                user_id: row.get(3)?,
                agent_id: row.get(4)?,
                task_id: row.get(5)?,
                event_type: row.get(6)?,
                resource_type: row.get(7)?,
                resource_id: row.get(8)?,
                action: row.get(9)?,
                outcome: serde_json::from_str(&row.get::<_, String>(10)?)
                    .unwrap_or(AuditOutcome::Failure),
                metadata: serde_json::from_str(&row.get::<_, String>(11)?)
                    .unwrap_or(Value::Null),
            })
        })?;

        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }
}
