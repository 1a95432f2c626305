//! Reasoning-chain persistence.
//!
//! Chains and steps round-trip through two tables. Step payloads are
//! stored in kind-specific JSON columns; numbers, kinds, and aggregate
//! metrics survive a save/load cycle unchanged. Loads are tenant-scoped.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::reasoning::{ChainMetrics, ChainStatus, ReasoningChain, ReasoningStep, StepKind, StepPayload};
use crate::tasks::ChainSink;
use crate::visibility::VisibilityLevel;

/// rusqlite-backed chain store.
pub struct SqliteChainStore {
    connection: Arc<Mutex<Connection>>,
}

impl SqliteChainStore {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn in_memory() -> anyhow::Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(connection: Connection) -> anyhow::Result<Self> {
        let store = Self {
            connection: Arc::new(Mutex::new(connection)),
        };
        store.initialize()?;
        Ok(store)
    }

    fn initialize(&self) -> anyhow::Result<()> {
        self.connection.lock().execute_batch(
            "CREATE TABLE IF NOT EXISTS reasoning_chains (
                id TEXT PRIMARY KEY,
                task_id TEXT NOT NULL,
                agent_id TEXT NOT NULL,
                tenant_id TEXT,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                metrics TEXT NOT NULL,
                child_chain_ids TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_chains_tenant_task
                ON reasoning_chains (tenant_id, task_id);
            CREATE TABLE IF NOT EXISTS reasoning_steps (
                id TEXT PRIMARY KEY,
                chain_id TEXT NOT NULL
                    REFERENCES reasoning_chains (id) ON DELETE CASCADE,
                step_number INTEGER NOT NULL,
                kind TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                parent_step_id TEXT,
                visibility TEXT NOT NULL,
                thinking TEXT,
                tool_call TEXT,
                tool_result TEXT,
                synthesis TEXT,
                tokens_used INTEGER NOT NULL,
                cost REAL NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_steps_chain
                ON reasoning_steps (chain_id, step_number);",
        )?;
        Ok(())
    }

    /// Persist a chain and all its steps, replacing any prior copy.
    pub fn save(&self, chain: &ReasoningChain) -> anyhow::Result<()> {
        let mut connection = self.connection.lock();
        let tx = connection.transaction()?;

        tx.execute(
            "INSERT OR REPLACE INTO reasoning_chains
                 (id, task_id, agent_id, tenant_id, status, started_at,
                  completed_at, metrics, child_chain_ids)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                chain.id,
                chain.task_id,
                chain.agent_id,
                chain.tenant_id,
                serde_json::to_string(&chain.status)?,
                chain.started_at.to_rfc3339(),
                chain.completed_at.map(|at| at.to_rfc3339()),
                serde_json::to_string(&chain.metrics)?,
                serde_json::to_string(&chain.child_chain_ids)?,
            ],
        )?;

        tx.execute(
            "DELETE FROM reasoning_steps WHERE chain_id = ?1",
            params![chain.id],
        )?;
        for step in chain.steps() {
            let (thinking, tool_call, tool_result, synthesis) = payload_columns(&step.payload)?;
            tx.execute(
                "INSERT INTO reasoning_steps
                     (id, chain_id, step_number, kind, timestamp, parent_step_id,
                      visibility, thinking, tool_call, tool_result, synthesis,
                      tokens_used, cost)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    step.id,
                    chain.id,
                    step.step_number,
                    serde_json::to_string(&step.kind)?,
                    step.timestamp.to_rfc3339(),
                    step.parent_step_id,
                    serde_json::to_string(&step.visibility)?,
                    thinking,
                    tool_call,
                    tool_result,
                    synthesis,
                    step.tokens_used,
                    step.cost_usd,
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Load a chain with its steps, scoped to the tenant. A chain owned by
    /// another tenant is indistinguishable from a missing one.
    pub fn load(
        &self,
        chain_id: &str,
        tenant_id: Option<&str>,
    ) -> anyhow::Result<Option<ReasoningChain>> {
        let connection = self.connection.lock();

        let header = connection
            .query_row(
                "SELECT id, task_id, agent_id, tenant_id, status, started_at,
                        completed_at, metrics, child_chain_ids
                 FROM reasoning_chains
                 WHERE id = ?1 AND (tenant_id IS ?2)",
                params![chain_id, tenant_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, Option<String>>(6)?,
                        row.get::<_, String>(7)?,
                        row.get::<_, String>(8)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, task_id, agent_id, tenant, status, started_at, completed_at, metrics, children)) =
            header
        else {
            return Ok(None);
        };

        let mut statement = connection.prepare(
            "SELECT id, step_number, kind, timestamp, parent_step_id, visibility,
                    thinking, tool_call, tool_result, synthesis, tokens_used, cost
             FROM reasoning_steps
             WHERE chain_id = ?1
             ORDER BY step_number",
        )?;
        let rows = statement.query_map(params![chain_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, u64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, Option<String>>(7)?,
                row.get::<_, Option<String>>(8)?,
                row.get::<_, Option<String>>(9)?,
                row.get::<_, u64>(10)?,
                row.get::<_, f64>(11)?,
            ))
        })?;

        let mut steps = Vec::new();
        for row in rows {
            let (
                step_id,
                step_number,
                kind,
                timestamp,
                parent_step_id,
                visibility,
                thinking,
                tool_call,
                tool_result,
                synthesis,
                tokens_used,
                cost,
            ) = row?;

            let kind: StepKind = serde_json::from_str(&kind)?;
            let payload = payload_from_columns(kind, thinking, tool_call, tool_result, synthesis)?;
            steps.push(ReasoningStep {
                id: step_id,
                step_number,
                kind,
                timestamp: parse_timestamp(&timestamp),
                parent_step_id,
                visibility: serde_json::from_str::<VisibilityLevel>(&visibility)?,
                payload,
                tokens_used,
                cost_usd: cost,
            });
        }

        Ok(Some(ReasoningChain::from_parts(
            id,
            task_id,
            agent_id,
            tenant,
            serde_json::from_str::<ChainStatus>(&status)?,
            parse_timestamp(&started_at),
            completed_at.map(|at| parse_timestamp(&at)),
            serde_json::from_str::<ChainMetrics>(&metrics)?,
            serde_json::from_str(&children)?,
            steps,
        )))
    }

    /// Ids of all chains recorded for a task, tenant-scoped.
    pub fn chain_ids_for_task(
        &self,
        task_id: &str,
        tenant_id: Option<&str>,
    ) -> anyhow::Result<Vec<String>> {
        let connection = self.connection.lock();
        let mut statement = connection.prepare(
            "SELECT id FROM reasoning_chains
             WHERE task_id = ?1 AND (tenant_id IS ?2)
             ORDER BY started_at",
        )?;
        let rows = statement.query_map(params![task_id, tenant_id], |row| row.get(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }
}

impl ChainSink for SqliteChainStore {
    fn save_chain(&self, chain: &ReasoningChain) -> anyhow::Result<()> {
        self.save(chain)
    }
}

fn payload_columns(
    payload: &StepPayload,
) -> anyhow::Result<(Option<String>, Option<String>, Option<String>, Option<String>)> {
    let rendered = serde_json::to_string(payload)?;
    Ok(match payload {
        StepPayload::Thinking { .. } => (Some(rendered), None, None, None),
        StepPayload::ToolCall { .. } => (None, Some(rendered), None, None),
        StepPayload::ToolResult { .. } => (None, None, Some(rendered), None),
        StepPayload::Synthesis { .. } => (None, None, None, Some(rendered)),
    })
}

fn payload_from_columns(
    kind: StepKind,
    thinking: Option<String>,
    tool_call: Option<String>,
    tool_result: Option<String>,
    synthesis: Option<String>,
) -> anyhow::Result<StepPayload> {
    let column = match kind {
        StepKind::Thinking => thinking,
        StepKind::ToolCall => tool_call,
        StepKind::ToolResult => tool_result,
        StepKind::Synthesis => synthesis,
    };
    let raw = column.ok_or_else(|| anyhow::anyhow!("missing payload column for {:?}", kind))?;
    Ok(serde_json::from_str(&raw)?)
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    raw.parse().unwrap_or_else(|_| Utc::now())
}
