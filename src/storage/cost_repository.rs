//! Durable cost records and the daily model-usage rollup.
//!
//! Cost records are insert-only. Each record carrying a model also bumps
//! the `model_usage` rollup, unique per (tenant, model, date), which keeps
//! reporting queries cheap.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};

use crate::cost::{CostRecord, CostRepositorySink};

/// One row of the daily usage rollup.
#[derive(Debug, Clone)]
pub struct ModelUsage {
    pub tenant_id: String,
    pub model: String,
    pub date: NaiveDate,
    pub call_count: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_cost_usd: f64,
}

/// rusqlite-backed cost repository.
pub struct SqliteCostRepository {
    connection: Arc<Mutex<Connection>>,
}

impl SqliteCostRepository {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn in_memory() -> anyhow::Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(connection: Connection) -> anyhow::Result<Self> {
        let repository = Self {
            connection: Arc::new(Mutex::new(connection)),
        };
        repository.initialize()?;
        Ok(repository)
    }

    fn initialize(&self) -> anyhow::Result<()> {
        self.connection.lock().execute_batch(
            "CREATE TABLE IF NOT EXISTS cost_records (
                id TEXT PRIMARY KEY,
                tenant_id TEXT,
                task_id TEXT NOT NULL,
                chain_id TEXT,
                step_id TEXT,
                tool_name TEXT NOT NULL,
                cost_usd REAL NOT NULL,
                tokens INTEGER NOT NULL,
                model TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_costs_tenant_created
                ON cost_records (tenant_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_costs_task
                ON cost_records (task_id, created_at);
            CREATE TABLE IF NOT EXISTS model_usage (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                model TEXT NOT NULL,
                date TEXT NOT NULL,
                call_count INTEGER NOT NULL DEFAULT 0,
                input_tokens INTEGER NOT NULL DEFAULT 0,
                output_tokens INTEGER NOT NULL DEFAULT 0,
                total_cost_usd REAL NOT NULL DEFAULT 0,
                UNIQUE (tenant_id, model, date)
            );",
        )?;
        Ok(())
    }

    /// Records for a task, tenant-scoped, oldest first.
    pub fn list_for_task(
        &self,
        task_id: &str,
        tenant_id: Option<&str>,
    ) -> anyhow::Result<Vec<CostRecord>> {
        let connection = self.connection.lock();
        let mut statement = connection.prepare(
            "SELECT id, tenant_id, task_id, chain_id, step_id, tool_name,
                    cost_usd, tokens, model, created_at
             FROM cost_records
             WHERE task_id = ?1 AND (tenant_id IS ?2)
             ORDER BY created_at, id",
        )?;
        let rows = statement.query_map(params![task_id, tenant_id], |row| {
            Ok(CostRecord {
                id: row.get(0)?,
                tenant_id: row.get(1)?,
                task_id: row.get(2)?,
                chain_id: row.get(3)?,
                step_id: row.get(4)?,
                tool_name: row.get(5)?,
                cost_usd: row.get(6)?,
                tokens: row.get(7)?,
                model: row.get(8)?,
                created_at: parse_timestamp(row.get::<_, String>(9)?),
            })
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    /// Total spend for a tenant.
    pub fn total_for_tenant(&self, tenant_id: &str) -> anyhow::Result<f64> {
        let connection = self.connection.lock();
        let total: f64 = connection.query_row(
            "SELECT COALESCE(SUM(cost_usd), 0) FROM cost_records WHERE tenant_id = ?1",
            params![tenant_id],
            |row| row.get(0),
        )?;
        Ok(total)
    }

    /// Usage rollup rows for a tenant, newest date first.
    pub fn model_usage_for_tenant(&self, tenant_id: &str) -> anyhow::Result<Vec<ModelUsage>> {
        let connection = self.connection.lock();
        let mut statement = connection.prepare(
            "SELECT tenant_id, model, date, call_count, input_tokens,
                    output_tokens, total_cost_usd
             FROM model_usage WHERE tenant_id = ?1
             ORDER BY date DESC, model",
        )?;
        let rows = statement.query_map(params![tenant_id], |row| {
            Ok(ModelUsage {
                tenant_id: row.get(0)?,
                model: row.get(1)?,
                date: row
                    .get::<_, String>(2)?
                    .parse()
                    .unwrap_or_else(|_| Utc::now().date_naive()),
                call_count: row.get(3)?,
                input_tokens: row.get(4)?,
                output_tokens: row.get(5)?,
                total_cost_usd: row.get(6)?,
            })
        })?;

        let mut usage = Vec::new();
        for row in rows {
            usage.push(row?);
        }
        Ok(usage)
    }

    /// Remove every row belonging to a tenant. Records are otherwise
    /// append-only; this is the tenant-purge path.
    pub fn purge_tenant(&self, tenant_id: &str) -> anyhow::Result<()> {
        let connection = self.connection.lock();
        connection.execute(
            "DELETE FROM cost_records WHERE tenant_id = ?1",
            params![tenant_id],
        )?;
        connection.execute(
            "DELETE FROM model_usage WHERE tenant_id = ?1",
            params![tenant_id],
        )?;
        Ok(())
    }

    fn rollup(&self, connection: &Connection, record: &CostRecord) -> anyhow::Result<()> {
        let Some(model) = &record.model else {
            return Ok(());
        };
        let tenant = record.tenant_id.as_deref().unwrap_or("default");
        let date = record.created_at.date_naive().to_string();

        // The tokens column on a record is the total; the rollup splits
        // it evenly when the provider did not report a breakdown.
        let input_tokens = record.tokens / 2;
        let output_tokens = record.tokens - input_tokens;

        connection.execute(
            "INSERT INTO model_usage
                 (id, tenant_id, model, date, call_count, input_tokens,
                  output_tokens, total_cost_usd)
             VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6, ?7)
             ON CONFLICT (tenant_id, model, date) DO UPDATE SET
                 call_count = call_count + 1,
                 input_tokens = input_tokens + excluded.input_tokens,
                 output_tokens = output_tokens + excluded.output_tokens,
                 total_cost_usd = total_cost_usd + excluded.total_cost_usd",
            params![
                uuid::Uuid::new_v4().to_string(),
                tenant,
                model,
                date,
                input_tokens,
                output_tokens,
                record.cost_usd,
            ],
        )?;
        Ok(())
    }
}

impl CostRepositorySink for SqliteCostRepository {
    fn insert(&self, record: &CostRecord) -> anyhow::Result<()> {
        let connection = self.connection.lock();
        connection.execute(
            "INSERT INTO cost_records
                 (id, tenant_id, task_id, chain_id, step_id, tool_name,
                  cost_usd, tokens, model, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                record.id,
                record.tenant_id,
                record.task_id,
                record.chain_id,
                record.step_id,
                record.tool_name,
                record.cost_usd,
                record.tokens,
                record.model,
                record.created_at.to_rfc3339(),
            ],
        )?;
        self.rollup(&connection, record)?;
        Ok(())
    }
}

fn parse_timestamp(raw: String) -> DateTime<Utc> {
    raw.parse().unwrap_or_else(|_| Utc::now())
}
