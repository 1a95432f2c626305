//! SQLite persistence for chains, costs, model usage, and audit events.

pub mod audit;
pub mod chain_store;
pub mod cost_repository;

pub use audit::{AuditEvent, AuditOutcome, SqliteAuditLog};
pub use chain_store::SqliteChainStore;
pub use cost_repository::{ModelUsage, SqliteCostRepository};
