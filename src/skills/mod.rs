//! Skills: reusable instruction bundles with tool whitelists and budgets.

pub mod config;
pub mod models;
pub mod orchestrator;

pub use config::{AutonomousConfig, ExecutionContext};
pub use models::{ContextMode, Skill, SkillMetadata};
pub use orchestrator::SkillOrchestrator;
