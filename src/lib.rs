//! # agentmesh
//!
//! Multi-tenant orchestration core for autonomous LLM agents.
//!
//! The crate covers the reasoning side of an agent platform: a bounded
//! ReAct loop over a tool-invocation pipeline, streaming task execution
//! with typed events and lineage, skill activation with tool whitelists,
//! multi-agent delegation and conversation handoff, layered prompt
//! composition with a two-tier cache, and cost/budget accounting, all of
//! it tenant-scoped. LLM providers, transports, and authentication live
//! outside the crate behind the seams in [`llm`] and the repository
//! traits.

pub mod agents;
pub mod conversation;
pub mod cost;
pub mod errors;
pub mod llm;
pub mod orchestration;
pub mod prompts;
pub mod reasoning;
pub mod security;
pub mod skills;
pub mod storage;
pub mod tasks;
pub mod tools;
pub mod visibility;

pub use agents::{Agent, AgentIdentity, AgentRegistry, AutonomousAgent};
pub use errors::{PlatformError, Result};
pub use llm::LlmClient;
pub use orchestration::{DelegationStrategy, HandoffManager, OrchestrationManager};
pub use prompts::CompositionEngine;
pub use reasoning::{ReasoningChain, ReasoningEngine};
pub use skills::{Skill, SkillOrchestrator};
pub use tasks::{CancellationSignal, Task, TaskEngine, TaskEvent, TaskState};
pub use tools::{Tool, ToolExecutor, ToolRegistry};
pub use visibility::{EventFilter, ViewerRole, VisibilityLevel};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
