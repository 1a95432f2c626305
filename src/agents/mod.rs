//! Agents: identity, registry, and the autonomous ReAct reasoning loop.

pub mod autonomous;
pub mod models;
pub mod parser;
pub mod prompts;
pub mod registry;

pub use autonomous::AutonomousAgent;
pub use models::{Agent, AgentCapabilities, AgentCard, AgentIdentity};
pub use parser::{LlmReply, ReActParser};
pub use registry::AgentRegistry;
