//! Multi-agent orchestration: dispatch strategies and conversation handoff.

pub mod handoff;
pub mod manager;

pub use handoff::{
    CompletionStatus, HandoffAccept, HandoffManager, HandoffReturn, HandoffSession, HandoffState,
};
pub use manager::{DelegationStrategy, OrchestrationManager, SubAgentResult};
