//! Reasoning chains: the append-only record of a reasoning run, and the
//! engine facade that agents use to produce one.

mod chain;
mod engine;

pub use chain::{
    ChainMetrics, ChainStatus, ReasoningChain, ReasoningStep, StepKind, StepPayload,
};
pub use engine::{LlmCallOutcome, ReasoningEngine};
