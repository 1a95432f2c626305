//! Prompt composition: layered templates, merge points, rendering, and the
//! two-tier composed-prompt cache.

pub mod cache;
pub mod engine;
pub mod keys;
pub mod merge;
pub mod models;
pub mod renderer;
pub mod repository;
pub mod safety;

pub use cache::{PromptCache, SharedCache};
pub use engine::{CompositionEngine, CompositionRequest};
pub use models::{ComposedPrompt, MergeBehavior, MergePointDefinition, Prompt, PromptLayer};
pub use repository::{InMemoryPromptRepository, PromptRepository};
