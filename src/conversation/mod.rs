//! Tenant-scoped conversation persistence.

pub mod models;
pub mod repository;

pub use models::{Conversation, ConversationMessage};
pub use repository::{ConversationRepository, SqliteConversationRepository};
