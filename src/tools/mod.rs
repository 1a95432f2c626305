//! Tool system: definitions, registry, and the execution pipeline.

pub mod base;
pub mod builtin;
pub mod executor;
pub mod registry;
pub mod types;

pub use base::{
    StreamingTool, Tool, ToolCallContext, ToolDefinition, ToolParameter, ToolPermissions,
    ToolResult, ToolRetryConfig, ToolVisibilityConfig,
};
pub use executor::{ExecutorConfig, ToolExecutor};
pub use registry::ToolRegistry;
pub use types::{AuditLevel, ParameterType, ToolType};
