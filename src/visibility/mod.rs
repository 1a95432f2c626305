//! Visibility levels, viewer roles, and the role-based event filter.

mod filter;

pub use filter::{redact_sensitive_fields, redact_sensitive_text, EventFilter, FilterConfig};

use serde::{Deserialize, Serialize};

/// How much of a step or event a viewer may observe.
///
/// `Hidden` is irrevocable: a hidden record is never emitted regardless of
/// the viewer's role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisibilityLevel {
    /// Full payload visible.
    Full,
    /// Reduced to a short synthetic summary.
    Summary,
    /// Never emitted.
    Hidden,
}

impl Default for VisibilityLevel {
    fn default() -> Self {
        VisibilityLevel::Summary
    }
}

/// Role of the viewer consuming an event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewerRole {
    EndUser,
    Developer,
    Admin,
}

impl ViewerRole {
    /// Maximum visibility level granted to this role.
    pub fn max_visibility(&self) -> VisibilityLevel {
        match self {
            ViewerRole::EndUser => VisibilityLevel::Summary,
            ViewerRole::Developer | ViewerRole::Admin => VisibilityLevel::Full,
        }
    }
}
