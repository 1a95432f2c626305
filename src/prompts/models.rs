//! Prompt data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Hierarchical layer a prompt belongs to, lowest priority first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptLayer {
    System,
    Tenant,
    Feature,
    Agent,
}

impl PromptLayer {
    /// All layers in priority order (lowest first).
    pub const PRIORITY: [PromptLayer; 4] = [
        PromptLayer::System,
        PromptLayer::Tenant,
        PromptLayer::Feature,
        PromptLayer::Agent,
    ];

    /// Wire name of the layer.
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptLayer::System => "system",
            PromptLayer::Tenant => "tenant",
            PromptLayer::Feature => "feature",
            PromptLayer::Agent => "agent",
        }
    }
}

/// How content from multiple layers combines at a merge point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeBehavior {
    /// Lower-layer content first, then higher layers.
    Append,
    /// Higher-layer content first.
    Prepend,
    /// Highest layer wins.
    Replace,
    /// Highest layer wins; position fixed by the marker.
    Inject,
}

/// A named merge point declared by a prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergePointDefinition {
    pub name: String,
    pub behavior: MergeBehavior,
    /// Layers above the defining one may not contribute content.
    #[serde(default)]
    pub locked: bool,
    /// At least one layer must contribute content.
    #[serde(default)]
    pub required: bool,
}

impl MergePointDefinition {
    pub fn new(name: impl Into<String>, behavior: MergeBehavior) -> Self {
        Self {
            name: name.into(),
            behavior,
            locked: false,
            required: false,
        }
    }

    pub fn locked(mut self) -> Self {
        self.locked = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// A versioned prompt template within a layer and scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prompt {
    pub id: String,
    pub layer: PromptLayer,
    /// Scope within the layer: "default" for system, tenant id, feature id,
    /// or agent id.
    pub scope_id: String,
    pub name: String,
    /// Template text. In the system layer this is the base template with
    /// `{{ merge_point("name") }}` markers; in higher layers a marker opens
    /// a section whose text is contributed to that merge point.
    pub content: String,
    #[serde(default)]
    pub merge_points: Vec<MergePointDefinition>,
    #[serde(default)]
    pub variables_schema: Option<Value>,
    #[serde(default)]
    pub tenant_id: Option<String>,
    /// Strictly increasing within (layer, scope, tenant).
    pub version: u32,
}

impl Prompt {
    pub fn new(
        layer: PromptLayer,
        scope_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            layer,
            scope_id: scope_id.into(),
            name: name.into(),
            content: content.into(),
            merge_points: Vec::new(),
            variables_schema: None,
            tenant_id: None,
            version: 1,
        }
    }

    pub fn with_merge_points(mut self, merge_points: Vec<MergePointDefinition>) -> Self {
        self.merge_points = merge_points;
        self
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }
}

/// The rendered result of a composition run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposedPrompt {
    /// Final rendered text.
    pub content: String,
    /// Version of each layer that participated.
    pub layer_versions: HashMap<String, u32>,
    /// How long composition took.
    pub composition_time_ms: f64,
    /// Cache key the result was stored under, when caching was on.
    pub cache_key: Option<String>,
    /// When the composition ran.
    pub composed_at: DateTime<Utc>,
}
