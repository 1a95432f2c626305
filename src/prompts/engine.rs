//! Composition engine: the orchestrated pipeline from layered prompts to a
//! rendered, cached result.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use super::cache::PromptCache;
use super::keys::generate_cache_key;
use super::merge::MergeProcessor;
use super::models::{ComposedPrompt, Prompt, PromptLayer};
use super::renderer::TemplateRenderer;
use super::repository::PromptRepository;
use super::safety::sanitize_user_input;
use crate::errors::{PlatformError, Result};

/// Platform identity injected into every variable context.
const PLATFORM_NAME: &str = "agentmesh";
const PLATFORM_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Inputs to one composition run.
#[derive(Debug, Clone, Default)]
pub struct CompositionRequest {
    pub agent_id: String,
    pub tenant_id: Option<String>,
    pub feature_ids: Vec<String>,
    pub user_input: Option<String>,
    pub variables: Map<String, Value>,
    pub skip_cache: bool,
}

impl CompositionRequest {
    pub fn for_agent(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            ..Self::default()
        }
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_features(mut self, feature_ids: Vec<String>) -> Self {
        self.feature_ids = feature_ids;
        self
    }

    pub fn with_user_input(mut self, user_input: impl Into<String>) -> Self {
        self.user_input = Some(user_input.into());
        self
    }

    pub fn with_variables(mut self, variables: Map<String, Value>) -> Self {
        self.variables = variables;
        self
    }

    pub fn skip_cache(mut self) -> Self {
        self.skip_cache = true;
        self
    }
}

/// Orchestrates load → merge → render → cache.
pub struct CompositionEngine {
    repository: Arc<dyn PromptRepository>,
    cache: Option<Arc<PromptCache>>,
    merge: MergeProcessor,
    renderer: TemplateRenderer,
}

impl CompositionEngine {
    pub fn new(repository: Arc<dyn PromptRepository>) -> Self {
        Self {
            repository,
            cache: None,
            merge: MergeProcessor::new(),
            renderer: TemplateRenderer::new(),
        }
    }

    /// Builder: enable the composed-prompt cache.
    pub fn with_cache(mut self, cache: Arc<PromptCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Compose a prompt for the request.
    pub fn compose(&self, request: &CompositionRequest) -> Result<ComposedPrompt> {
        let started = Instant::now();

        let sanitized_input = request
            .user_input
            .as_deref()
            .map(sanitize_user_input);

        let layer_prompts = self.load_layer_prompts(request)?;
        let version_ids = extract_version_ids(&layer_prompts);

        let cache_key = if !request.skip_cache && self.cache.is_some() {
            Some(generate_cache_key(
                request.tenant_id.as_deref(),
                &request.agent_id,
                &version_ids,
                &request.variables,
            ))
        } else {
            None
        };

        if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
            if let Some(cached) = cache.get(key) {
                debug!(key = %key, "composed prompt cache hit");
                return Ok(cached);
            }
        }

        debug!(
            agent_id = %request.agent_id,
            tenant_id = request.tenant_id.as_deref().unwrap_or("default"),
            features = request.feature_ids.len(),
            "composing prompt"
        );

        let merged = self
            .merge
            .merge(&layer_prompts, sanitized_input.as_deref())?;
        let variables = build_variable_context(request);
        let rendered = self.renderer.render(&merged, &variables)?;

        let composed = ComposedPrompt {
            content: rendered,
            layer_versions: extract_layer_versions(&layer_prompts),
            composition_time_ms: started.elapsed().as_secs_f64() * 1000.0,
            cache_key: cache_key.clone(),
            composed_at: Utc::now(),
        };

        if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
            cache.set(key, &composed);
        }

        info!(
            agent_id = %request.agent_id,
            composition_time_ms = composed.composition_time_ms,
            "composition completed"
        );
        Ok(composed)
    }

    /// Invalidate every cached composition for a tenant.
    pub fn invalidate_tenant(&self, tenant_id: &str) {
        if let Some(cache) = &self.cache {
            cache.invalidate_pattern(&format!("tenant:{}:*", tenant_id));
        }
    }

    fn load_layer_prompts(
        &self,
        request: &CompositionRequest,
    ) -> Result<HashMap<PromptLayer, Option<Prompt>>> {
        let tenant = request.tenant_id.as_deref();
        let mut layers: HashMap<PromptLayer, Option<Prompt>> = HashMap::new();

        let system = self
            .repository
            .get_by_layer(PromptLayer::System, "default", None)?
            .ok_or_else(|| PlatformError::PromptNotFound {
                reference: "system:default".into(),
            })?;
        layers.insert(PromptLayer::System, Some(system));

        let tenant_prompt = match tenant {
            Some(tenant_id) => {
                self.repository
                    .get_by_layer(PromptLayer::Tenant, tenant_id, tenant)?
            }
            None => None,
        };
        layers.insert(PromptLayer::Tenant, tenant_prompt);

        let mut feature_prompts = Vec::new();
        for feature_id in &request.feature_ids {
            if let Some(prompt) =
                self.repository
                    .get_by_layer(PromptLayer::Feature, feature_id, tenant)?
            {
                feature_prompts.push(prompt);
            }
        }
        layers.insert(PromptLayer::Feature, merge_feature_prompts(feature_prompts));

        let agent = self
            .repository
            .get_by_layer(PromptLayer::Agent, &request.agent_id, tenant)?
            .ok_or_else(|| PlatformError::PromptNotFound {
                reference: format!("agent:{}", request.agent_id),
            })?;
        layers.insert(PromptLayer::Agent, Some(agent));

        Ok(layers)
    }
}

/// Combine multiple feature prompts by content concatenation. The first
/// prompt's merge points win; later definitions are dropped.
fn merge_feature_prompts(mut prompts: Vec<Prompt>) -> Option<Prompt> {
    match prompts.len() {
        0 => None,
        1 => prompts.pop(),
        _ => {
            let base = prompts[0].clone();
            let scope_ids: Vec<&str> = prompts.iter().map(|p| p.scope_id.as_str()).collect();
            let content: Vec<&str> = prompts.iter().map(|p| p.content.as_str()).collect();
            // The composite id carries every member's id and version so the
            // cache key changes when any merged feature is bumped.
            let composite_id: Vec<String> = prompts
                .iter()
                .map(|p| format!("{}:v{}", p.id, p.version))
                .collect();

            let mut merged = base;
            merged.id = composite_id.join("+");
            merged.scope_id = format!("merged:{}", scope_ids.join("-"));
            merged.content = content.join("\n\n");
            merged.version = 1;
            Some(merged)
        }
    }
}

fn build_variable_context(request: &CompositionRequest) -> Map<String, Value> {
    let mut context = Map::new();
    context.insert(
        "system".to_string(),
        json!({
            "platform_name": PLATFORM_NAME,
            "platform_version": PLATFORM_VERSION,
        }),
    );
    context.insert(
        "tenant".to_string(),
        json!({"id": request.tenant_id.as_deref().unwrap_or("default")}),
    );
    context.insert("agent".to_string(), json!({"id": request.agent_id}));

    // User-provided variables land at top level and may shadow nothing:
    // the namespaced keys above are reserved.
    for (key, value) in &request.variables {
        if !matches!(key.as_str(), "system" | "tenant" | "agent") {
            context.insert(key.clone(), value.clone());
        }
    }
    context
}

fn extract_version_ids(
    layers: &HashMap<PromptLayer, Option<Prompt>>,
) -> BTreeMap<String, String> {
    layers
        .iter()
        .filter_map(|(layer, prompt)| {
            prompt.as_ref().map(|p| {
                (
                    layer.as_str().to_string(),
                    format!("{}:v{}", p.id, p.version),
                )
            })
        })
        .collect()
}

fn extract_layer_versions(
    layers: &HashMap<PromptLayer, Option<Prompt>>,
) -> HashMap<String, u32> {
    layers
        .iter()
        .filter_map(|(layer, prompt)| {
            prompt
                .as_ref()
                .map(|p| (layer.as_str().to_string(), p.version))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompts::models::{MergeBehavior, MergePointDefinition};
    use crate::prompts::repository::InMemoryPromptRepository;

    fn seeded_repository() -> Arc<InMemoryPromptRepository> {
        let repo = Arc::new(InMemoryPromptRepository::new());
        repo.save(
            Prompt::new(
                PromptLayer::System,
                "default",
                "base",
                "You are on {{ system.platform_name }}.\n\
                 {{ merge_point(\"instructions\") }}\n\
                 Task: {{ merge_point(\"user_input\") }}",
            )
            .with_merge_points(vec![MergePointDefinition::new(
                "instructions",
                MergeBehavior::Append,
            )]),
        )
        .unwrap();
        repo.save(Prompt::new(
            PromptLayer::Agent,
            "agent-1",
            "agent",
            "{{ merge_point(\"instructions\") }}\nBe concise for {{ tenant.id }}.",
        ))
        .unwrap();
        repo
    }

    fn engine(repo: Arc<InMemoryPromptRepository>) -> CompositionEngine {
        CompositionEngine::new(repo).with_cache(Arc::new(PromptCache::new()))
    }

    #[test]
    fn test_full_pipeline() {
        let engine = engine(seeded_repository());
        let request = CompositionRequest::for_agent("agent-1")
            .with_tenant("tenant-a")
            .with_user_input("What is AI?");

        let composed = engine.compose(&request).unwrap();
        assert!(composed.content.contains("You are on agentmesh."));
        assert!(composed.content.contains("Be concise for tenant-a."));
        assert!(composed.content.contains("Task: What is AI?"));
        assert_eq!(composed.layer_versions["system"], 1);
        assert_eq!(composed.layer_versions["agent"], 1);
        assert!(composed.cache_key.is_some());
    }

    #[test]
    fn test_missing_required_layers() {
        let repo = Arc::new(InMemoryPromptRepository::new());
        let engine = CompositionEngine::new(repo.clone());

        let err = engine
            .compose(&CompositionRequest::for_agent("agent-1"))
            .unwrap_err();
        assert_eq!(err.code(), "prompt_not_found");
        assert!(err.to_string().contains("system:default"));

        repo.save(Prompt::new(PromptLayer::System, "default", "base", "hello"))
            .unwrap();
        let err = engine
            .compose(&CompositionRequest::for_agent("agent-1"))
            .unwrap_err();
        assert!(err.to_string().contains("agent:agent-1"));
    }

    #[test]
    fn test_composition_is_deterministic() {
        let engine = engine(seeded_repository());
        let request = CompositionRequest::for_agent("agent-1").with_user_input("same input");

        let first = engine.compose(&request).unwrap();
        let second = engine.compose(&request).unwrap();
        assert_eq!(first.content, second.content);
    }

    #[test]
    fn test_cache_hit_and_version_bump_miss() {
        let repo = seeded_repository();
        let engine = engine(repo.clone());
        let request = CompositionRequest::for_agent("agent-1");

        let first = engine.compose(&request).unwrap();
        let second = engine.compose(&request).unwrap();
        // Served from cache: identical composition timestamp.
        assert_eq!(first.composed_at, second.composed_at);

        // A version bump changes the key, forcing recomposition.
        repo.save(
            Prompt::new(
                PromptLayer::Agent,
                "agent-1",
                "agent",
                "{{ merge_point(\"instructions\") }}\nNew behavior.",
            )
            .with_version(2),
        )
        .unwrap();
        let third = engine.compose(&request).unwrap();
        assert!(third.content.contains("New behavior."));
        assert_ne!(third.cache_key, first.cache_key);
    }

    #[test]
    fn test_skip_cache_recomposes() {
        let engine = engine(seeded_repository());
        let request = CompositionRequest::for_agent("agent-1").skip_cache();
        let composed = engine.compose(&request).unwrap();
        assert!(composed.cache_key.is_none());
    }

    #[test]
    fn test_empty_feature_list_equals_missing_features() {
        let engine = engine(seeded_repository());
        let without = engine
            .compose(&CompositionRequest::for_agent("agent-1"))
            .unwrap();
        let empty = engine
            .compose(&CompositionRequest::for_agent("agent-1").with_features(vec![]))
            .unwrap();
        assert_eq!(without.content, empty.content);
    }

    #[test]
    fn test_feature_merge_keeps_first_merge_points() {
        let repo = seeded_repository();
        repo.save(
            Prompt::new(
                PromptLayer::Feature,
                "feat-a",
                "a",
                "{{ merge_point(\"instructions\") }}\nfeature A rules",
            )
            .with_merge_points(vec![MergePointDefinition::new(
                "instructions",
                MergeBehavior::Append,
            )]),
        )
        .unwrap();
        repo.save(
            Prompt::new(
                PromptLayer::Feature,
                "feat-b",
                "b",
                "{{ merge_point(\"instructions\") }}\nfeature B rules",
            )
            .with_merge_points(vec![MergePointDefinition::new(
                "instructions",
                MergeBehavior::Replace,
            )]),
        )
        .unwrap();

        let engine = engine(repo);
        let composed = engine
            .compose(
                &CompositionRequest::for_agent("agent-1")
                    .with_features(vec!["feat-a".into(), "feat-b".into()]),
            )
            .unwrap();

        // Content concatenates; the first feature's merge points govern,
        // so behavior stays append and both contributions surface.
        assert!(composed.content.contains("feature A rules"));
        assert!(composed.content.contains("feature B rules"));
    }

    #[test]
    fn test_tenant_invalidation() {
        let repo = seeded_repository();
        let cache = Arc::new(PromptCache::new());
        let engine = CompositionEngine::new(repo).with_cache(cache.clone());
        let request = CompositionRequest::for_agent("agent-1").with_tenant("tenant-a");

        let composed = engine.compose(&request).unwrap();
        let key = composed.cache_key.clone().unwrap();
        assert!(cache.get(&key).is_some());

        engine.invalidate_tenant("tenant-a");
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn test_variables_flow_through() {
        let repo = Arc::new(InMemoryPromptRepository::new());
        repo.save(Prompt::new(
            PromptLayer::System,
            "default",
            "base",
            "Context: {{ context }} unknown: [{{ missing_var }}]",
        ))
        .unwrap();
        repo.save(Prompt::new(PromptLayer::Agent, "agent-1", "agent", "agent text"))
            .unwrap();

        let engine = CompositionEngine::new(repo);
        let mut variables = Map::new();
        variables.insert("context".into(), json!("general"));
        let composed = engine
            .compose(&CompositionRequest::for_agent("agent-1").with_variables(variables))
            .unwrap();
        assert!(composed.content.contains("Context: general"));
        assert!(composed.content.contains("unknown: []"));
    }
}
