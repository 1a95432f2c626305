//! Template rendering with namespaced variables.
//!
//! Rendering goes through tera. Unknown variables resolve to empty strings
//! rather than erroring: referenced paths missing from the context are
//! pre-seeded with empty values before the render.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use tera::{Context, Tera};

use crate::errors::{PlatformError, Result};

static VARIABLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*)\s*\}\}")
        .expect("invalid variable regex")
});

/// Renders merged templates against a variable context.
#[derive(Debug, Default)]
pub struct TemplateRenderer;

impl TemplateRenderer {
    pub fn new() -> Self {
        Self
    }

    /// Substitute `{{ var.path }}` references in `template` from `variables`.
    pub fn render(&self, template: &str, variables: &Map<String, Value>) -> Result<String> {
        let mut seeded = variables.clone();
        for caps in VARIABLE_RE.captures_iter(template) {
            ensure_path(&mut seeded, &caps[1]);
        }

        let context = Context::from_value(Value::Object(seeded)).map_err(|error| {
            PlatformError::PromptRender {
                message: format!("variable context is invalid: {}", error),
            }
        })?;

        Tera::one_off(template, &context, false).map_err(|error| PlatformError::PromptRender {
            message: format!("template render failed: {}", error),
        })
    }
}

/// Make sure a dotted path exists in the map, creating empty-string leaves
/// and intermediate objects as needed. Existing values are never touched.
fn ensure_path(map: &mut Map<String, Value>, path: &str) {
    let mut segments = path.split('.').peekable();
    let mut current = map;
    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            current
                .entry(segment.to_string())
                .or_insert_with(|| Value::String(String::new()));
            return;
        }
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        match entry {
            Value::Object(nested) => current = nested,
            // A non-object in the middle of the path: leave it alone; tera
            // will render the reference as empty via the leaf default.
            _ => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn variables(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_render_simple_and_nested() {
        let renderer = TemplateRenderer::new();
        let rendered = renderer
            .render(
                "Platform {{ system.platform_name }} for {{ query }}",
                &variables(json!({
                    "system": {"platform_name": "agentmesh"},
                    "query": "testing",
                })),
            )
            .unwrap();
        assert_eq!(rendered, "Platform agentmesh for testing");
    }

    #[test]
    fn test_unknown_variables_render_empty() {
        let renderer = TemplateRenderer::new();
        let rendered = renderer
            .render("Known {{ present }} unknown [{{ absent.deeply.nested }}]", &variables(json!({"present": "yes"})))
            .unwrap();
        assert_eq!(rendered, "Known yes unknown []");
    }

    #[test]
    fn test_existing_namespace_gains_missing_leaf() {
        let renderer = TemplateRenderer::new();
        let rendered = renderer
            .render(
                "{{ tenant.id }}/{{ tenant.missing }}",
                &variables(json!({"tenant": {"id": "t-1"}})),
            )
            .unwrap();
        assert_eq!(rendered, "t-1/");
    }

    #[test]
    fn test_render_error_surfaces() {
        let renderer = TemplateRenderer::new();
        let err = renderer
            .render("{% invalid syntax %}", &Map::new())
            .unwrap_err();
        assert_eq!(err.code(), "prompt_render_error");
    }

    #[test]
    fn test_deterministic_output() {
        let renderer = TemplateRenderer::new();
        let vars = variables(json!({"a": "1", "b": {"c": "2"}}));
        let first = renderer.render("{{ a }}-{{ b.c }}", &vars).unwrap();
        let second = renderer.render("{{ a }}-{{ b.c }}", &vars).unwrap();
        assert_eq!(first, second);
    }
}
