//! Merge-point processing across prompt layers.
//!
//! The system prompt is the base template; its `{{ merge_point("name") }}`
//! markers are splice points. In a higher-layer prompt, the same marker
//! opens a section: the text that follows it (up to the next marker or the
//! end of the prompt) is that layer's contribution to the point. Behaviors
//! decide how contributions from several layers combine; `locked` and
//! `required` constraints are validated before any splicing happens.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use super::models::{MergeBehavior, MergePointDefinition, Prompt, PromptLayer};
use crate::errors::{PlatformError, Result};

static MERGE_POINT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\{\{\s*merge_point\(\s*["']([^"']+)["']\s*\)\s*\}\}"#)
        .expect("invalid merge point regex")
});

/// The reserved merge point that receives sanitized user input.
pub const USER_INPUT_POINT: &str = "user_input";

/// Combines prompts from hierarchical layers at defined merge points.
#[derive(Debug, Default)]
pub struct MergeProcessor;

impl MergeProcessor {
    pub fn new() -> Self {
        Self
    }

    /// Merge the layer prompts into a single template string.
    pub fn merge(
        &self,
        layer_prompts: &HashMap<PromptLayer, Option<Prompt>>,
        user_input: Option<&str>,
    ) -> Result<String> {
        let system_prompt = layer_prompts
            .get(&PromptLayer::System)
            .and_then(|prompt| prompt.as_ref())
            .ok_or_else(|| PlatformError::PromptValidation {
                message: "system prompt is required as base template".into(),
            })?;

        let definitions = collect_definitions(layer_prompts);
        let contributions = collect_contributions(layer_prompts);
        validate_constraints(&definitions, &contributions, layer_prompts)?;

        let mut result = system_prompt.content.clone();
        for name in find_merge_points(&result) {
            let content = if name == USER_INPUT_POINT {
                user_input.unwrap_or("").to_string()
            } else {
                match definitions.get(&name) {
                    Some(definition) => apply_behavior(
                        definition.behavior,
                        contributions.get(&name).unwrap_or(&HashMap::new()),
                    ),
                    // Unknown markers erase to nothing.
                    None => String::new(),
                }
            };
            result = replace_merge_point(&result, &name, &content);
        }

        Ok(clean(&result))
    }
}

/// Definitions across layers; once a locked definition is recorded, higher
/// layers cannot redefine it.
fn collect_definitions(
    layer_prompts: &HashMap<PromptLayer, Option<Prompt>>,
) -> HashMap<String, MergePointDefinition> {
    let mut definitions: HashMap<String, MergePointDefinition> = HashMap::new();
    for layer in PromptLayer::PRIORITY {
        let Some(Some(prompt)) = layer_prompts.get(&layer) else {
            continue;
        };
        for point in &prompt.merge_points {
            if let Some(existing) = definitions.get(&point.name) {
                if existing.locked {
                    continue;
                }
            }
            definitions.insert(point.name.clone(), point.clone());
        }
    }
    definitions
}

/// Contributions per merge point per layer. The system layer never
/// contributes: its markers are splice points, not sections.
fn collect_contributions(
    layer_prompts: &HashMap<PromptLayer, Option<Prompt>>,
) -> HashMap<String, HashMap<PromptLayer, String>> {
    let mut contributions: HashMap<String, HashMap<PromptLayer, String>> = HashMap::new();
    for layer in PromptLayer::PRIORITY {
        if layer == PromptLayer::System {
            continue;
        }
        let Some(Some(prompt)) = layer_prompts.get(&layer) else {
            continue;
        };
        for (name, content) in extract_sections(&prompt.content) {
            let content = content.trim();
            if content.is_empty() {
                continue;
            }
            // A prompt may carry several sections for the same point (a
            // merged feature prompt does); they concatenate in order.
            let by_layer = contributions.entry(name).or_default();
            match by_layer.get_mut(&layer) {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(content);
                }
                None => {
                    by_layer.insert(layer, content.to_string());
                }
            }
        }
    }
    contributions
}

/// Split a prompt's content into (merge point name, section text) pairs: a
/// marker opens a section running to the next marker or end of text.
fn extract_sections(content: &str) -> Vec<(String, String)> {
    let mut sections = Vec::new();
    let markers: Vec<(usize, usize, String)> = MERGE_POINT_RE
        .captures_iter(content)
        .map(|caps| {
            let whole = caps.get(0).expect("match exists");
            (whole.start(), whole.end(), caps[1].to_string())
        })
        .collect();

    for (index, (_, end, name)) in markers.iter().enumerate() {
        let section_end = markers
            .get(index + 1)
            .map(|(next_start, _, _)| *next_start)
            .unwrap_or(content.len());
        sections.push((name.clone(), content[*end..section_end].to_string()));
    }
    sections
}

fn validate_constraints(
    definitions: &HashMap<String, MergePointDefinition>,
    contributions: &HashMap<String, HashMap<PromptLayer, String>>,
    layer_prompts: &HashMap<PromptLayer, Option<Prompt>>,
) -> Result<()> {
    for (name, definition) in definitions {
        if definition.required {
            let has_content = contributions
                .get(name)
                .map(|by_layer| by_layer.values().any(|c| !c.trim().is_empty()))
                .unwrap_or(false);
            if !has_content {
                return Err(PlatformError::PromptValidation {
                    message: format!("required merge point '{}' has no content", name),
                });
            }
        }

        if definition.locked {
            // The lowest layer declaring the point as locked owns it.
            let defining_layer = PromptLayer::PRIORITY.iter().copied().find(|layer| {
                layer_prompts
                    .get(layer)
                    .and_then(|prompt| prompt.as_ref())
                    .map(|prompt| {
                        prompt
                            .merge_points
                            .iter()
                            .any(|point| point.name == *name && point.locked)
                    })
                    .unwrap_or(false)
            });

            if let Some(owner) = defining_layer {
                if let Some(by_layer) = contributions.get(name) {
                    for (layer, content) in by_layer {
                        if *layer > owner && !content.trim().is_empty() {
                            return Err(PlatformError::MergePointConflict {
                                merge_point: name.clone(),
                                message: format!(
                                    "locked at {} layer and cannot be overridden by {}",
                                    owner.as_str(),
                                    layer.as_str()
                                ),
                            });
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

fn apply_behavior(
    behavior: MergeBehavior,
    contributions: &HashMap<PromptLayer, String>,
) -> String {
    if contributions.is_empty() {
        return String::new();
    }

    let ordered: Vec<&String> = PromptLayer::PRIORITY
        .iter()
        .filter_map(|layer| contributions.get(layer))
        .collect();

    match behavior {
        MergeBehavior::Replace | MergeBehavior::Inject => {
            (*ordered.last().expect("non-empty contributions")).clone()
        }
        MergeBehavior::Append => ordered
            .iter()
            .map(|part| part.trim())
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
        MergeBehavior::Prepend => ordered
            .iter()
            .rev()
            .map(|part| part.trim())
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

/// Merge point names in order of first appearance.
fn find_merge_points(template: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut names = Vec::new();
    for caps in MERGE_POINT_RE.captures_iter(template) {
        let name = caps[1].to_string();
        if seen.insert(name.clone()) {
            names.push(name);
        }
    }
    names
}

fn replace_merge_point(template: &str, name: &str, content: &str) -> String {
    let pattern = Regex::new(&format!(
        r#"\{{\{{\s*merge_point\(\s*["']{}["']\s*\)\s*\}}\}}"#,
        regex::escape(name)
    ))
    .expect("escaped merge point regex is valid");
    pattern.replace_all(template, content).into_owned()
}

/// Drop leftover markers, collapse blank-line runs, trim line ends, and
/// strip leading/trailing empty lines.
fn clean(template: &str) -> String {
    static BLANK_RUN_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"\n{3,}").expect("invalid blank-run regex"));

    let without_markers = MERGE_POINT_RE.replace_all(template, "");
    let collapsed = BLANK_RUN_RE.replace_all(&without_markers, "\n\n");

    let lines: Vec<&str> = collapsed.lines().map(|line| line.trim_end()).collect();
    let start = lines
        .iter()
        .position(|line| !line.trim().is_empty())
        .unwrap_or(0);
    let end = lines
        .iter()
        .rposition(|line| !line.trim().is_empty())
        .map(|index| index + 1)
        .unwrap_or(0);
    lines[start..end].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompts::models::MergePointDefinition;

    fn layers(
        system: Prompt,
        others: Vec<(PromptLayer, Prompt)>,
    ) -> HashMap<PromptLayer, Option<Prompt>> {
        let mut map: HashMap<PromptLayer, Option<Prompt>> = HashMap::new();
        map.insert(PromptLayer::System, Some(system));
        for layer in [PromptLayer::Tenant, PromptLayer::Feature, PromptLayer::Agent] {
            map.insert(layer, None);
        }
        for (layer, prompt) in others {
            map.insert(layer, Some(prompt));
        }
        map
    }

    fn system_with(content: &str, points: Vec<MergePointDefinition>) -> Prompt {
        Prompt::new(PromptLayer::System, "default", "base", content).with_merge_points(points)
    }

    #[test]
    fn test_basic_splice_from_agent_layer() {
        let system = system_with(
            "Base rules.\n{{ merge_point(\"custom\") }}\nEnd.",
            vec![MergePointDefinition::new("custom", MergeBehavior::Append)],
        );
        let agent = Prompt::new(
            PromptLayer::Agent,
            "agent-1",
            "agent",
            "{{ merge_point(\"custom\") }}\nAgent logic",
        );

        let merged = MergeProcessor::new()
            .merge(&layers(system, vec![(PromptLayer::Agent, agent)]), None)
            .unwrap();
        assert_eq!(merged, "Base rules.\nAgent logic\nEnd.");
    }

    #[test]
    fn test_append_orders_lower_layer_first() {
        let system = system_with(
            "{{ merge_point(\"rules\") }}",
            vec![MergePointDefinition::new("rules", MergeBehavior::Append)],
        );
        let tenant = Prompt::new(
            PromptLayer::Tenant,
            "tenant-a",
            "tenant",
            "{{ merge_point(\"rules\") }}\ntenant rule",
        );
        let agent = Prompt::new(
            PromptLayer::Agent,
            "agent-1",
            "agent",
            "{{ merge_point(\"rules\") }}\nagent rule",
        );

        let merged = MergeProcessor::new()
            .merge(
                &layers(
                    system,
                    vec![(PromptLayer::Tenant, tenant), (PromptLayer::Agent, agent)],
                ),
                None,
            )
            .unwrap();
        assert_eq!(merged, "tenant rule\nagent rule");
    }

    #[test]
    fn test_prepend_reverses_order() {
        let system = system_with(
            "{{ merge_point(\"rules\") }}",
            vec![MergePointDefinition::new("rules", MergeBehavior::Prepend)],
        );
        let tenant = Prompt::new(
            PromptLayer::Tenant,
            "tenant-a",
            "tenant",
            "{{ merge_point(\"rules\") }}\ntenant rule",
        );
        let agent = Prompt::new(
            PromptLayer::Agent,
            "agent-1",
            "agent",
            "{{ merge_point(\"rules\") }}\nagent rule",
        );

        let merged = MergeProcessor::new()
            .merge(
                &layers(
                    system,
                    vec![(PromptLayer::Tenant, tenant), (PromptLayer::Agent, agent)],
                ),
                None,
            )
            .unwrap();
        assert_eq!(merged, "agent rule\ntenant rule");
    }

    #[test]
    fn test_replace_takes_highest_layer() {
        let system = system_with(
            "{{ merge_point(\"rules\") }}",
            vec![MergePointDefinition::new("rules", MergeBehavior::Replace)],
        );
        let tenant = Prompt::new(
            PromptLayer::Tenant,
            "tenant-a",
            "tenant",
            "{{ merge_point(\"rules\") }}\ntenant rule",
        );
        let agent = Prompt::new(
            PromptLayer::Agent,
            "agent-1",
            "agent",
            "{{ merge_point(\"rules\") }}\nagent rule",
        );

        let merged = MergeProcessor::new()
            .merge(
                &layers(
                    system,
                    vec![(PromptLayer::Tenant, tenant), (PromptLayer::Agent, agent)],
                ),
                None,
            )
            .unwrap();
        assert_eq!(merged, "agent rule");
    }

    #[test]
    fn test_user_input_point_is_reserved() {
        let system = system_with("Question: {{ merge_point(\"user_input\") }}", vec![]);
        let merged = MergeProcessor::new()
            .merge(&layers(system, vec![]), Some("What is AI?"))
            .unwrap();
        assert_eq!(merged, "Question: What is AI?");
    }

    #[test]
    fn test_unknown_marker_erased() {
        let system = system_with("Before {{ merge_point(\"mystery\") }} after", vec![]);
        let merged = MergeProcessor::new().merge(&layers(system, vec![]), None).unwrap();
        assert_eq!(merged, "Before  after");
    }

    #[test]
    fn test_locked_point_rejects_higher_layer() {
        let system = system_with(
            "{{ merge_point(\"safety\") }}",
            vec![MergePointDefinition::new("safety", MergeBehavior::Replace).locked()],
        );
        let agent = Prompt::new(
            PromptLayer::Agent,
            "agent-1",
            "agent",
            "{{ merge_point(\"safety\") }}\noverride attempt",
        );

        let err = MergeProcessor::new()
            .merge(&layers(system, vec![(PromptLayer::Agent, agent)]), None)
            .unwrap_err();
        assert_eq!(err.code(), "merge_point_conflict");
    }

    #[test]
    fn test_required_point_without_content_fails() {
        let system = system_with(
            "{{ merge_point(\"mission\") }}",
            vec![MergePointDefinition::new("mission", MergeBehavior::Append).required()],
        );

        let err = MergeProcessor::new()
            .merge(&layers(system, vec![]), None)
            .unwrap_err();
        assert_eq!(err.code(), "prompt_validation_error");
    }

    #[test]
    fn test_multiple_sections_in_one_prompt() {
        let system = system_with(
            "A: {{ merge_point(\"alpha\") }}\nB: {{ merge_point(\"beta\") }}",
            vec![
                MergePointDefinition::new("alpha", MergeBehavior::Append),
                MergePointDefinition::new("beta", MergeBehavior::Append),
            ],
        );
        let agent = Prompt::new(
            PromptLayer::Agent,
            "agent-1",
            "agent",
            "{{ merge_point(\"alpha\") }}\nfirst\n{{ merge_point(\"beta\") }}\nsecond",
        );

        let merged = MergeProcessor::new()
            .merge(&layers(system, vec![(PromptLayer::Agent, agent)]), None)
            .unwrap();
        assert_eq!(merged, "A: first\nB: second");
    }

    #[test]
    fn test_blank_line_runs_collapsed() {
        let system = system_with("Top\n\n\n\n{{ merge_point(\"gone\") }}\n\n\nBottom", vec![]);
        let merged = MergeProcessor::new().merge(&layers(system, vec![]), None).unwrap();
        assert!(!merged.contains("\n\n\n"));
        assert!(merged.starts_with("Top"));
        assert!(merged.ends_with("Bottom"));
    }
}
