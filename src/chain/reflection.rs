//! Reflection & chaining rules
//!
//! Thoughts end with a JSON self-evaluation block. Parsing it, deciding
//! whether to continue, and distilling a pattern all happen in memory;
//! the only I/O in a chain iteration is generating the thought itself.
//! When the block is missing or malformed a keyword heuristic stands in.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use super::types::{ChainDecision, ChainState, Layer, Reflection};
use crate::memory::Pattern;

/// Principles prepended to every thought prompt
pub const CONSTITUTION: &str = r#"You are a root-seeking reasoning kernel. Find the fundamental truth beneath the task.

LAYERS:
1. SURFACE: what is immediately visible (features, symptoms, lists)
2. MIDDLE: what patterns are operating (use cases, relationships)
3. ROOT: what is irreducibly true (principles, structures, flows)

RULES:
- Never stay at the surface.
- Features are clues, not answers. Listing options means the root is not found yet.
- A root is transferable: if it only works here, it is not the root.
- Descend until nothing reduces further."#;

/// Self-evaluation instructions appended to every thought prompt
pub const SELF_EVALUATION: &str = r#"After your answer, evaluate it and end with ONE JSON object on its own line:
{"layer": "surface|middle|root", "isComplete": true|false, "confidence": 0.0-1.0, "nextStep": "what to examine next if not complete", "foundRoot": "the root truth, or null", "patternName": "short name for a transferable pattern, or null", "abstractStructure": "domain-agnostic form of the root, or null", "potentialDomains": ["other domains it applies to"]}"#;

const PREVIOUS_THOUGHT_CHARS: usize = 800;

/// Prompt for one thought
pub fn thought_prompt(task: &str, focus: &str, previous: Option<(Layer, &str)>) -> String {
    let mut prompt = format!("{}\n\nTASK: {}\n", CONSTITUTION, task);

    if let Some((layer, text)) = previous {
        prompt.push_str(&format!(
            "\nPREVIOUS THOUGHT ({} layer):\n{}\n",
            layer.as_str(),
            truncate(text, PREVIOUS_THOUGHT_CHARS)
        ));
    }
    if focus != task {
        prompt.push_str(&format!("\nFOCUS NOW: {}\n", focus));
    }

    prompt.push('\n');
    prompt.push_str(SELF_EVALUATION);
    prompt
}

/// Pattern fields a thought may volunteer alongside its evaluation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatternHint {
    pub name: Option<String>,
    pub abstract_structure: Option<String>,
    pub potential_domains: Vec<String>,
}

/// A thought split into its answer body and its evaluation
#[derive(Debug, Clone)]
pub struct Evaluated {
    pub body: String,
    pub reflection: Reflection,
    pub hint: PatternHint,
    /// Evaluation came from the JSON block, not the heuristic
    pub structured: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SelfEvaluation {
    #[serde(default, deserialize_with = "lenient_string")]
    layer: Option<String>,
    #[serde(default, deserialize_with = "lenient_bool")]
    is_complete: Option<bool>,
    #[serde(default, deserialize_with = "lenient_f64")]
    confidence: Option<f64>,
    #[serde(default, deserialize_with = "lenient_string")]
    next_step: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    found_root: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pattern_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    abstract_structure: Option<String>,
    #[serde(default, deserialize_with = "lenient_list")]
    potential_domains: Vec<String>,
}

// Models quote numbers and booleans, or write null for lists. A mistyped
// field degrades to "absent" instead of rejecting the whole evaluation.

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    })
}

fn lenient_bool<'de, D: Deserializer<'de>>(d: D) -> Result<Option<bool>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Bool(b) => Some(b),
        Value::Number(n) => n.as_f64().map(|v| v != 0.0),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    })
}

fn lenient_f64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse().ok(),
        _ => None,
    })
}

fn lenient_list<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect(),
        Value::String(s) => s.split(',').map(str::to_string).collect(),
        _ => Vec::new(),
    })
}

/// Classify and reflect on a raw thought
pub fn reflect(thought: &str) -> Evaluated {
    if let Some((start, eval)) = find_evaluation(thought) {
        if let Some(layer) = eval.layer.as_deref().and_then(Layer::parse) {
            let body = thought[..start].trim();
            let body = if body.is_empty() { thought.trim() } else { body };

            return Evaluated {
                body: body.to_string(),
                reflection: Reflection {
                    layer,
                    is_complete: eval.is_complete.unwrap_or(false),
                    confidence: normalize_confidence(eval.confidence.unwrap_or(0.0)),
                    next_step: eval.next_step.unwrap_or_default(),
                    found_root: non_empty(eval.found_root),
                },
                hint: PatternHint {
                    name: non_empty(eval.pattern_name),
                    abstract_structure: non_empty(eval.abstract_structure),
                    potential_domains: eval
                        .potential_domains
                        .into_iter()
                        .map(|d| d.trim().to_lowercase())
                        .filter(|d| !d.is_empty())
                        .collect(),
                },
                structured: true,
            };
        }
    }

    heuristic(thought)
}

/// Chaining rules applied after reflection
pub fn decide(reflection: &Reflection, state: &ChainState, iteration: u32, threshold: f64) -> ChainDecision {
    if reflection.meets_completion(threshold) {
        return ChainDecision::stop("Root found with sufficient confidence");
    }
    if iteration >= state.max_iterations {
        return ChainDecision::stop("Iteration budget exhausted");
    }

    let reason = match reflection.layer {
        Layer::Surface => "Surface layer, descend deeper",
        Layer::Middle if reflection.confidence < threshold => "Middle layer below confidence threshold",
        Layer::Middle => "Middle layer, root not reached",
        Layer::Root if reflection.found_root.is_none() => "Root layer but no root truth named",
        Layer::Root => "Root layer below confidence threshold",
    };

    let next = if reflection.next_step.trim().is_empty() {
        format!(
            "Descend below the {} layer of \"{}\" to its underlying structure",
            reflection.layer.as_str(),
            truncate(&state.task_text, 200)
        )
    } else {
        reflection.next_step.clone()
    };

    ChainDecision::proceed(reason, next)
}

/// Distill a pattern from a completed chain
pub fn extract_pattern(state: &ChainState, hint: &PatternHint) -> Option<Pattern> {
    if !state.complete {
        return None;
    }
    let root = state.root_found.as_deref()?;

    let name = hint
        .name
        .clone()
        .unwrap_or_else(|| truncate(root, 60).to_string());
    let structure = hint.abstract_structure.as_deref().unwrap_or(root);
    let source = derive_domain(&state.task_text);

    Some(
        Pattern::new(&name, &source, structure, state.confidence)
            .with_domains(hint.potential_domains.iter().filter(|d| **d != source).cloned()),
    )
}

static DOMAIN_KEYWORDS: &[(&str, &[&str])] = &[
    ("software", &["code", "program", "software", "bug", "api", "database", "compile", "rust", "python"]),
    ("cooking", &["cook", "bake", "baking", "recipe", "bread", "sourdough", "kitchen", "food"]),
    ("music", &["music", "song", "melody", "chord", "rhythm", "band"]),
    ("business", &["business", "market", "startup", "customer", "sales", "pricing", "revenue"]),
    ("health", &["health", "sleep", "diet", "exercise", "medical", "stress"]),
    ("design", &["design", "interface", "layout", "ux", "typography", "theme"]),
    ("learning", &["learn", "study", "teach", "education", "school"]),
    ("science", &["physics", "chemistry", "biology", "experiment", "energy"]),
    ("finance", &["money", "invest", "budget", "finance", "stock", "debt"]),
    ("relationships", &["friend", "family", "relationship", "team", "communication"]),
];

/// Domain label for a task, "general" when nothing matches
pub fn derive_domain(task: &str) -> String {
    let lower = task.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    DOMAIN_KEYWORDS
        .iter()
        .find(|(_, terms)| {
            terms
                .iter()
                .any(|t| words.iter().any(|w| w.starts_with(t)))
        })
        .map(|(domain, _)| domain.to_string())
        .unwrap_or_else(|| "general".to_string())
}

static ROOT_MARKERS: &[&str] = &[
    "root cause", "fundamental", "irreducible", "underlying principle", "at its core",
    "the root", "first principle",
];

static MIDDLE_MARKERS: &[&str] = &[
    "pattern", "because", "relationship", "tends to", "mechanism", "this means", "therefore",
];

/// Keyword classification when no evaluation block was given
fn heuristic(thought: &str) -> Evaluated {
    let body = thought.trim();
    let lower = body.to_lowercase();
    let list_items = body
        .lines()
        .filter(|l| {
            let l = l.trim_start();
            l.starts_with("- ") || l.starts_with("* ") || l.starts_with("• ")
                || l.split_once(". ").is_some_and(|(n, _)| n.chars().all(|c| c.is_ascii_digit()) && !n.is_empty())
        })
        .count();

    let (layer, confidence) = if ROOT_MARKERS.iter().any(|m| lower.contains(m)) {
        (Layer::Root, 0.6)
    } else if list_items >= 3 || body.split_whitespace().count() < 20 {
        (Layer::Surface, 0.3)
    } else if MIDDLE_MARKERS.iter().any(|m| lower.contains(m)) {
        (Layer::Middle, 0.5)
    } else {
        (Layer::Surface, 0.4)
    };

    Evaluated {
        body: body.to_string(),
        reflection: Reflection {
            layer,
            is_complete: false,
            confidence,
            next_step: String::new(),
            found_root: None,
        },
        hint: PatternHint::default(),
        structured: false,
    }
}

/// Last balanced JSON object in `s` that parses as an evaluation
fn find_evaluation(s: &str) -> Option<(usize, SelfEvaluation)> {
    s.match_indices('{')
        .map(|(i, _)| i)
        .rev()
        .filter_map(|start| {
            let json = extract_json(&s[start..])?;
            let eval: SelfEvaluation = serde_json::from_str(json).ok()?;
            eval.layer.as_ref()?;
            Some((start, eval))
        })
        .next()
}

/// Extract the balanced JSON object starting at the first `{`
fn extract_json(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let mut depth = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in s[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }

    None
}

/// Percent-style values (e.g. 85) are scaled down; result is clamped to [0, 1]
fn normalize_confidence(raw: f64) -> f64 {
    if !raw.is_finite() {
        return 0.0;
    }
    let scaled = if raw > 1.0 && raw <= 100.0 { raw / 100.0 } else { raw };
    scaled.clamp(0.0, 1.0)
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("null"))
}

/// Truncate on a char boundary
fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
