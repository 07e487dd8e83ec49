//! Reasoning chain state types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::memory::Pattern;

/// Epistemic depth of a thought
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    /// Visible features, symptoms, lists
    #[default]
    Surface,
    /// Patterns, use cases, relationships
    Middle,
    /// Irreducible structural truth
    Root,
}

impl Layer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Surface => "surface",
            Self::Middle => "middle",
            Self::Root => "root",
        }
    }

    /// Lenient parse: accepts "ROOT", "Layer 3 - root", etc.
    pub fn parse(s: &str) -> Option<Self> {
        let lower = s.to_lowercase();
        if lower.contains("root") {
            Some(Self::Root)
        } else if lower.contains("middle") {
            Some(Self::Middle)
        } else if lower.contains("surface") {
            Some(Self::Surface)
        } else {
            None
        }
    }
}

/// Self-evaluation of one thought
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reflection {
    pub layer: Layer,
    pub is_complete: bool,
    pub confidence: f64,
    pub next_step: String,
    pub found_root: Option<String>,
}

impl Reflection {
    /// Root layer, confidence at or above `threshold`, and a root truth named
    pub fn meets_completion(&self, threshold: f64) -> bool {
        self.layer == Layer::Root
            && self.confidence >= threshold
            && self.found_root.as_deref().is_some_and(|r| !r.trim().is_empty())
    }
}

/// Whether to run another iteration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainDecision {
    pub continue_chaining: bool,
    pub reason: String,
    pub next_prompt: Option<String>,
}

impl ChainDecision {
    pub fn stop(reason: impl Into<String>) -> Self {
        Self {
            continue_chaining: false,
            reason: reason.into(),
            next_prompt: None,
        }
    }

    pub fn proceed(reason: impl Into<String>, next_prompt: impl Into<String>) -> Self {
        Self {
            continue_chaining: true,
            reason: reason.into(),
            next_prompt: Some(next_prompt.into()),
        }
    }
}

/// One iteration's record
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThoughtStep {
    pub iteration: u32,
    pub thought_text: String,
    pub layer: Layer,
    pub reflection: Reflection,
    pub chain_decision: ChainDecision,
    /// Capability that produced the thought
    pub capability_id: String,
    /// No thought was produced this iteration
    pub failed: bool,
    pub timestamp: DateTime<Utc>,
}

/// Working memory of one chain run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainState {
    pub task_text: String,
    pub iteration: u32,
    pub max_iterations: u32,
    pub history: Vec<ThoughtStep>,
    pub current_layer: Layer,
    pub confidence: f64,
    pub root_found: Option<String>,
    pub complete: bool,
}

impl ChainState {
    pub fn new(task_text: &str, max_iterations: u32) -> Self {
        Self {
            task_text: task_text.to_string(),
            iteration: 0,
            max_iterations: max_iterations.max(1),
            history: Vec::new(),
            current_layer: Layer::Surface,
            confidence: 0.0,
            root_found: None,
            complete: false,
        }
    }

    pub fn has_budget(&self) -> bool {
        self.iteration < self.max_iterations
    }

    /// Append a step and fold it into the running state
    pub(crate) fn record(&mut self, step: ThoughtStep, threshold: f64) {
        self.iteration = step.iteration.min(self.max_iterations);
        self.confidence = step.reflection.confidence.clamp(0.0, 1.0);
        if !step.failed {
            self.current_layer = step.layer;
            if step.reflection.found_root.is_some() {
                self.root_found = step.reflection.found_root.clone();
            }
        }
        self.complete = !step.failed && step.reflection.meets_completion(threshold);
        self.history.push(step);
    }

    /// Last iteration that produced a thought
    pub fn best_effort(&self) -> Option<&ThoughtStep> {
        self.history.iter().rev().find(|s| !s.failed)
    }
}

/// Chain thresholds and capability wiring
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub max_iterations: u32,
    pub confidence_threshold: f64,
    /// Capability asked for thoughts
    pub reasoning_capability: String,
    /// Tried once in the same iteration when the reasoning capability fails
    pub fallback_capability: Option<String>,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            confidence_threshold: 0.8,
            reasoning_capability: "cortex".to_string(),
            fallback_capability: None,
        }
    }
}

impl ChainConfig {
    pub fn with_max_iterations(mut self, n: u32) -> Self {
        self.max_iterations = n.max(1);
        self
    }

    pub fn with_confidence_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn with_reasoning_capability(mut self, id: &str) -> Self {
        self.reasoning_capability = id.to_string();
        self
    }

    pub fn with_fallback(mut self, id: &str) -> Self {
        self.fallback_capability = Some(id.to_string());
        self
    }
}

/// Result of a chain run
#[derive(Debug, Clone)]
pub struct ChainOutcome {
    pub state: ChainState,
    /// Pattern extracted on completion
    pub pattern: Option<Pattern>,
    pub cancelled: bool,
}

impl ChainOutcome {
    pub fn iterations(&self) -> u32 {
        self.state.iteration
    }

    pub fn complete(&self) -> bool {
        self.state.complete
    }

    /// Best-effort answer: the last thought actually produced
    pub fn output(&self) -> Option<&str> {
        self.state.best_effort().map(|s| s.thought_text.as_str())
    }

    /// Capability behind the best-effort answer
    pub fn worker(&self) -> Option<&str> {
        self.state.best_effort().map(|s| s.capability_id.as_str())
    }
}
