//! Intent Router
//!
//! Maps raw task text to a capability id using an ordered table of keyword
//! predicates. Lower rank is evaluated first; ties keep declaration order.
//! The first matching predicate wins, otherwise the default capability is
//! returned. Routing never fails.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use tracing::debug;

/// A keyword with optional guard terms that disable it.
/// Guards always match whole words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keyword {
    pub term: String,
    pub unless: Vec<String>,
    /// Term only matches as a whole word ("ram" but not "program")
    pub whole_word: bool,
}

impl Keyword {
    pub fn new(term: &str) -> Self {
        Self {
            term: term.to_lowercase(),
            unless: Vec::new(),
            whole_word: false,
        }
    }

    /// Keyword only counts when none of `guards` appear in the text
    pub fn unless(term: &str, guards: &[&str]) -> Self {
        Self {
            unless: guards.iter().map(|g| g.to_lowercase()).collect(),
            ..Self::new(term)
        }
    }

    /// Require word boundaries around the term
    pub fn word(mut self) -> Self {
        self.whole_word = true;
        self
    }

    fn matches(&self, lower: &str) -> bool {
        let hit = if self.whole_word {
            contains_word(lower, &self.term)
        } else {
            lower.contains(&self.term)
        };
        hit && !self.unless.iter().any(|g| contains_word(lower, g))
    }
}

fn contains_word(text: &str, word: &str) -> bool {
    if word.is_empty() {
        return false;
    }
    text.match_indices(word).any(|(i, _)| {
        let before = text[..i].chars().next_back();
        let after = text[i + word.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

/// One row of the routing table
#[derive(Debug, Clone)]
pub struct IntentPredicate {
    pub rank: u32,
    pub capability_id: String,
    pub keywords: Vec<Keyword>,
    /// Whether tasks routed here may run the reasoning chain
    pub reasoning: bool,
}

impl IntentPredicate {
    pub fn new(rank: u32, capability_id: &str, keywords: Vec<Keyword>) -> Self {
        Self {
            rank,
            capability_id: capability_id.to_string(),
            keywords,
            reasoning: false,
        }
    }

    pub fn with_terms(rank: u32, capability_id: &str, terms: &[&str]) -> Self {
        Self::new(rank, capability_id, terms.iter().map(|t| Keyword::new(t)).collect())
    }

    pub fn reasoning(mut self) -> Self {
        self.reasoning = true;
        self
    }

    fn first_match(&self, lower: &str) -> Option<&Keyword> {
        self.keywords.iter().find(|k| k.matches(lower))
    }
}

/// Ordered routing table plus the fallback capability
#[derive(Debug, Clone)]
pub struct PredicateTable {
    rows: Vec<IntentPredicate>,
    default_id: String,
}

impl PredicateTable {
    pub fn new(mut rows: Vec<IntentPredicate>, default_id: &str) -> Self {
        // Stable: equal ranks keep declaration order
        rows.sort_by_key(|r| r.rank);
        Self {
            rows,
            default_id: default_id.to_string(),
        }
    }

    pub fn default_id(&self) -> &str {
        &self.default_id
    }

    pub fn rows(&self) -> &[IntentPredicate] {
        &self.rows
    }

    /// Capability ids referenced by the table, default included
    pub fn capability_ids(&self) -> HashSet<String> {
        let mut ids: HashSet<String> = self.rows.iter().map(|r| r.capability_id.clone()).collect();
        ids.insert(self.default_id.clone());
        ids
    }

    /// Precedence tuned so memory/deduction intents beat generic search,
    /// and hardware queries only win when nothing else matched.
    pub fn standard(default_id: &str) -> Self {
        Self::new(
            vec![
                IntentPredicate::new(
                    10,
                    "memory",
                    vec![
                        Keyword::new("based on"),
                        Keyword::new("remember"),
                        Keyword::new("recall"),
                        Keyword::new("previous"),
                        Keyword::new("learn from"),
                        Keyword::unless("memory", &["ram"]),
                    ],
                ),
                IntentPredicate::new(
                    20,
                    "deepsearch",
                    vec![
                        Keyword::unless("search", &["memory"]),
                        Keyword::unless("find", &["memory"]),
                        Keyword::unless("research", &["memory"]),
                    ],
                ),
                IntentPredicate::with_terms(30, "app_launcher", &["open ", "launch ", "start "]),
                IntentPredicate::with_terms(35, "vision", &["screenshot", "screen", "look at"]),
                IntentPredicate::with_terms(36, "voice", &["transcribe", "listen", "audio"]),
                IntentPredicate::with_terms(40, "code", &["code", "function", "script"]),
                IntentPredicate::new(
                    50,
                    "system_monitor",
                    vec![
                        Keyword::new("cpu"),
                        Keyword::new("gpu"),
                        Keyword::new("temperature"),
                        Keyword::unless("ram", &["memory"]).word(),
                    ],
                ),
            ],
            default_id,
        )
    }
}

/// How much reasoning a task needs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Complex,
}

/// Routing decision with explanation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteResult {
    pub capability_id: String,
    pub reasoning: String,
    pub complexity: Complexity,
    /// Whether the chosen capability may run the reasoning chain
    pub chain_eligible: bool,
}

impl RouteResult {
    pub fn needs_chain(&self) -> bool {
        self.chain_eligible && self.complexity == Complexity::Complex
    }
}

static COMPLEX_KEYWORDS: &[&str] = &[
    "why", "root", "fundamental", "underlying", "architecture", "design",
    "strategy", "deep", "thorough", "analyze", "analyse", "understand",
    "explain how", "framework", "principle", "complex",
];

const COMPLEX_WORD_COUNT: usize = 40;

static EXPLICIT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)@([a-z0-9_\-]+)\b").expect("valid regex"));

/// Keyword-table router
#[derive(Debug, Clone)]
pub struct IntentRouter {
    table: PredicateTable,
    known: HashSet<String>,
}

impl IntentRouter {
    /// Router over `table`; `@id` overrides are accepted for ids in the table
    pub fn new(table: PredicateTable) -> Self {
        let known = table.capability_ids();
        Self { table, known }
    }

    /// Accept `@id` overrides for additional registered ids
    pub fn with_known_capabilities(mut self, ids: impl IntoIterator<Item = String>) -> Self {
        self.known.extend(ids);
        self
    }

    pub fn default_id(&self) -> &str {
        self.table.default_id()
    }

    /// Capability id for `text`
    pub fn route(&self, text: &str) -> String {
        self.resolve(text).capability_id
    }

    /// Full routing decision for `text`
    pub fn resolve(&self, text: &str) -> RouteResult {
        let lower = text.to_lowercase();
        let complexity = Self::classify(text);

        // 1. Explicit @capability
        if let Some(id) = self.check_explicit(text) {
            let chain_eligible = self.is_reasoning_target(&id);
            return RouteResult {
                reasoning: format!("Explicit @{}", id),
                capability_id: id,
                complexity,
                chain_eligible,
            };
        }

        // 2. Ordered predicates
        for row in self.table.rows() {
            if let Some(keyword) = row.first_match(&lower) {
                debug!(capability = %row.capability_id, keyword = %keyword.term, "Predicate matched");
                return RouteResult {
                    capability_id: row.capability_id.clone(),
                    reasoning: format!("Keyword '{}' (rank {})", keyword.term.trim(), row.rank),
                    complexity,
                    chain_eligible: row.reasoning,
                };
            }
        }

        // 3. Default
        RouteResult {
            capability_id: self.table.default_id().to_string(),
            reasoning: "No predicate matched".to_string(),
            complexity,
            chain_eligible: true,
        }
    }

    /// Deep-reasoning keywords or long input make a task complex
    pub fn classify(text: &str) -> Complexity {
        let lower = text.to_lowercase();
        if text.split_whitespace().count() > COMPLEX_WORD_COUNT
            || COMPLEX_KEYWORDS.iter().any(|kw| lower.contains(kw))
        {
            Complexity::Complex
        } else {
            Complexity::Simple
        }
    }

    fn check_explicit(&self, text: &str) -> Option<String> {
        EXPLICIT_PATTERN
            .captures_iter(text)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().to_lowercase())
            .find(|id| self.known.contains(id))
    }

    fn is_reasoning_target(&self, id: &str) -> bool {
        id == self.table.default_id()
            || self
                .table
                .rows()
                .iter()
                .any(|r| r.capability_id == id && r.reasoning)
    }
}

impl Default for IntentRouter {
    fn default() -> Self {
        Self::new(PredicateTable::standard("cortex"))
    }
}
