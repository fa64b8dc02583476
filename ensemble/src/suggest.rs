//! Question-to-preset suggestions.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

static WORD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[a-zA-Z]+").expect("valid regex"));

/// Weight of a keyword found verbatim in the question.
pub const EXACT_MATCH_WEIGHT: f64 = 2.0;
/// Weight of a keyword matched only through a question token.
pub const TOKEN_MATCH_WEIGHT: f64 = 1.0;
pub const TAG_BONUS: f64 = 0.3;
pub const DESCRIPTION_BONUS: f64 = 0.1;
/// Shortest description token that earns a bonus.
pub const MIN_DESCRIPTION_TOKEN: usize = 4;
pub const MAX_REASONS: usize = 3;

pub const NO_MATCH_EMPTY: &str = "empty question";
pub const NO_MATCH_NO_TOKENS: &str = "no meaningful tokens";
pub const NO_MATCH_NO_PRESET: &str = "no preset matched";

const STOP_WORDS: &[&str] = &[
    "a", "about", "after", "all", "am", "an", "and", "any", "are", "as", "at", "be", "been",
    "before", "being", "but", "by", "can", "could", "did", "do", "does", "doing", "for", "from",
    "had", "has", "have", "having", "he", "her", "here", "him", "his", "how", "i", "if", "in",
    "into", "is", "it", "its", "just", "me", "more", "most", "my", "no", "not", "of", "on", "or",
    "our", "out", "over", "she", "so", "some", "such", "than", "that", "the", "their", "them",
    "then", "there", "these", "they", "this", "those", "to", "too", "under", "up", "very", "was",
    "we", "were", "what", "when", "where", "which", "while", "who", "why", "will", "with",
    "would", "you", "your",
];

pub fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.binary_search(&word).is_ok()
}

/// Lower-cased alphabetic words of at least two letters, minus stop words.
pub fn tokenize_question(text: &str) -> BTreeSet<String> {
    WORD_RE
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .filter(|w| w.len() >= 2 && !is_stop_word(w))
        .collect()
}

/// A named bundle of modes for a class of questions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub name: String,
    pub description: String,
    pub modes: Vec<String>,
    pub keywords: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Preset {
    fn from_static(
        name: &str,
        description: &str,
        modes: &[&str],
        keywords: &[&str],
        tags: &[&str],
    ) -> Self {
        let owned = |items: &[&str]| -> Vec<String> { items.iter().map(|s| s.to_string()).collect() };
        Self {
            name: name.to_string(),
            description: description.to_string(),
            modes: owned(modes),
            keywords: owned(keywords),
            tags: owned(tags),
        }
    }
}

/// The built-in preset list, in tie-break order.
pub fn builtin_presets() -> Vec<Preset> {
    vec![
        Preset::from_static(
            "debugging",
            "Diagnose a failure or unexpected behavior",
            &["abductive", "causal", "deductive"],
            &["bug", "crash", "error", "fail", "debug", "broken", "root cause", "regression", "panic"],
            &["incident", "diagnosis"],
        ),
        Preset::from_static(
            "architecture",
            "Evaluate system structure and design tradeoffs",
            &["systems-thinking", "engineering-design", "decision-theoretic", "counterfactual"],
            &["architecture", "design", "refactor", "structure", "module", "coupling", "layering"],
            &["system", "boundaries"],
        ),
        Preset::from_static(
            "security",
            "Find abuse paths and harden defenses",
            &["adversarial", "game-theoretic", "deductive"],
            &["security", "vulnerability", "attack", "auth", "exploit", "injection", "permission"],
            &["threat", "abuse"],
        ),
        Preset::from_static(
            "performance",
            "Explain slowness and resource pressure",
            &["causal", "systems-dynamics", "bayesian"],
            &["slow", "performance", "latency", "throughput", "memory", "cpu", "bottleneck"],
            &["profiling", "scaling"],
        ),
        Preset::from_static(
            "decision",
            "Choose between competing options",
            &["decision-theoretic", "dialectical", "counterfactual", "bayesian"],
            &["should", "choose", "option", "decide", "versus", "alternative", "tradeoff"],
            &["comparison"],
        ),
        Preset::from_static(
            "risk",
            "Estimate what could go wrong and how badly",
            &["probabilistic-risk", "bayesian", "adversarial", "modal"],
            &["risk", "failure", "outage", "reliability", "incident", "safe"],
            &["resilience"],
        ),
        Preset::from_static(
            "planning",
            "Turn a goal into ordered steps",
            &["means-end", "temporal", "meta-reasoning"],
            &["plan", "roadmap", "migrate", "migration", "schedule", "steps", "implement"],
            &["timeline", "milestone"],
        ),
        Preset::from_static(
            "review",
            "Critique existing code or documents",
            &["engineering-design", "debiasing", "socratic"],
            &["review", "quality", "readability", "maintainability", "code smell", "tests"],
            &["feedback"],
        ),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub preset: String,
    pub description: String,
    pub modes: Vec<String>,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestionResult {
    pub question: String,
    pub suggestions: Vec<Suggestion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_pick: Option<Suggestion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_match_reason: Option<String>,
}

impl SuggestionResult {
    fn no_match(question: &str, reason: &str) -> Self {
        Self {
            question: question.to_string(),
            suggestions: Vec::new(),
            top_pick: None,
            no_match_reason: Some(reason.to_string()),
        }
    }
}

/// Ranks presets against a question.
#[derive(Debug, Clone)]
pub struct SuggestionEngine {
    presets: Vec<Preset>,
}

impl Default for SuggestionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SuggestionEngine {
    pub fn new() -> Self {
        Self::with_presets(builtin_presets())
    }

    pub fn with_presets(presets: Vec<Preset>) -> Self {
        Self { presets }
    }

    pub fn presets(&self) -> &[Preset] {
        &self.presets
    }

    pub fn preset(&self, name: &str) -> Option<&Preset> {
        self.presets.iter().find(|p| p.name.eq_ignore_ascii_case(name.trim()))
    }

    pub fn suggest(&self, question: &str) -> SuggestionResult {
        let trimmed = question.trim();
        if trimmed.is_empty() {
            return SuggestionResult::no_match(question, NO_MATCH_EMPTY);
        }
        let tokens = tokenize_question(trimmed);
        if tokens.is_empty() {
            return SuggestionResult::no_match(question, NO_MATCH_NO_TOKENS);
        }
        let lowered = trimmed.to_lowercase();

        let mut scored: Vec<(usize, Suggestion)> = self
            .presets
            .iter()
            .enumerate()
            .filter_map(|(i, preset)| score_preset(preset, &lowered, &tokens).map(|s| (i, s)))
            .collect();
        scored.sort_by(|(ia, a), (ib, b)| b.score.total_cmp(&a.score).then(ia.cmp(ib)));

        let suggestions: Vec<Suggestion> = scored.into_iter().map(|(_, s)| s).collect();
        debug!(
            tokens = tokens.len(),
            matches = suggestions.len(),
            top = suggestions.first().map(|s| s.preset.as_str()).unwrap_or(""),
            "Suggested presets"
        );

        if suggestions.is_empty() {
            return SuggestionResult::no_match(question, NO_MATCH_NO_PRESET);
        }
        SuggestionResult {
            question: question.to_string(),
            top_pick: suggestions.first().cloned(),
            suggestions,
            no_match_reason: None,
        }
    }
}

fn score_preset(preset: &Preset, lowered: &str, tokens: &BTreeSet<String>) -> Option<Suggestion> {
    let mut reasons = Vec::new();
    let mut note = |reason: String| {
        if reasons.len() < MAX_REASONS && !reasons.contains(&reason) {
            reasons.push(reason);
        }
    };

    let mut keyword_score = 0.0;
    for keyword in &preset.keywords {
        let keyword = keyword.to_lowercase();
        if lowered.contains(&keyword) {
            keyword_score += EXACT_MATCH_WEIGHT;
            note(format!("mentions \"{}\"", keyword));
        } else if tokenize_question(&keyword).iter().any(|t| tokens.contains(t)) {
            keyword_score += TOKEN_MATCH_WEIGHT;
            note(format!("related to \"{}\"", keyword));
        }
    }
    let mut score = if preset.keywords.is_empty() {
        0.0
    } else {
        keyword_score / preset.keywords.len() as f64
    };

    let tags: BTreeSet<String> = preset.tags.iter().flat_map(|t| tokenize_question(t)).collect();
    for tag in tags.iter().filter(|t| tokens.contains(*t)) {
        score += TAG_BONUS;
        note(format!("tagged {}", tag));
    }

    let described: BTreeSet<String> = tokenize_question(&preset.description)
        .into_iter()
        .filter(|t| t.len() >= MIN_DESCRIPTION_TOKEN)
        .collect();
    score += described.iter().filter(|t| tokens.contains(*t)).count() as f64 * DESCRIPTION_BONUS;

    (score > 0.0).then(|| Suggestion {
        preset: preset.name.clone(),
        description: preset.description.clone(),
        modes: preset.modes.clone(),
        score,
        reasons,
    })
}
