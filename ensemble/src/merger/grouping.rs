//! Display-oriented sub-grouping of merged items.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{MergedFinding, MergedRecommendation, MergedRisk};
use crate::schema::ImpactLevel;
use crate::similarity::{jaccard, normalize};

/// Stricter similarity used when collapsing findings that cite the same evidence.
pub const EVIDENCE_GROUP_THRESHOLD: f64 = 0.8;

/// Heuristic action category of a recommendation.
///
/// The keyword table is closed and matched in declaration order; the first
/// matching category wins. Editing it changes grouping output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionType {
    AddTest,
    Refactor,
    Document,
    Fix,
    AddFeature,
    Remove,
    Update,
    Monitor,
    Security,
    Optimize,
    Other,
}

const ACTION_PATTERNS: &[(ActionType, &[&str])] = &[
    (
        ActionType::AddTest,
        &[
            "add test",
            "add a test",
            "write test",
            "unit test",
            "integration test",
            "regression test",
            "test coverage",
        ],
    ),
    (
        ActionType::Refactor,
        &["refactor", "restructure", "extract", "simplify", "reorganize", "decouple"],
    ),
    (
        ActionType::Document,
        &["document", "docs", "comment", "readme", "changelog"],
    ),
    (
        ActionType::Fix,
        &["fix", "repair", "resolve", "correct", "patch"],
    ),
    (
        ActionType::AddFeature,
        &["add", "implement", "introduce", "support", "create", "build"],
    ),
    (
        ActionType::Remove,
        &["remove", "delete", "drop", "deprecate", "eliminate"],
    ),
    (
        ActionType::Update,
        &["update", "upgrade", "bump", "migrate", "modify", "change"],
    ),
    (
        ActionType::Monitor,
        &["monitor", "alert", "observe", "track", "metric", "dashboard", "log", "logging"],
    ),
    (
        ActionType::Security,
        &[
            "security",
            "sanitize",
            "authenticate",
            "authorize",
            "encrypt",
            "vulnerability",
            "vulnerable",
            "secret",
        ],
    ),
    (
        ActionType::Optimize,
        &["optimize", "optimise", "performance", "cache", "speed up", "latency", "faster"],
    ),
];

impl ActionType {
    /// Classify recommendation text by the first matching pattern.
    ///
    /// Patterns match whole words plus a few inflections, so `test` matches
    /// `tests` but `add` does not match `address`.
    pub fn classify(text: &str) -> Self {
        let padded = word_padded(text);
        for (action, patterns) in ACTION_PATTERNS {
            if patterns.iter().any(|p| contains_word(&padded, p)) {
                return *action;
            }
        }
        Self::Other
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::AddTest => "add-test",
            Self::Refactor => "refactor",
            Self::Document => "document",
            Self::Fix => "fix",
            Self::AddFeature => "add-feature",
            Self::Remove => "remove",
            Self::Update => "update",
            Self::Monitor => "monitor",
            Self::Security => "security",
            Self::Optimize => "optimize",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const INFLECTIONS: &[&str] = &["", "s", "es", "ed", "ing", "ation", "ations"];

/// Whether `phrase` (or an inflection of its last word) occurs in `padded`.
pub(crate) fn contains_word(padded: &str, phrase: &str) -> bool {
    INFLECTIONS
        .iter()
        .any(|suffix| padded.contains(&format!(" {}{} ", phrase, suffix)))
}

/// Lowercase words separated by single spaces, padded on both sides.
pub(crate) fn word_padded(text: &str) -> String {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    let mut out = String::with_capacity(cleaned.len() + 2);
    for word in cleaned.split_whitespace() {
        out.push(' ');
        out.push_str(word);
    }
    out.push(' ');
    out
}

/// Findings that cite the same evidence pointer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceGroup {
    pub evidence_pointer: String,
    pub findings: Vec<MergedFinding>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationGroup {
    pub action_type: ActionType,
    pub recommendations: Vec<MergedRecommendation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskGroup {
    pub severity: ImpactLevel,
    pub risks: Vec<MergedRisk>,
}

/// Group findings by normalized evidence pointer, collapsing members whose
/// text similarity reaches [`EVIDENCE_GROUP_THRESHOLD`]. Findings without a
/// pointer are not grouped. Groups are ordered by pointer.
pub fn group_by_evidence(findings: &[MergedFinding]) -> Vec<EvidenceGroup> {
    let mut by_pointer: BTreeMap<String, Vec<MergedFinding>> = BTreeMap::new();

    for merged in findings {
        let Some(pointer) = merged.finding.evidence_pointer.as_deref() else {
            continue;
        };
        let key = normalize(pointer);
        if key.is_empty() {
            continue;
        }
        let members = by_pointer.entry(key).or_default();

        match members
            .iter_mut()
            .find(|m| jaccard(&m.finding.text, &merged.finding.text) >= EVIDENCE_GROUP_THRESHOLD)
        {
            Some(existing) => {
                for mode in &merged.source_modes {
                    if !existing.source_modes.contains(mode) {
                        existing.source_modes.push(mode.clone());
                    }
                }
                existing.source_modes.sort();
                existing.merge_score = existing.merge_score.max(merged.merge_score);
            }
            None => members.push(merged.clone()),
        }
    }

    by_pointer
        .into_iter()
        .map(|(evidence_pointer, findings)| EvidenceGroup {
            evidence_pointer,
            findings,
        })
        .collect()
}

/// Group recommendations by [`ActionType`], in action-type order.
pub fn group_by_action(recommendations: &[MergedRecommendation]) -> Vec<RecommendationGroup> {
    let mut by_action: BTreeMap<ActionType, Vec<MergedRecommendation>> = BTreeMap::new();
    for rec in recommendations {
        by_action
            .entry(ActionType::classify(&rec.recommendation.text))
            .or_default()
            .push(rec.clone());
    }
    by_action
        .into_iter()
        .map(|(action_type, recommendations)| RecommendationGroup {
            action_type,
            recommendations,
        })
        .collect()
}

/// Group risks by impact, most severe first.
pub fn group_by_severity(risks: &[MergedRisk]) -> Vec<RiskGroup> {
    let mut by_severity: BTreeMap<ImpactLevel, Vec<MergedRisk>> = BTreeMap::new();
    for risk in risks {
        by_severity
            .entry(risk.risk.impact)
            .or_default()
            .push(risk.clone());
    }
    by_severity
        .into_iter()
        .map(|(severity, risks)| RiskGroup { severity, risks })
        .collect()
}
