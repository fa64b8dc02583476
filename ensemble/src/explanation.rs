//! Explanation layer: why each synthesized conclusion exists and how each
//! conflict was resolved.
//!
//! A disabled tracker accepts every write and records nothing, so callers
//! never need to branch on whether explanations were requested.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::similarity::short_hash;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionMethod {
    Consensus,
    Majority,
    Weighted,
    Deferred,
    Manual,
}

/// Keyword table consulted in order; the first hit wins.
const METHOD_KEYWORDS: &[(ResolutionMethod, &[&str])] = &[
    (ResolutionMethod::Consensus, &["consensus", "unanimous", "all modes agree"]),
    (ResolutionMethod::Majority, &["majority", "vote", "most modes"]),
    (ResolutionMethod::Weighted, &["weighted", "weight", "confidence-weighted"]),
    (ResolutionMethod::Deferred, &["defer", "user review", "escalat", "unresolved"]),
];

impl ResolutionMethod {
    /// Infer the method from a free-text resolution path. Unknown text is
    /// treated as a manual resolution.
    pub fn infer(path: &str) -> Self {
        let lower = path.to_lowercase();
        METHOD_KEYWORDS
            .iter()
            .find(|(_, words)| words.iter().any(|w| lower.contains(w)))
            .map(|(method, _)| *method)
            .unwrap_or(Self::Manual)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Consensus => "consensus",
            Self::Majority => "majority",
            Self::Weighted => "weighted",
            Self::Deferred => "deferred",
            Self::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConclusionKind {
    Thesis,
    Finding,
    Risk,
    Recommendation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConclusionExplanation {
    pub conclusion: String,
    pub kind: ConclusionKind,
    pub source_findings: Vec<String>,
    pub contributing_modes: Vec<String>,
    pub confidence_basis: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supporting_evidence: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub counter_evidence: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictPosition {
    pub mode_id: String,
    pub position: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictResolution {
    pub conflict_id: String,
    pub topic: String,
    pub positions: Vec<ConflictPosition>,
    pub resolution: String,
    pub method: ResolutionMethod,
    pub resolution_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExplanationSummary {
    pub total_conclusions: usize,
    pub multi_mode_conclusions: usize,
    pub total_conflicts: usize,
    pub methods: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplanationLayer {
    pub conclusions: Vec<ConclusionExplanation>,
    pub conflicts: Vec<ConflictResolution>,
    pub summary: ExplanationSummary,
    pub generated_at: DateTime<Utc>,
}

/// Deterministic 16-hex id over `topic | sorted(mode_id:position)`.
pub fn conflict_id(topic: &str, positions: &[ConflictPosition]) -> String {
    let mut parts: Vec<String> = positions
        .iter()
        .map(|p| format!("{}:{}", p.mode_id, p.position))
        .collect();
    parts.sort();
    let material = format!("{}|{}", topic, parts.join("|"));
    short_hash(material.as_bytes())
}

/// Human-readable basis for a conclusion backed by `modes`.
pub fn confidence_basis(modes: &[String]) -> String {
    match modes {
        [] => "no contributing modes".to_string(),
        [only] => format!("single mode ({})", only),
        many => format!("confirmed by {} modes", many.len()),
    }
}

#[derive(Debug, Clone)]
pub struct ExplanationTracker {
    enabled: bool,
    conclusions: Vec<ConclusionExplanation>,
    conflicts: Vec<ConflictResolution>,
}

impl Default for ExplanationTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ExplanationTracker {
    pub fn new() -> Self {
        Self {
            enabled: true,
            conclusions: Vec::new(),
            conflicts: Vec::new(),
        }
    }

    /// A tracker whose writers do nothing.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn record_conclusion(&mut self, explanation: ConclusionExplanation) {
        if self.enabled {
            self.conclusions.push(explanation);
        }
    }

    /// Record a resolved conflict; the method is inferred from `path`.
    /// Returns the conflict id, or `None` when disabled.
    pub fn record_conflict_resolution(
        &mut self,
        topic: &str,
        positions: Vec<ConflictPosition>,
        resolution: &str,
        path: &str,
    ) -> Option<String> {
        if !self.enabled {
            return None;
        }
        let id = conflict_id(topic, &positions);
        self.conflicts.push(ConflictResolution {
            conflict_id: id.clone(),
            topic: topic.to_string(),
            positions,
            resolution: resolution.to_string(),
            method: ResolutionMethod::infer(path),
            resolution_path: path.to_string(),
        });
        Some(id)
    }

    pub fn generate_layer(&self) -> ExplanationLayer {
        let mut methods = BTreeMap::new();
        for conflict in &self.conflicts {
            *methods.entry(conflict.method.as_str().to_string()).or_insert(0) += 1;
        }
        ExplanationLayer {
            summary: ExplanationSummary {
                total_conclusions: self.conclusions.len(),
                multi_mode_conclusions: self
                    .conclusions
                    .iter()
                    .filter(|c| c.contributing_modes.len() > 1)
                    .count(),
                total_conflicts: self.conflicts.len(),
                methods,
            },
            conclusions: self.conclusions.clone(),
            conflicts: self.conflicts.clone(),
            generated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(mode: &str, text: &str) -> ConflictPosition {
        ConflictPosition {
            mode_id: mode.to_string(),
            position: text.to_string(),
        }
    }

    #[test]
    fn test_infer_method() {
        assert_eq!(ResolutionMethod::infer("Reached consensus after review"), ResolutionMethod::Consensus);
        assert_eq!(ResolutionMethod::infer("majority vote 3-1"), ResolutionMethod::Majority);
        assert_eq!(ResolutionMethod::infer("confidence-weighted pick"), ResolutionMethod::Weighted);
        assert_eq!(ResolutionMethod::infer("Deferred to user review"), ResolutionMethod::Deferred);
        assert_eq!(ResolutionMethod::infer("picked the first"), ResolutionMethod::Manual);
    }

    #[test]
    fn test_conflict_id_ignores_position_order() {
        let a = conflict_id("caching", &[position("a", "yes"), position("b", "no")]);
        let b = conflict_id("caching", &[position("b", "no"), position("a", "yes")]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert_ne!(a, conflict_id("other", &[position("a", "yes"), position("b", "no")]));
    }

    #[test]
    fn test_disabled_tracker_is_noop() {
        let mut tracker = ExplanationTracker::disabled();
        tracker.record_conclusion(ConclusionExplanation {
            conclusion: "x".into(),
            kind: ConclusionKind::Finding,
            source_findings: vec![],
            contributing_modes: vec![],
            confidence_basis: String::new(),
            supporting_evidence: vec![],
            counter_evidence: vec![],
        });
        assert!(tracker
            .record_conflict_resolution("t", vec![], "r", "consensus")
            .is_none());
        let layer = tracker.generate_layer();
        assert!(layer.conclusions.is_empty());
        assert!(layer.conflicts.is_empty());
    }

    #[test]
    fn test_generate_layer_summary() {
        let mut tracker = ExplanationTracker::new();
        tracker.record_conclusion(ConclusionExplanation {
            conclusion: "pool leaks".into(),
            kind: ConclusionKind::Finding,
            source_findings: vec!["abc".into()],
            contributing_modes: vec!["a".into(), "b".into()],
            confidence_basis: confidence_basis(&["a".into(), "b".into()]),
            supporting_evidence: vec![],
            counter_evidence: vec![],
        });
        tracker.record_conflict_resolution(
            "rate limiting",
            vec![position("a", "add"), position("b", "skip")],
            "add with generous limits",
            "majority of modes favored adding",
        );
        let layer = tracker.generate_layer();
        assert_eq!(layer.summary.total_conclusions, 1);
        assert_eq!(layer.summary.multi_mode_conclusions, 1);
        assert_eq!(layer.summary.methods.get("majority"), Some(&1));
        assert_eq!(layer.conclusions[0].confidence_basis, "confirmed by 2 modes");
    }
}
