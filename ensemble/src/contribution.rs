//! Per-mode contribution scoring.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::merger::MergedOutput;
use crate::schema::ModeOutput;

/// At most this many highlight findings are kept per mode.
pub const MAX_HIGHLIGHTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContributionWeights {
    pub findings: f64,
    pub unique: f64,
    pub citations: f64,
    pub risks: f64,
    pub recommendations: f64,
}

impl Default for ContributionWeights {
    fn default() -> Self {
        Self {
            findings: 0.4,
            unique: 0.3,
            citations: 0.1,
            risks: 0.1,
            recommendations: 0.1,
        }
    }
}

impl ContributionWeights {
    pub fn total(&self) -> f64 {
        self.findings + self.unique + self.citations + self.risks + self.recommendations
    }

    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if (self.total() - 1.0).abs() > 1e-6 {
            issues.push(format!(
                "contribution weights must sum to 1.0, got {:.4}",
                self.total()
            ));
        }
        if [self.findings, self.unique, self.citations, self.risks, self.recommendations]
            .iter()
            .any(|w| *w < 0.0)
        {
            issues.push("contribution weights must be non-negative".to_string());
        }
        issues
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct ModeTally {
    original_findings: usize,
    surviving_findings: usize,
    unique_insights: usize,
    citations: usize,
    risks: usize,
    recommendations: usize,
    highlight_findings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeContribution {
    pub mode_id: String,
    pub original_findings: usize,
    pub surviving_findings: usize,
    pub unique_insights: usize,
    pub citations: usize,
    pub risks: usize,
    pub recommendations: usize,
    pub highlight_findings: Vec<String>,
    /// 0..=100.
    pub score: f64,
    /// 1-based.
    pub rank: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContributionReport {
    pub modes: Vec<ModeContribution>,
    pub weights: ContributionWeights,
}

impl ContributionReport {
    pub fn top_mode(&self) -> Option<&ModeContribution> {
        self.modes.first()
    }

    pub fn get(&self, mode_id: &str) -> Option<&ModeContribution> {
        self.modes.iter().find(|m| m.mode_id == mode_id)
    }
}

/// Thread-safe tally of per-mode contributions for one run.
#[derive(Debug, Default)]
pub struct ContributionTracker {
    weights: ContributionWeights,
    tallies: Mutex<BTreeMap<String, ModeTally>>,
}

impl ContributionTracker {
    pub fn new(weights: ContributionWeights) -> Self {
        Self {
            weights,
            tallies: Mutex::new(BTreeMap::new()),
        }
    }

    fn update(&self, mode_id: &str, f: impl FnOnce(&mut ModeTally)) {
        let mut tallies = self.tallies.lock().unwrap_or_else(PoisonError::into_inner);
        f(tallies.entry(mode_id.to_string()).or_default());
    }

    pub fn record_original(&self, mode_id: &str, count: usize) {
        self.update(mode_id, |t| t.original_findings += count);
    }

    pub fn record_surviving(&self, mode_id: &str, count: usize) {
        self.update(mode_id, |t| t.surviving_findings += count);
    }

    pub fn record_unique(&self, mode_id: &str, count: usize) {
        self.update(mode_id, |t| t.unique_insights += count);
    }

    pub fn record_citation(&self, mode_id: &str) {
        self.update(mode_id, |t| t.citations += 1);
    }

    pub fn record_risks(&self, mode_id: &str, count: usize) {
        self.update(mode_id, |t| t.risks += count);
    }

    pub fn record_recommendations(&self, mode_id: &str, count: usize) {
        self.update(mode_id, |t| t.recommendations += count);
    }

    /// Keep a highlight unless the mode already has [`MAX_HIGHLIGHTS`].
    pub fn add_highlight(&self, mode_id: &str, text: &str) {
        self.update(mode_id, |t| {
            if t.highlight_findings.len() < MAX_HIGHLIGHTS
                && !t.highlight_findings.iter().any(|h| h == text)
            {
                t.highlight_findings.push(text.to_string());
            }
        });
    }

    /// Derive tallies for every mode from its raw output and the merge.
    pub fn track_from_merge(&self, outputs: &[ModeOutput], merged: &MergedOutput) {
        for output in outputs {
            let mode = output.mode_id.as_str();
            let owns = |modes: &[String]| modes.iter().any(|m| m == mode);
            let only = |modes: &[String]| modes.len() == 1 && modes[0] == mode;

            self.record_original(mode, output.top_findings.len());
            self.record_surviving(
                mode,
                merged.findings.iter().filter(|f| owns(&f.source_modes)).count(),
            );
            self.record_unique(
                mode,
                merged.findings.iter().filter(|f| only(&f.source_modes)).count(),
            );
            self.record_risks(
                mode,
                merged.risks.iter().filter(|r| owns(&r.source_modes)).count(),
            );
            self.record_recommendations(
                mode,
                merged
                    .recommendations
                    .iter()
                    .filter(|r| owns(&r.source_modes))
                    .count(),
            );
            for finding in merged
                .findings
                .iter()
                .filter(|f| owns(&f.source_modes))
                .take(MAX_HIGHLIGHTS)
            {
                self.add_highlight(mode, &finding.finding.text);
            }
        }
    }

    /// Score and rank every tracked mode.
    pub fn report(&self) -> ContributionReport {
        let tallies = self
            .tallies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        score_tallies(tallies, &self.weights)
    }
}

fn score_tallies(tallies: BTreeMap<String, ModeTally>, weights: &ContributionWeights) -> ContributionReport {
    let max_of = |f: fn(&ModeTally) -> usize| tallies.values().map(f).max().unwrap_or(0);
    let max_findings = max_of(|t| t.surviving_findings);
    let max_unique = max_of(|t| t.unique_insights);
    let max_citations = max_of(|t| t.citations);
    let max_risks = max_of(|t| t.risks);
    let max_recs = max_of(|t| t.recommendations);

    let norm = |value: usize, max: usize| {
        if max == 0 {
            0.0
        } else {
            value as f64 / max as f64
        }
    };

    let mut modes: Vec<ModeContribution> = tallies
        .into_iter()
        .map(|(mode_id, t)| {
            let score = 100.0
                * (weights.findings * norm(t.surviving_findings, max_findings)
                    + weights.unique * norm(t.unique_insights, max_unique)
                    + weights.citations * norm(t.citations, max_citations)
                    + weights.risks * norm(t.risks, max_risks)
                    + weights.recommendations * norm(t.recommendations, max_recs));
            ModeContribution {
                mode_id,
                original_findings: t.original_findings,
                surviving_findings: t.surviving_findings,
                unique_insights: t.unique_insights,
                citations: t.citations,
                risks: t.risks,
                recommendations: t.recommendations,
                highlight_findings: t.highlight_findings,
                score,
                rank: 0,
            }
        })
        .collect();

    modes.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.mode_id.cmp(&b.mode_id)));
    for (i, mode) in modes.iter_mut().enumerate() {
        mode.rank = i + 1;
    }

    ContributionReport {
        modes,
        weights: weights.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merger::{merge_outputs, MergeConfig};
    use crate::schema::{Confidence, Finding, ImpactLevel};

    fn output(mode: &str, findings: &[&str]) -> ModeOutput {
        findings.iter().fold(
            ModeOutput::new(mode, "thesis", Confidence::new(0.8).unwrap()),
            |o, text| o.with_finding(Finding::new(*text, ImpactLevel::High, Confidence::new(0.9).unwrap())),
        )
    }

    #[test]
    fn test_default_weights_sum_to_one() {
        assert!(ContributionWeights::default().validate().is_empty());
        let bad = ContributionWeights {
            findings: 0.9,
            ..ContributionWeights::default()
        };
        assert_eq!(bad.validate().len(), 1);
    }

    #[test]
    fn test_top_mode_gets_full_weight() {
        let tracker = ContributionTracker::default();
        tracker.record_surviving("a", 4);
        tracker.record_unique("a", 2);
        tracker.record_citation("a");
        tracker.record_risks("a", 1);
        tracker.record_recommendations("a", 1);
        tracker.record_surviving("b", 2);
        let report = tracker.report();
        assert_eq!(report.modes[0].mode_id, "a");
        assert!((report.modes[0].score - 100.0).abs() < 1e-9);
        assert!((report.modes[1].score - 20.0).abs() < 1e-9);
        assert_eq!(report.modes[1].rank, 2);
    }

    #[test]
    fn test_ties_break_on_mode_id() {
        let tracker = ContributionTracker::default();
        tracker.record_surviving("zeta", 1);
        tracker.record_surviving("alpha", 1);
        let report = tracker.report();
        assert_eq!(report.modes[0].mode_id, "alpha");
        assert_eq!(report.top_mode().map(|m| m.rank), Some(1));
    }

    #[test]
    fn test_highlights_capped() {
        let tracker = ContributionTracker::default();
        for text in ["a", "b", "c", "d", "a"] {
            tracker.add_highlight("m", text);
        }
        assert_eq!(tracker.report().modes[0].highlight_findings, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_track_from_merge() {
        let a = output("a", &["shared issue in the scheduler", "only a sees this"]);
        let b = output("b", &["shared issue in the scheduler"]);
        let outputs = vec![a, b];
        let merged = merge_outputs(&outputs, &MergeConfig::default());
        let tracker = ContributionTracker::default();
        tracker.track_from_merge(&outputs, &merged);
        let report = tracker.report();
        let a = report.get("a").unwrap();
        assert_eq!(a.original_findings, 2);
        assert_eq!(a.surviving_findings, 2);
        assert_eq!(a.unique_insights, 1);
        let b = report.get("b").unwrap();
        assert_eq!(b.surviving_findings, 1);
        assert_eq!(b.unique_insights, 0);
        assert_eq!(report.modes[0].mode_id, "a");
    }
}
