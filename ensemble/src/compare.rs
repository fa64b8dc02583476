//! Deterministic diff of two ensemble runs.
//!
//! Every list in a [`ComparisonResult`] is sorted, so two comparisons of
//! the same runs serialize identically apart from `generated_at`.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::checkpoint::ResumeState;
use crate::contribution::ContributionReport;
use crate::schema::{Finding, ModeOutput};
use crate::similarity::finding_id;
use crate::synthesis::SynthesisResult;

/// Characters of each synthesis shown in a conclusion diff.
pub const SYNTHESIS_DISPLAY_CHARS: usize = 200;

/// Everything a comparison needs from one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub run_id: String,
    pub outputs: Vec<ModeOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthesis: Option<SynthesisResult>,
    /// Overrides the report embedded in `synthesis`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contributions: Option<ContributionReport>,
}

impl RunSnapshot {
    pub fn new(run_id: impl Into<String>, outputs: Vec<ModeOutput>) -> Self {
        Self {
            run_id: run_id.into(),
            outputs,
            synthesis: None,
            contributions: None,
        }
    }

    pub fn from_resume_state(state: &ResumeState) -> Self {
        Self::new(state.metadata.run_id.clone(), state.completed.clone())
    }

    pub fn with_synthesis(mut self, synthesis: SynthesisResult) -> Self {
        self.synthesis = Some(synthesis);
        self
    }

    pub fn with_contributions(mut self, report: ContributionReport) -> Self {
        self.contributions = Some(report);
        self
    }

    fn contribution_report(&self) -> Option<&ContributionReport> {
        self.contributions
            .as_ref()
            .or_else(|| self.synthesis.as_ref().and_then(|s| s.contributions.as_ref()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModeDiff {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub added: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub common: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindingRef {
    pub finding_id: String,
    pub mode_id: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub before: String,
    pub after: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindingChange {
    pub finding_id: String,
    pub mode_id: String,
    pub changes: Vec<FieldChange>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FindingsDiff {
    /// Only in run B.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub new: Vec<FindingRef>,
    /// Only in run A.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<FindingRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changed: Vec<FindingChange>,
    pub unchanged: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThesisChange {
    pub mode_id: String,
    pub before: String,
    pub after: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConclusionDiff {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub thesis_changes: Vec<ThesisChange>,
    pub synthesis_equal: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub synthesis_a: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub synthesis_b: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContributionDelta {
    pub mode_id: String,
    pub score_a: f64,
    pub score_b: f64,
    pub score_delta: f64,
    pub rank_a: usize,
    pub rank_b: usize,
    /// Positive when the mode moved up.
    pub rank_delta: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContributionDiff {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modes: Vec<ContributionDelta>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonSummary {
    pub modes_added: usize,
    pub modes_removed: usize,
    pub findings_new: usize,
    pub findings_missing: usize,
    pub findings_changed: usize,
    pub theses_changed: usize,
    pub synthesis_changed: bool,
    pub headline: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub run_a: String,
    pub run_b: String,
    pub generated_at: DateTime<Utc>,
    pub mode_diff: ModeDiff,
    pub findings_diff: FindingsDiff,
    pub conclusion_diff: ConclusionDiff,
    pub contribution_diff: ContributionDiff,
    pub summary: ComparisonSummary,
}

impl ComparisonResult {
    pub fn has_changes(&self) -> bool {
        let s = &self.summary;
        s.modes_added + s.modes_removed + s.findings_new + s.findings_missing + s.findings_changed + s.theses_changed
            > 0
            || s.synthesis_changed
    }
}

pub fn compare(a: &RunSnapshot, b: &RunSnapshot) -> ComparisonResult {
    let modes_a = by_mode(&a.outputs);
    let modes_b = by_mode(&b.outputs);
    let ids_a: BTreeSet<&str> = modes_a.keys().copied().collect();
    let ids_b: BTreeSet<&str> = modes_b.keys().copied().collect();

    let mode_diff = ModeDiff {
        added: ids_b.difference(&ids_a).map(|s| s.to_string()).collect(),
        removed: ids_a.difference(&ids_b).map(|s| s.to_string()).collect(),
        common: ids_a.intersection(&ids_b).map(|s| s.to_string()).collect(),
    };

    let findings_diff = diff_findings(&a.outputs, &b.outputs);

    let thesis_changes: Vec<ThesisChange> = mode_diff
        .common
        .iter()
        .filter_map(|id| {
            let before = modes_a.get(id.as_str())?.thesis.trim();
            let after = modes_b.get(id.as_str())?.thesis.trim();
            (before != after).then(|| ThesisChange {
                mode_id: id.clone(),
                before: before.to_string(),
                after: after.to_string(),
            })
        })
        .collect();

    let synth_a = a.synthesis.as_ref().map(|s| s.thesis.trim()).unwrap_or("");
    let synth_b = b.synthesis.as_ref().map(|s| s.thesis.trim()).unwrap_or("");
    let conclusion_diff = ConclusionDiff {
        thesis_changes,
        synthesis_equal: synth_a == synth_b,
        synthesis_a: truncate_display(synth_a, SYNTHESIS_DISPLAY_CHARS),
        synthesis_b: truncate_display(synth_b, SYNTHESIS_DISPLAY_CHARS),
    };

    let contribution_diff = diff_contributions(a.contribution_report(), b.contribution_report());

    let summary = summarize(&mode_diff, &findings_diff, &conclusion_diff);
    debug!(run_a = %a.run_id, run_b = %b.run_id, headline = %summary.headline, "Compared runs");

    ComparisonResult {
        run_a: a.run_id.clone(),
        run_b: b.run_id.clone(),
        generated_at: Utc::now(),
        mode_diff,
        findings_diff,
        conclusion_diff,
        contribution_diff,
        summary,
    }
}

fn by_mode(outputs: &[ModeOutput]) -> BTreeMap<&str, &ModeOutput> {
    let mut map = BTreeMap::new();
    for output in outputs {
        map.entry(output.mode_id.as_str()).or_insert(output);
    }
    map
}

fn index_findings(outputs: &[ModeOutput]) -> BTreeMap<String, (&str, &Finding)> {
    let mut map = BTreeMap::new();
    for output in outputs {
        for finding in &output.top_findings {
            map.entry(finding_id(&output.mode_id, &finding.text))
                .or_insert((output.mode_id.as_str(), finding));
        }
    }
    map
}

fn finding_ref(id: &str, mode_id: &str, finding: &Finding) -> FindingRef {
    FindingRef {
        finding_id: id.to_string(),
        mode_id: mode_id.to_string(),
        text: finding.text.clone(),
    }
}

fn diff_findings(a: &[ModeOutput], b: &[ModeOutput]) -> FindingsDiff {
    let index_a = index_findings(a);
    let index_b = index_findings(b);
    let mut diff = FindingsDiff::default();

    for (id, (mode, finding)) in &index_a {
        match index_b.get(id) {
            None => diff.missing.push(finding_ref(id, mode, finding)),
            Some((_, after)) => {
                let changes = field_changes(finding, after);
                if changes.is_empty() {
                    diff.unchanged += 1;
                } else {
                    diff.changed.push(FindingChange {
                        finding_id: id.clone(),
                        mode_id: mode.to_string(),
                        changes,
                    });
                }
            }
        }
    }
    for (id, (mode, finding)) in &index_b {
        if !index_a.contains_key(id) {
            diff.new.push(finding_ref(id, mode, finding));
        }
    }
    diff
}

fn field_changes(before: &Finding, after: &Finding) -> Vec<FieldChange> {
    let mut changes = Vec::new();
    let mut push = |field: &str, before: String, after: String| {
        changes.push(FieldChange {
            field: field.to_string(),
            before,
            after,
        })
    };
    if before.text != after.text {
        push("text", before.text.clone(), after.text.clone());
    }
    if before.impact != after.impact {
        push("impact", before.impact.to_string(), after.impact.to_string());
    }
    if (before.confidence.value() - after.confidence.value()).abs() > 1e-9 {
        push("confidence", before.confidence.to_string(), after.confidence.to_string());
    }
    changes
}

fn diff_contributions(a: Option<&ContributionReport>, b: Option<&ContributionReport>) -> ContributionDiff {
    let (Some(a), Some(b)) = (a, b) else {
        return ContributionDiff::default();
    };
    let mut modes: Vec<ContributionDelta> = a
        .modes
        .iter()
        .filter_map(|ma| {
            let mb = b.get(&ma.mode_id)?;
            Some(ContributionDelta {
                mode_id: ma.mode_id.clone(),
                score_a: ma.score,
                score_b: mb.score,
                score_delta: mb.score - ma.score,
                rank_a: ma.rank,
                rank_b: mb.rank,
                rank_delta: ma.rank as i64 - mb.rank as i64,
            })
        })
        .collect();
    modes.sort_by(|x, y| x.mode_id.cmp(&y.mode_id));
    ContributionDiff { modes }
}

fn summarize(modes: &ModeDiff, findings: &FindingsDiff, conclusions: &ConclusionDiff) -> ComparisonSummary {
    let mut parts = Vec::new();
    if !modes.added.is_empty() || !modes.removed.is_empty() {
        parts.push(format!("{} modes added, {} removed", modes.added.len(), modes.removed.len()));
    }
    if !findings.new.is_empty() || !findings.missing.is_empty() || !findings.changed.is_empty() {
        parts.push(format!(
            "{} new findings, {} missing, {} changed",
            findings.new.len(),
            findings.missing.len(),
            findings.changed.len()
        ));
    }
    if !conclusions.thesis_changes.is_empty() {
        parts.push(format!("{} theses changed", conclusions.thesis_changes.len()));
    }
    if !conclusions.synthesis_equal {
        parts.push("synthesis changed".to_string());
    }
    let headline = if parts.is_empty() {
        "no differences".to_string()
    } else {
        parts.join("; ")
    };

    ComparisonSummary {
        modes_added: modes.added.len(),
        modes_removed: modes.removed.len(),
        findings_new: findings.new.len(),
        findings_missing: findings.missing.len(),
        findings_changed: findings.changed.len(),
        theses_changed: conclusions.thesis_changes.len(),
        synthesis_changed: !conclusions.synthesis_equal,
        headline,
    }
}

fn truncate_display(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    cut.push_str("...");
    cut
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Confidence, ImpactLevel};

    fn conf(v: f64) -> Confidence {
        Confidence::new(v).unwrap()
    }

    fn run_a() -> RunSnapshot {
        RunSnapshot::new(
            "run-a",
            vec![
                ModeOutput::new("causal", "Lock contention", conf(0.8))
                    .with_finding(Finding::new("Mutex held across await", ImpactLevel::High, conf(0.9)))
                    .with_finding(Finding::new("Old finding", ImpactLevel::Low, conf(0.5))),
                ModeOutput::new("deductive", "Invariant broken", conf(0.7)),
            ],
        )
    }

    fn run_b() -> RunSnapshot {
        RunSnapshot::new(
            "run-b",
            vec![
                ModeOutput::new("causal", "Lock contention under load", conf(0.8))
                    .with_finding(Finding::new("mutex held across await", ImpactLevel::Critical, conf(0.9)))
                    .with_finding(Finding::new("New finding", ImpactLevel::Medium, conf(0.6))),
                ModeOutput::new("bayesian", "Likely contention", conf(0.6)),
            ],
        )
    }

    #[test]
    fn test_mode_and_findings_diff() {
        let result = compare(&run_a(), &run_b());
        assert_eq!(result.mode_diff.added, vec!["bayesian"]);
        assert_eq!(result.mode_diff.removed, vec!["deductive"]);
        assert_eq!(result.mode_diff.common, vec!["causal"]);

        assert_eq!(result.findings_diff.new.len(), 1);
        assert_eq!(result.findings_diff.new[0].text, "New finding");
        assert_eq!(result.findings_diff.missing[0].text, "Old finding");
        let changed = &result.findings_diff.changed[0];
        let fields: Vec<&str> = changed.changes.iter().map(|c| c.field.as_str()).collect();
        assert_eq!(fields, vec!["text", "impact"]);

        assert_eq!(result.conclusion_diff.thesis_changes.len(), 1);
        assert!(result.conclusion_diff.synthesis_equal);
        assert!(result.has_changes());
    }

    #[test]
    fn test_identical_runs_have_no_changes() {
        let result = compare(&run_a(), &run_a());
        assert!(!result.has_changes());
        assert_eq!(result.summary.headline, "no differences");
        assert_eq!(result.findings_diff.unchanged, 2);
        let json = serde_json::to_value(&result).unwrap();
        assert!(json["mode_diff"].get("added").is_none());
        assert!(json["findings_diff"].get("changed").is_none());
    }

    #[test]
    fn test_repeat_comparison_is_byte_identical() {
        let strip = |r: &ComparisonResult| {
            let mut v = serde_json::to_value(r).unwrap();
            v.as_object_mut().unwrap().remove("generated_at");
            serde_json::to_string(&v).unwrap()
        };
        let first = compare(&run_a(), &run_b());
        let second = compare(&run_a(), &run_b());
        assert_eq!(strip(&first), strip(&second));
    }

    #[test]
    fn test_truncate_display() {
        assert_eq!(truncate_display("short", 10), "short");
        assert_eq!(truncate_display("abcdefghijkl", 8), "abcde...");
    }
}
