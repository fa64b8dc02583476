//! Mechanical merger: fuse N mode outputs without an agent.
//!
//! Findings, risks, and recommendations are collected, scored, clustered by
//! token Jaccard similarity, ranked, and trimmed. Conflicts between modes are
//! detected on the side. Merging never fails; problems are clipped and logged.

pub mod cluster;
pub mod conflicts;
pub mod grouping;

pub use cluster::{sweep, Absorbed, Candidate, Cluster, AGREEMENT_BOOST};
pub use conflicts::{detect_conflicts, ConflictType, PotentialConflict};
pub use grouping::{
    group_by_action, group_by_evidence, group_by_severity, ActionType, EvidenceGroup,
    RecommendationGroup, RiskGroup, EVIDENCE_GROUP_THRESHOLD,
};

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::provenance::ProvenanceTracker;
use crate::schema::{Finding, ModeOutput, Recommendation, Risk};
use crate::similarity::finding_id;

/// Reason recorded on provenance chains dropped below `min_confidence`.
pub const FILTER_LOW_CONFIDENCE: &str = "below min confidence";
/// Reason recorded on provenance chains cut by `max_findings`.
pub const FILTER_TRIMMED: &str = "trimmed by limit";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    pub max_findings: usize,
    pub max_risks: usize,
    pub max_recommendations: usize,
    pub min_confidence: f64,
    /// Jaccard threshold in [0, 1] for clustering.
    pub dedup_threshold: f64,
    pub weight_by_confidence: bool,
    pub prefer_high_impact: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            max_findings: 20,
            max_risks: 10,
            max_recommendations: 10,
            min_confidence: 0.3,
            dedup_threshold: 0.7,
            weight_by_confidence: true,
            prefer_high_impact: true,
        }
    }
}

impl MergeConfig {
    /// Human-readable issues; empty when the config is usable.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if !(0.0..=1.0).contains(&self.dedup_threshold) {
            issues.push(format!(
                "dedup_threshold must be in [0, 1], got {}",
                self.dedup_threshold
            ));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            issues.push(format!(
                "min_confidence must be in [0, 1], got {}",
                self.min_confidence
            ));
        }
        if self.max_findings == 0 {
            issues.push("max_findings must be greater than zero".to_string());
        }
        issues
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedFinding {
    pub finding: Finding,
    /// Sorted, deduplicated.
    pub source_modes: Vec<String>,
    pub merge_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedRisk {
    pub risk: Risk,
    pub source_modes: Vec<String>,
    pub merge_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedRecommendation {
    pub recommendation: Recommendation,
    pub source_modes: Vec<String>,
    pub merge_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeStats {
    pub input_outputs: usize,
    pub input_findings: usize,
    pub filtered_findings: usize,
    /// Findings absorbed into another cluster.
    pub deduplicated_findings: usize,
    pub trimmed_findings: usize,
    pub output_findings: usize,
    pub input_risks: usize,
    #[serde(default)]
    pub trimmed_risks: usize,
    pub output_risks: usize,
    pub input_recommendations: usize,
    #[serde(default)]
    pub trimmed_recommendations: usize,
    pub output_recommendations: usize,
    pub conflicts: usize,
}

impl MergeStats {
    /// Share of collected findings that were absorbed as duplicates.
    pub fn dedup_ratio(&self) -> f64 {
        let collected = self.input_findings.saturating_sub(self.filtered_findings);
        if collected == 0 {
            0.0
        } else {
            self.deduplicated_findings as f64 / collected as f64
        }
    }
}

/// Display groupings computed after trimming.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeGroups {
    pub by_evidence: Vec<EvidenceGroup>,
    pub by_action: Vec<RecommendationGroup>,
    pub by_severity: Vec<RiskGroup>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergedOutput {
    pub findings: Vec<MergedFinding>,
    pub risks: Vec<MergedRisk>,
    pub recommendations: Vec<MergedRecommendation>,
    pub conflicts: Vec<PotentialConflict>,
    /// Every mode that contributed an output, sorted.
    pub source_modes: Vec<String>,
    pub stats: MergeStats,
    pub groups: MergeGroups,
}

/// Stateless merger parameterized by a [`MergeConfig`].
#[derive(Debug, Clone, Default)]
pub struct MechanicalMerger {
    config: MergeConfig,
}

impl MechanicalMerger {
    pub fn new(config: MergeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    /// Merge outputs. When a tracker is supplied, every finding is recorded
    /// on it (discovery, filter, merge).
    pub fn merge(
        &self,
        outputs: &[ModeOutput],
        provenance: Option<&ProvenanceTracker>,
    ) -> MergedOutput {
        let mut sorted: Vec<&ModeOutput> = outputs.iter().collect();
        sorted.sort_by(|a, b| a.mode_id.cmp(&b.mode_id));

        let mut stats = MergeStats {
            input_outputs: outputs.len(),
            ..MergeStats::default()
        };

        let findings = self.merge_findings(&sorted, provenance, &mut stats);
        let risks = self.merge_risks(&sorted, &mut stats);
        let recommendations = self.merge_recommendations(&sorted, &mut stats);
        let conflicts = detect_conflicts(outputs);
        stats.conflicts = conflicts.len();

        let source_modes: Vec<String> = sorted
            .iter()
            .map(|o| o.mode_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let groups = MergeGroups {
            by_evidence: group_by_evidence(&findings),
            by_action: group_by_action(&recommendations),
            by_severity: group_by_severity(&risks),
        };

        info!(
            modes = source_modes.len(),
            input_findings = stats.input_findings,
            output_findings = stats.output_findings,
            filtered = stats.filtered_findings,
            deduplicated = stats.deduplicated_findings,
            trimmed = stats.trimmed_findings,
            trimmed_risks = stats.trimmed_risks,
            trimmed_recommendations = stats.trimmed_recommendations,
            conflicts = stats.conflicts,
            "Mechanical merge complete"
        );

        MergedOutput {
            findings,
            risks,
            recommendations,
            conflicts,
            source_modes,
            stats,
            groups,
        }
    }

    fn mode_weight(&self, output: &ModeOutput) -> f64 {
        if self.config.weight_by_confidence {
            output.confidence.value()
        } else {
            1.0
        }
    }

    fn impact_weight(&self, impact: crate::schema::ImpactLevel) -> f64 {
        if self.config.prefer_high_impact {
            impact.weight()
        } else {
            1.0
        }
    }

    fn merge_findings(
        &self,
        outputs: &[&ModeOutput],
        provenance: Option<&ProvenanceTracker>,
        stats: &mut MergeStats,
    ) -> Vec<MergedFinding> {
        // A mode can repeat a finding; the chain is shared, so it is only
        // filtered when no copy clears the threshold.
        let surviving: BTreeSet<String> = outputs
            .iter()
            .flat_map(|output| {
                output
                    .top_findings
                    .iter()
                    .filter(|f| f.confidence.value() >= self.config.min_confidence)
                    .map(|f| finding_id(&output.mode_id, &f.text))
            })
            .collect();

        let mut candidates = Vec::new();
        for output in outputs {
            let mode_weight = self.mode_weight(output);
            for finding in &output.top_findings {
                stats.input_findings += 1;
                let id = finding_id(&output.mode_id, &finding.text);
                if let Some(tracker) = provenance {
                    if let Err(e) = tracker.record_discovery(&output.mode_id, finding) {
                        warn!(error = %e, finding_id = %id, "Failed to record discovery");
                    }
                }
                if finding.confidence.value() < self.config.min_confidence {
                    stats.filtered_findings += 1;
                    if !surviving.contains(&id) {
                        record_filter(provenance, &id, FILTER_LOW_CONFIDENCE);
                    }
                    continue;
                }
                let score = finding.confidence.value()
                    * mode_weight
                    * self.impact_weight(finding.impact);
                candidates.push(Candidate::new(
                    finding.clone(),
                    &finding.text,
                    &output.mode_id,
                    score,
                    id,
                ));
            }
        }

        let mut clusters = sweep(candidates, self.config.dedup_threshold);
        stats.deduplicated_findings = clusters.iter().map(|c| c.absorbed.len()).sum();

        if let Some(tracker) = provenance {
            for cluster in &clusters {
                for absorbed in &cluster.absorbed {
                    if absorbed.id == cluster.primary_id {
                        continue;
                    }
                    if let Err(e) = tracker.record_merge(
                        &cluster.primary_id,
                        std::slice::from_ref(&absorbed.id),
                        absorbed.similarity,
                    ) {
                        warn!(error = %e, primary = %cluster.primary_id, "Failed to record merge");
                    }
                }
            }
        }

        if clusters.len() > self.config.max_findings {
            let trimmed = clusters.split_off(self.config.max_findings);
            stats.trimmed_findings = trimmed.len();
            debug!(count = trimmed.len(), "Findings trimmed by limit");
            for cluster in &trimmed {
                record_filter(provenance, &cluster.primary_id, FILTER_TRIMMED);
            }
        }
        stats.output_findings = clusters.len();

        clusters
            .into_iter()
            .map(|c| MergedFinding {
                finding: c.primary,
                source_modes: c.source_modes.into_iter().collect(),
                merge_score: c.score,
                provenance_id: Some(c.primary_id),
            })
            .collect()
    }

    fn merge_risks(&self, outputs: &[&ModeOutput], stats: &mut MergeStats) -> Vec<MergedRisk> {
        let mut candidates = Vec::new();
        for output in outputs {
            let mode_weight = self.mode_weight(output);
            for risk in &output.risks {
                stats.input_risks += 1;
                let score = self.impact_weight(risk.impact) * risk.likelihood.value() * mode_weight;
                let id = finding_id(&output.mode_id, &risk.text);
                candidates.push(Candidate::new(risk.clone(), &risk.text, &output.mode_id, score, id));
            }
        }

        let mut clusters = sweep(candidates, self.config.dedup_threshold);
        if clusters.len() > self.config.max_risks {
            let trimmed = clusters.split_off(self.config.max_risks);
            stats.trimmed_risks = trimmed.len();
            debug!(count = trimmed.len(), "Risks trimmed by limit");
        }
        stats.output_risks = clusters.len();

        clusters
            .into_iter()
            .map(|c| MergedRisk {
                risk: c.primary,
                source_modes: c.source_modes.into_iter().collect(),
                merge_score: c.score,
                provenance_id: None,
            })
            .collect()
    }

    fn merge_recommendations(
        &self,
        outputs: &[&ModeOutput],
        stats: &mut MergeStats,
    ) -> Vec<MergedRecommendation> {
        let mut candidates = Vec::new();
        for output in outputs {
            let mode_weight = self.mode_weight(output);
            for rec in &output.recommendations {
                stats.input_recommendations += 1;
                let score = self.impact_weight(rec.priority) * mode_weight;
                let id = finding_id(&output.mode_id, &rec.text);
                candidates.push(Candidate::new(rec.clone(), &rec.text, &output.mode_id, score, id));
            }
        }

        let mut clusters = sweep(candidates, self.config.dedup_threshold);
        if clusters.len() > self.config.max_recommendations {
            let trimmed = clusters.split_off(self.config.max_recommendations);
            stats.trimmed_recommendations = trimmed.len();
            debug!(count = trimmed.len(), "Recommendations trimmed by limit");
        }
        stats.output_recommendations = clusters.len();

        clusters
            .into_iter()
            .map(|c| MergedRecommendation {
                recommendation: c.primary,
                source_modes: c.source_modes.into_iter().collect(),
                merge_score: c.score,
                provenance_id: None,
            })
            .collect()
    }
}

fn record_filter(provenance: Option<&ProvenanceTracker>, id: &str, reason: &str) {
    if let Some(tracker) = provenance {
        if let Err(e) = tracker.record_filter(id, reason) {
            warn!(error = %e, finding_id = id, "Failed to record filter");
        }
    }
}

/// Convenience wrapper for a one-off merge.
pub fn merge_outputs(outputs: &[ModeOutput], config: &MergeConfig) -> MergedOutput {
    MechanicalMerger::new(config.clone()).merge(outputs, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Confidence, ImpactLevel};

    fn conf(v: f64) -> Confidence {
        Confidence::new(v).unwrap()
    }

    fn output_with(mode: &str, findings: &[(&str, f64)]) -> ModeOutput {
        findings.iter().fold(
            ModeOutput::new(mode, format!("{} thesis", mode), conf(0.8)),
            |out, (text, c)| out.with_finding(Finding::new(*text, ImpactLevel::High, conf(*c))),
        )
    }

    #[test]
    fn test_merge_dedups_across_modes() {
        let a = output_with("mode-a", &[("Memory leak detected in database connection pool handler", 0.8)]);
        let b = output_with(
            "mode-b",
            &[("Memory leak detected in database connection pool handler code", 0.7)],
        );
        let config = MergeConfig {
            dedup_threshold: 0.6,
            max_findings: 10,
            ..MergeConfig::default()
        };
        let merged = merge_outputs(&[a, b], &config);
        assert_eq!(merged.findings.len(), 1);
        assert_eq!(merged.findings[0].source_modes, vec!["mode-a", "mode-b"]);
        let single = 0.8 * 0.8 * ImpactLevel::High.weight();
        assert!(merged.findings[0].merge_score > single);
        assert_eq!(merged.stats.deduplicated_findings, 1);
    }

    #[test]
    fn test_merge_filters_low_confidence_and_records_provenance() {
        let a = output_with("a", &[("keep me please", 0.9), ("drop me now", 0.1)]);
        let tracker = ProvenanceTracker::new("q", &["a".to_string()]);
        let merged = MechanicalMerger::default().merge(&[a], Some(&tracker));
        assert_eq!(merged.findings.len(), 1);
        assert_eq!(merged.stats.filtered_findings, 1);
        let dropped = tracker.get_chain(&finding_id("a", "drop me now")).unwrap();
        assert_eq!(dropped.filtered.unwrap().reason, FILTER_LOW_CONFIDENCE);
    }

    #[test]
    fn test_merge_trims_to_limit() {
        let a = output_with(
            "a",
            &[("alpha one", 0.9), ("beta two", 0.8), ("gamma three", 0.7)],
        );
        let tracker = ProvenanceTracker::new("q", &["a".to_string()]);
        let config = MergeConfig {
            max_findings: 2,
            ..MergeConfig::default()
        };
        let merged = MechanicalMerger::new(config).merge(&[a], Some(&tracker));
        assert_eq!(merged.findings.len(), 2);
        assert_eq!(merged.stats.trimmed_findings, 1);
        let trimmed = tracker.get_chain(&finding_id("a", "gamma three")).unwrap();
        assert_eq!(trimmed.filtered.unwrap().reason, FILTER_TRIMMED);
    }

    #[test]
    fn test_merge_records_merge_chain() {
        let a = output_with("a", &[("cache misses on cold start", 0.9)]);
        let b = output_with("b", &[("cache misses on cold start", 0.8)]);
        let tracker = ProvenanceTracker::new("q", &["a".to_string(), "b".to_string()]);
        MechanicalMerger::default().merge(&[a, b], Some(&tracker));
        let secondary = tracker
            .get_chain(&finding_id("b", "cache misses on cold start"))
            .unwrap();
        assert_eq!(
            secondary.merged_into.as_deref(),
            Some(finding_id("a", "cache misses on cold start").as_str())
        );
        assert_eq!(tracker.active_count(), 1);
    }

    #[test]
    fn test_merge_is_order_independent() {
        let a = output_with("a", &[("slow query planner", 0.6), ("missing index", 0.7)]);
        let b = output_with("b", &[("missing index on users", 0.9)]);
        let config = MergeConfig::default();
        let first = merge_outputs(&[a.clone(), b.clone()], &config);
        let second = merge_outputs(&[b, a], &config);
        assert_eq!(first.findings, second.findings);
    }

    #[test]
    fn test_merge_idempotent_on_single_sources() {
        let a = output_with("a", &[("one thing", 0.9)]);
        let b = output_with("b", &[("another matter entirely", 0.9)]);
        let config = MergeConfig::default();
        let first = merge_outputs(&[a.clone(), b.clone()], &config);
        let second = merge_outputs(&[a, b], &config);
        assert_eq!(first, second);
        assert!(first.findings.iter().all(|f| f.source_modes.len() == 1));
    }

    #[test]
    fn test_merge_risks_and_recommendations() {
        let a = ModeOutput::new("a", "t", conf(0.5))
            .with_risk(Risk::new("outage during deploy", ImpactLevel::Critical, conf(0.5)))
            .with_recommendation(Recommendation::new("Add integration tests", ImpactLevel::High));
        let b = ModeOutput::new("b", "u", conf(0.5))
            .with_risk(Risk::new("outage during deploy", ImpactLevel::High, conf(0.4)))
            .with_recommendation(Recommendation::new("Add integration tests", ImpactLevel::Low));
        let merged = merge_outputs(&[a, b], &MergeConfig::default());
        assert_eq!(merged.risks.len(), 1);
        assert_eq!(merged.recommendations.len(), 1);
        assert_eq!(merged.recommendations[0].source_modes.len(), 2);
        assert_eq!(merged.groups.by_action[0].action_type, ActionType::AddTest);
        assert_eq!(merged.source_modes, vec!["a", "b"]);
    }

    #[test]
    fn test_repeated_finding_keeps_active_chain() {
        let a = output_with("m", &[("Leak in pool", 0.1), ("Leak in pool", 0.9)]);
        let tracker = ProvenanceTracker::new("q", &["m".to_string()]);
        let merged = MechanicalMerger::default().merge(&[a], Some(&tracker));

        assert_eq!(merged.findings.len(), 1);
        assert_eq!(merged.stats.filtered_findings, 1);
        let id = merged.findings[0].provenance_id.clone().unwrap();
        assert_eq!(id, finding_id("m", "Leak in pool"));
        let chain = tracker.get_chain(&id).unwrap();
        assert!(!chain.is_filtered());
        assert_eq!(tracker.active_count(), 1);
    }

    #[test]
    fn test_merge_trims_risks_to_limit() {
        let a = ModeOutput::new("a", "t", conf(0.8))
            .with_risk(Risk::new("outage during deploy", ImpactLevel::Critical, conf(0.9)))
            .with_risk(Risk::new("stale cache entries", ImpactLevel::High, conf(0.8)))
            .with_risk(Risk::new("quota exhaustion", ImpactLevel::Medium, conf(0.7)))
            .with_risk(Risk::new("clock skew between hosts", ImpactLevel::Low, conf(0.6)));
        let config = MergeConfig {
            max_risks: 2,
            ..MergeConfig::default()
        };
        let merged = merge_outputs(&[a], &config);

        assert_eq!(merged.risks.len(), 2);
        assert_eq!(merged.stats.input_risks, 4);
        assert_eq!(merged.stats.output_risks, 2);
        assert_eq!(merged.stats.trimmed_risks, 2);
        assert_eq!(merged.risks[0].risk.text, "outage during deploy");
    }

    #[test]
    fn test_merge_trims_recommendations_to_limit() {
        let a = ModeOutput::new("a", "t", conf(0.8))
            .with_recommendation(Recommendation::new("Add integration tests", ImpactLevel::High))
            .with_recommendation(Recommendation::new("Document the retry policy", ImpactLevel::Medium))
            .with_recommendation(Recommendation::new("Remove the legacy flag", ImpactLevel::Low));
        let config = MergeConfig {
            max_recommendations: 1,
            ..MergeConfig::default()
        };
        let merged = merge_outputs(&[a], &config);

        assert_eq!(merged.recommendations.len(), 1);
        assert_eq!(merged.stats.output_recommendations, 1);
        assert_eq!(merged.stats.trimmed_recommendations, 2);
        assert_eq!(merged.stats.trimmed_risks, 0);
    }

    #[test]
    fn test_config_validate() {
        assert!(MergeConfig::default().validate().is_empty());
        let bad = MergeConfig {
            dedup_threshold: 1.5,
            max_findings: 0,
            ..MergeConfig::default()
        };
        assert_eq!(bad.validate().len(), 2);
    }
}
