//! Run observability: coverage, velocity, redundancy, conflicts, early stop.
//!
//! Each metric is computable on its own; [`RunMetrics::compute`] builds all
//! of them for a finished set of outputs in one call.

pub mod conflicts;
pub mod coverage;
pub mod early_stop;
pub mod redundancy;
pub mod velocity;

pub use conflicts::{
    AuditConflict, AuditReport, ConflictDensity, ConflictReport, ConflictSource, ConflictTracker,
    PairConflict, PairConflictCount,
};
pub use coverage::{compute_coverage, CategoryCoverage, CoverageMap, CoverageReport, CoverageSuggestion};
pub use early_stop::{EarlyStopConfig, EarlyStopDetector, StopDecision, StopReason};
pub use redundancy::{compute_redundancy, PairRedundancy, RedundancyReport, ReplacementSuggestion};
pub use velocity::{ModeVelocity, VelocityLabel, VelocityReport, VelocityTracker};

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::catalog::ModeCatalog;
use crate::schema::ModeOutput;

/// Every metric for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsReport {
    pub coverage: CoverageReport,
    pub velocity: VelocityReport,
    pub redundancy: RedundancyReport,
    pub conflicts: ConflictReport,
    pub generated_at: DateTime<Utc>,
}

pub struct RunMetrics;

impl RunMetrics {
    /// `tokens` maps mode id to tokens spent. Conflicts come from `audit`
    /// when given, otherwise from the mechanical detector.
    pub fn compute(
        catalog: &ModeCatalog,
        outputs: &[ModeOutput],
        tokens: &BTreeMap<String, u64>,
        audit: Option<&AuditReport>,
    ) -> MetricsReport {
        let mode_ids: Vec<&str> = outputs.iter().map(|o| o.mode_id.as_str()).collect();
        let coverage = compute_coverage(catalog, &mode_ids);

        let mut velocity = VelocityTracker::new();
        velocity.record_outputs(outputs, tokens);
        let velocity = velocity.report();

        let redundancy = compute_redundancy(outputs, Some(catalog));
        let conflicts = ConflictTracker::track(audit, outputs).report();

        info!(
            modes = outputs.len(),
            coverage = coverage.overall,
            velocity = velocity.overall_velocity,
            redundancy = redundancy.overall_score,
            conflicts = conflicts.density.total,
            conflict_source = conflicts.source.as_str(),
            "Computed run metrics"
        );

        MetricsReport {
            coverage,
            velocity,
            redundancy,
            conflicts,
            generated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Confidence, Finding, ImpactLevel};

    #[test]
    fn test_compute_all_metrics() {
        let c = Confidence::new(0.8).unwrap();
        let outputs = vec![
            ModeOutput::new("deductive", "We should add rate limiting to prevent abuse", c)
                .with_finding(Finding::new("No limiter on login", ImpactLevel::High, c)),
            ModeOutput::new("means-end", "We should not add rate limiting as it blocks users", c)
                .with_finding(Finding::new("Users retry often", ImpactLevel::Medium, c)),
        ];
        let tokens = BTreeMap::from([
            ("deductive".to_string(), 1000u64),
            ("means-end".to_string(), 1000u64),
        ]);
        let report = RunMetrics::compute(&ModeCatalog::builtin(), &outputs, &tokens, None);
        assert!((report.coverage.overall - 2.0 / 12.0).abs() < 1e-9);
        assert!((report.velocity.overall_velocity - 1.0).abs() < 1e-9);
        assert_eq!(report.redundancy.pairs.len(), 1);
        assert_eq!(report.conflicts.source, ConflictSource::Fallback);
        assert_eq!(report.conflicts.density.total, 1);

        let audited = RunMetrics::compute(
            &ModeCatalog::builtin(),
            &outputs,
            &tokens,
            Some(&AuditReport::default()),
        );
        assert_eq!(audited.conflicts.source, ConflictSource::Auditor);
        assert_eq!(audited.conflicts.density.total, 0);
    }
}
