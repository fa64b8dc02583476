//! Findings velocity: unique findings per thousand tokens, per mode.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::schema::ModeOutput;
use crate::similarity::normalize;

/// Below this many unique findings per 1k tokens a mode is flagged LOW.
pub const LOW_VELOCITY_THRESHOLD: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VelocityLabel {
    High,
    Normal,
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeVelocity {
    pub mode_id: String,
    pub tokens_spent: u64,
    pub findings: usize,
    /// Findings no other mode reported.
    pub unique_findings: usize,
    /// `unique_findings * 1000 / tokens_spent`, 0 without tokens.
    pub velocity: f64,
    pub label: VelocityLabel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VelocityReport {
    /// Sorted by mode id.
    pub modes: Vec<ModeVelocity>,
    /// Total unique findings per 1k total tokens.
    pub overall_velocity: f64,
    /// Mean of per-mode velocities.
    pub average_velocity: f64,
    pub total_tokens: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Sample {
    tokens: u64,
    findings: usize,
    unique: usize,
}

/// Per-mode token and findings counters.
#[derive(Debug, Clone, Default)]
pub struct VelocityTracker {
    samples: BTreeMap<String, Sample>,
}

fn per_kilo_token(unique: usize, tokens: u64) -> f64 {
    if tokens == 0 {
        0.0
    } else {
        unique as f64 * 1000.0 / tokens as f64
    }
}

impl VelocityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the counters for `mode_id`.
    pub fn record(&mut self, mode_id: &str, tokens: u64, findings: usize, unique_findings: usize) {
        self.samples.insert(
            mode_id.to_string(),
            Sample {
                tokens,
                findings,
                unique: unique_findings,
            },
        );
    }

    /// Record every output, counting a finding as unique when its normalized
    /// text appears in no other mode. Modes missing from `tokens` spent 0.
    pub fn record_outputs(&mut self, outputs: &[ModeOutput], tokens: &BTreeMap<String, u64>) {
        let mut owners: BTreeMap<String, BTreeSet<&str>> = BTreeMap::new();
        for output in outputs {
            for finding in &output.top_findings {
                owners
                    .entry(normalize(&finding.text))
                    .or_default()
                    .insert(output.mode_id.as_str());
            }
        }

        for output in outputs {
            let texts: BTreeSet<String> = output.top_findings.iter().map(|f| normalize(&f.text)).collect();
            let unique = texts
                .iter()
                .filter(|t| owners.get(*t).map(|o| o.len() == 1).unwrap_or(false))
                .count();
            let spent = tokens.get(&output.mode_id).copied().unwrap_or(0);
            self.record(&output.mode_id, spent, output.top_findings.len(), unique);
        }
    }

    pub fn report(&self) -> VelocityReport {
        let velocities: Vec<(&String, &Sample, f64)> = self
            .samples
            .iter()
            .map(|(id, s)| (id, s, per_kilo_token(s.unique, s.tokens)))
            .collect();

        let average_velocity = if velocities.is_empty() {
            0.0
        } else {
            velocities.iter().map(|(_, _, v)| v).sum::<f64>() / velocities.len() as f64
        };
        let total_tokens: u64 = self.samples.values().map(|s| s.tokens).sum();
        let total_unique: usize = self.samples.values().map(|s| s.unique).sum();

        let mut suggestions = Vec::new();
        let modes = velocities
            .into_iter()
            .map(|(mode_id, sample, velocity)| {
                let label = if sample.tokens > 0 && velocity < LOW_VELOCITY_THRESHOLD {
                    VelocityLabel::Low
                } else if velocity > average_velocity {
                    VelocityLabel::High
                } else {
                    VelocityLabel::Normal
                };
                if label == VelocityLabel::Low {
                    info!(mode_id = %mode_id, velocity, "Mode underperforming");
                    suggestions.push(format!(
                        "{} underperforming ({:.2} unique findings per 1k tokens), consider early stop",
                        mode_id, velocity
                    ));
                }
                ModeVelocity {
                    mode_id: mode_id.clone(),
                    tokens_spent: sample.tokens,
                    findings: sample.findings,
                    unique_findings: sample.unique,
                    velocity,
                    label,
                }
            })
            .collect();

        VelocityReport {
            modes,
            overall_velocity: per_kilo_token(total_unique, total_tokens),
            average_velocity,
            total_tokens,
            suggestions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Confidence, Finding, ImpactLevel};

    #[test]
    fn test_labels_and_overall() {
        let mut tracker = VelocityTracker::new();
        tracker.record("fast", 1000, 6, 5);
        tracker.record("steady", 2000, 5, 4);
        tracker.record("slow", 4000, 3, 2);
        let report = tracker.report();

        let by_id = |id: &str| report.modes.iter().find(|m| m.mode_id == id).unwrap().clone();
        assert_eq!(by_id("fast").velocity, 5.0);
        assert_eq!(by_id("fast").label, VelocityLabel::High);
        assert_eq!(by_id("steady").label, VelocityLabel::Normal);
        assert_eq!(by_id("slow").velocity, 0.5);
        assert_eq!(by_id("slow").label, VelocityLabel::Low);
        assert_eq!(report.suggestions.len(), 1);
        assert!(report.suggestions[0].starts_with("slow underperforming"));

        // Token-weighted mean of per-mode velocity equals the overall velocity.
        let weighted: f64 = report
            .modes
            .iter()
            .map(|m| m.velocity * m.tokens_spent as f64)
            .sum::<f64>()
            / report.total_tokens as f64;
        assert!((weighted - report.overall_velocity).abs() < 1e-9);
        assert!((report.overall_velocity - 11.0 * 1000.0 / 7000.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_tokens() {
        let mut tracker = VelocityTracker::new();
        tracker.record("idle", 0, 0, 0);
        let report = tracker.report();
        assert_eq!(report.modes[0].velocity, 0.0);
        assert_eq!(report.modes[0].label, VelocityLabel::Normal);
        assert_eq!(report.overall_velocity, 0.0);
    }

    #[test]
    fn test_record_outputs_counts_unique() {
        let c = Confidence::new(0.8).unwrap();
        let a = ModeOutput::new("a", "t", c)
            .with_finding(Finding::new("Shared issue", ImpactLevel::High, c))
            .with_finding(Finding::new("only in a", ImpactLevel::Low, c));
        let b = ModeOutput::new("b", "t", c).with_finding(Finding::new("shared issue ", ImpactLevel::High, c));
        let tokens = BTreeMap::from([("a".to_string(), 500u64), ("b".to_string(), 500u64)]);

        let mut tracker = VelocityTracker::new();
        tracker.record_outputs(&[a, b], &tokens);
        let report = tracker.report();
        assert_eq!(report.modes[0].unique_findings, 1);
        assert_eq!(report.modes[0].velocity, 2.0);
        assert_eq!(report.modes[1].unique_findings, 0);
        assert_eq!(report.modes[1].label, VelocityLabel::Low);
    }
}
