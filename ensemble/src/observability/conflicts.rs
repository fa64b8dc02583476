//! Conflict density across mode pairs.
//!
//! The conflict list comes from an auditor report when one is available and
//! from the mechanical detector otherwise. The source is carried on the
//! report so densities from different sources are never mixed.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::merger::{detect_conflicts, PotentialConflict};
use crate::schema::{normalize_mode_id, ModeOutput};

/// Pairs with at least this many conflicts are reported as hot spots.
pub const HIGH_CONFLICT_PAIR_COUNT: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictSource {
    Auditor,
    Fallback,
}

impl ConflictSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auditor => "auditor",
            Self::Fallback => "fallback",
        }
    }
}

/// One disagreement reported by an auditor, possibly spanning several modes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditConflict {
    pub topic: String,
    pub modes: Vec<String>,
    #[serde(default)]
    pub resolved: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditReport {
    #[serde(default)]
    pub conflicts: Vec<AuditConflict>,
}

/// A conflict between exactly two modes, `mode_a < mode_b`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairConflict {
    pub topic: String,
    pub mode_a: String,
    pub mode_b: String,
    pub resolved: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairConflictCount {
    pub mode_a: String,
    pub mode_b: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictDensity {
    pub total: usize,
    pub resolved: usize,
    pub unresolved: usize,
    /// `total / (n * (n - 1) / 2)` over the run's modes.
    pub conflicts_per_pair: f64,
    pub high_conflict_pairs: Vec<PairConflictCount>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictReport {
    pub source: ConflictSource,
    pub conflicts: Vec<PairConflict>,
    pub density: ConflictDensity,
}

fn ordered(a: &str, b: &str) -> (String, String) {
    let (a, b) = (normalize_mode_id(a), normalize_mode_id(b));
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Collects pairwise conflicts for one run.
#[derive(Debug, Clone)]
pub struct ConflictTracker {
    source: ConflictSource,
    modes: BTreeSet<String>,
    conflicts: Vec<PairConflict>,
}

impl ConflictTracker {
    /// Tracker over an auditor report. Multi-mode conflicts expand to every pair.
    pub fn from_auditor(report: &AuditReport, mode_ids: &[String]) -> Self {
        let mut conflicts = Vec::new();
        for conflict in &report.conflicts {
            let modes: BTreeSet<String> = conflict
                .modes
                .iter()
                .map(|m| normalize_mode_id(m))
                .filter(|m| !m.is_empty())
                .collect();
            let modes: Vec<&String> = modes.iter().collect();
            for i in 0..modes.len() {
                for j in (i + 1)..modes.len() {
                    conflicts.push(PairConflict {
                        topic: conflict.topic.clone(),
                        mode_a: modes[i].clone(),
                        mode_b: modes[j].clone(),
                        resolved: conflict.resolved,
                    });
                }
            }
        }
        Self::build(ConflictSource::Auditor, mode_ids, conflicts)
    }

    /// Tracker over mechanically detected conflicts.
    pub fn from_detected(conflicts: &[PotentialConflict], mode_ids: &[String]) -> Self {
        let pairs = conflicts
            .iter()
            .map(|c| {
                let (mode_a, mode_b) = ordered(&c.mode_a, &c.mode_b);
                PairConflict {
                    topic: c.topic.clone(),
                    mode_a,
                    mode_b,
                    resolved: false,
                }
            })
            .collect();
        Self::build(ConflictSource::Fallback, mode_ids, pairs)
    }

    /// Prefer the auditor report; otherwise run the mechanical detector.
    pub fn track(audit: Option<&AuditReport>, outputs: &[ModeOutput]) -> Self {
        let mode_ids: Vec<String> = outputs.iter().map(|o| o.mode_id.clone()).collect();
        match audit {
            Some(report) => Self::from_auditor(report, &mode_ids),
            None => Self::from_detected(&detect_conflicts(outputs), &mode_ids),
        }
    }

    fn build(source: ConflictSource, mode_ids: &[String], mut conflicts: Vec<PairConflict>) -> Self {
        conflicts.sort_by(|a, b| {
            (&a.mode_a, &a.mode_b, &a.topic).cmp(&(&b.mode_a, &b.mode_b, &b.topic))
        });
        let mut modes: BTreeSet<String> = mode_ids.iter().map(|m| normalize_mode_id(m)).collect();
        for c in &conflicts {
            modes.insert(c.mode_a.clone());
            modes.insert(c.mode_b.clone());
        }
        Self {
            source,
            modes,
            conflicts,
        }
    }

    pub fn source(&self) -> ConflictSource {
        self.source
    }

    /// Mark every conflict on `topic` resolved. Returns how many changed.
    pub fn resolve(&mut self, topic: &str) -> usize {
        let mut changed = 0;
        for c in self.conflicts.iter_mut().filter(|c| c.topic == topic && !c.resolved) {
            c.resolved = true;
            changed += 1;
        }
        changed
    }

    pub fn density(&self) -> ConflictDensity {
        let total = self.conflicts.len();
        let resolved = self.conflicts.iter().filter(|c| c.resolved).count();
        let n = self.modes.len();
        let pair_count = n * n.saturating_sub(1) / 2;
        let conflicts_per_pair = if pair_count == 0 {
            0.0
        } else {
            total as f64 / pair_count as f64
        };

        let mut per_pair: BTreeMap<(&str, &str), usize> = BTreeMap::new();
        for c in &self.conflicts {
            *per_pair.entry((c.mode_a.as_str(), c.mode_b.as_str())).or_default() += 1;
        }
        let high_conflict_pairs = per_pair
            .into_iter()
            .filter(|(_, count)| *count >= HIGH_CONFLICT_PAIR_COUNT)
            .map(|((a, b), count)| PairConflictCount {
                mode_a: a.to_string(),
                mode_b: b.to_string(),
                count,
            })
            .collect();

        ConflictDensity {
            total,
            resolved,
            unresolved: total - resolved,
            conflicts_per_pair,
            high_conflict_pairs,
        }
    }

    pub fn report(&self) -> ConflictReport {
        let density = self.density();
        debug!(
            source = self.source.as_str(),
            total = density.total,
            per_pair = density.conflicts_per_pair,
            "Computed conflict density"
        );
        ConflictReport {
            source: self.source,
            conflicts: self.conflicts.clone(),
            density,
        }
    }
}
