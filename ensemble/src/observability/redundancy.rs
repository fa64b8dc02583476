//! Pairwise overlap between modes' findings and recommendations.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::{ModeCatalog, ModeCategory};
use crate::schema::ModeOutput;
use crate::similarity::{dice_sets, jaccard_sets_nonempty, normalize};

/// Pairs at or above this similarity are flagged.
pub const HIGH_REDUNDANCY_THRESHOLD: f64 = 0.5;
pub const FINDINGS_WEIGHT: f64 = 0.8;
pub const RECOMMENDATIONS_WEIGHT: f64 = 0.2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairRedundancy {
    /// Lexically smaller mode id.
    pub mode_a: String,
    pub mode_b: String,
    pub similarity: f64,
    pub shared_findings: usize,
    pub unique_to_a: usize,
    pub unique_to_b: usize,
}

impl PairRedundancy {
    pub fn is_high(&self) -> bool {
        self.similarity >= HIGH_REDUNDANCY_THRESHOLD
    }
}

/// Swap a redundant mode for one from an uncovered category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplacementSuggestion {
    pub replace: String,
    pub with: String,
    pub category: ModeCategory,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedundancyReport {
    pub pairs: Vec<PairRedundancy>,
    /// Mean pairwise similarity, 0 with fewer than two modes.
    pub overall_score: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<ReplacementSuggestion>,
}

impl RedundancyReport {
    pub fn high_pairs(&self) -> impl Iterator<Item = &PairRedundancy> {
        self.pairs.iter().filter(|p| p.is_high())
    }
}

fn finding_set(output: &ModeOutput) -> BTreeSet<String> {
    output.top_findings.iter().map(|f| normalize(&f.text)).collect()
}

fn recommendation_set(output: &ModeOutput) -> BTreeSet<String> {
    output.recommendations.iter().map(|r| normalize(&r.text)).collect()
}

/// Weighted set similarity. With no recommendations on either side the
/// findings Dice stands alone.
pub fn pair_similarity(
    findings_a: &BTreeSet<String>,
    findings_b: &BTreeSet<String>,
    recs_a: &BTreeSet<String>,
    recs_b: &BTreeSet<String>,
) -> f64 {
    let findings = dice_sets(findings_a, findings_b);
    if recs_a.is_empty() && recs_b.is_empty() {
        return findings;
    }
    FINDINGS_WEIGHT * findings + RECOMMENDATIONS_WEIGHT * jaccard_sets_nonempty(recs_a, recs_b)
}

/// Redundancy matrix over `outputs`. With a catalog, high pairs produce
/// replacement suggestions drawn from categories the run does not use.
pub fn compute_redundancy(outputs: &[ModeOutput], catalog: Option<&ModeCatalog>) -> RedundancyReport {
    let mut sorted: Vec<&ModeOutput> = outputs.iter().collect();
    sorted.sort_by(|a, b| a.mode_id.cmp(&b.mode_id));
    let findings: Vec<BTreeSet<String>> = sorted.iter().map(|o| finding_set(o)).collect();
    let recs: Vec<BTreeSet<String>> = sorted.iter().map(|o| recommendation_set(o)).collect();

    let mut pairs = Vec::new();
    for i in 0..sorted.len() {
        for j in (i + 1)..sorted.len() {
            let shared = findings[i].intersection(&findings[j]).count();
            pairs.push(PairRedundancy {
                mode_a: sorted[i].mode_id.clone(),
                mode_b: sorted[j].mode_id.clone(),
                similarity: pair_similarity(&findings[i], &findings[j], &recs[i], &recs[j]),
                shared_findings: shared,
                unique_to_a: findings[i].len() - shared,
                unique_to_b: findings[j].len() - shared,
            });
        }
    }

    let overall_score = if pairs.is_empty() {
        0.0
    } else {
        pairs.iter().map(|p| p.similarity).sum::<f64>() / pairs.len() as f64
    };

    let suggestions = match catalog {
        Some(catalog) => suggest_replacements(&pairs, &sorted, catalog),
        None => Vec::new(),
    };

    debug!(
        pairs = pairs.len(),
        overall_score,
        high = pairs.iter().filter(|p| p.is_high()).count(),
        "Computed redundancy"
    );

    RedundancyReport {
        pairs,
        overall_score,
        suggestions,
    }
}

fn suggest_replacements(
    pairs: &[PairRedundancy],
    outputs: &[&ModeOutput],
    catalog: &ModeCatalog,
) -> Vec<ReplacementSuggestion> {
    let used: BTreeSet<ModeCategory> = outputs
        .iter()
        .filter_map(|o| catalog.category_of(&o.mode_id))
        .collect();
    let mut open = catalog
        .categories()
        .iter()
        .copied()
        .filter(|c| !used.contains(c))
        .filter_map(|c| catalog.in_category(c).first().map(|m| (c, m.id.clone())));

    let mut replaced = BTreeSet::new();
    let mut suggestions = Vec::new();
    for pair in pairs.iter().filter(|p| p.is_high()) {
        if replaced.contains(&pair.mode_a) || replaced.contains(&pair.mode_b) {
            continue;
        }
        let Some((category, with)) = open.next() else {
            break;
        };
        let same_category = catalog.category_of(&pair.mode_a).filter(|c| Some(*c) == catalog.category_of(&pair.mode_b));
        let reason = match same_category {
            Some(cat) => format!(
                "{} and {} are both {} modes with {:.0}% overlap",
                pair.mode_a,
                pair.mode_b,
                cat,
                pair.similarity * 100.0
            ),
            None => format!(
                "{} overlaps {} by {:.0}%",
                pair.mode_b,
                pair.mode_a,
                pair.similarity * 100.0
            ),
        };
        replaced.insert(pair.mode_b.clone());
        suggestions.push(ReplacementSuggestion {
            replace: pair.mode_b.clone(),
            with,
            category,
            reason,
        });
    }
    suggestions
}
