//! Sequential-sweep clustering shared by findings, risks, and recommendations.

use std::collections::BTreeSet;

use crate::similarity::{jaccard_sets, tokenize};

/// Multiplier applied when a cluster absorbs at least one similar item.
pub const AGREEMENT_BOOST: f64 = 1.1;

/// A scored item awaiting clustering.
#[derive(Debug, Clone)]
pub struct Candidate<T> {
    pub item: T,
    pub mode_id: String,
    pub score: f64,
    /// Stable id used for tie-breaks and provenance.
    pub id: String,
    tokens: BTreeSet<String>,
}

impl<T> Candidate<T> {
    pub fn new(item: T, text: &str, mode_id: &str, score: f64, id: String) -> Self {
        Self {
            item,
            mode_id: mode_id.to_string(),
            score,
            id,
            tokens: tokenize(text),
        }
    }
}

/// A secondary absorbed by a cluster and how similar it was to the primary.
#[derive(Debug, Clone)]
pub struct Absorbed {
    pub id: String,
    pub similarity: f64,
}

/// Result of one sweep pass.
#[derive(Debug, Clone)]
pub struct Cluster<T> {
    pub primary: T,
    pub primary_id: String,
    pub source_modes: BTreeSet<String>,
    pub score: f64,
    pub absorbed: Vec<Absorbed>,
}

/// For each not-yet-merged candidate, absorb every later candidate whose
/// Jaccard similarity to it meets `threshold`.
///
/// The merged score is the higher of the member scores times
/// [`AGREEMENT_BOOST`]. Output is sorted by score descending, then id.
pub fn sweep<T>(candidates: Vec<Candidate<T>>, threshold: f64) -> Vec<Cluster<T>> {
    let n = candidates.len();
    let mut used = vec![false; n];
    let mut clusters = Vec::new();

    let mut slots: Vec<Option<Candidate<T>>> = candidates.into_iter().map(Some).collect();

    for i in 0..n {
        if used[i] {
            continue;
        }
        used[i] = true;

        let (primary_tokens, primary_mode, mut best) = match slots[i].as_ref() {
            Some(c) => (c.tokens.clone(), c.mode_id.clone(), c.score),
            None => continue,
        };
        let mut source_modes = BTreeSet::from([primary_mode]);
        let mut absorbed = Vec::new();

        for j in (i + 1)..n {
            if used[j] {
                continue;
            }
            let Some(other) = slots[j].as_ref() else {
                continue;
            };
            let similarity = jaccard_sets(&primary_tokens, &other.tokens);
            if similarity >= threshold {
                used[j] = true;
                source_modes.insert(other.mode_id.clone());
                best = best.max(other.score);
                absorbed.push(Absorbed {
                    id: other.id.clone(),
                    similarity,
                });
                slots[j] = None;
            }
        }

        let Some(primary) = slots[i].take() else {
            continue;
        };
        let score = if absorbed.is_empty() {
            best
        } else {
            best * AGREEMENT_BOOST
        };

        clusters.push(Cluster {
            primary: primary.item,
            primary_id: primary.id,
            source_modes,
            score,
            absorbed,
        });
    }

    clusters.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.primary_id.cmp(&b.primary_id))
    });
    clusters
}
