//! Text similarity kit: normalization, token sets, Jaccard, Dice, and
//! stable finding identifiers.

use std::collections::BTreeSet;

use sha2::{Digest, Sha256};

use crate::schema::Finding;

/// Trim and lowercase.
pub fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

/// Whitespace-split of the normalized string into a token set.
pub fn tokenize(s: &str) -> BTreeSet<String> {
    normalize(s)
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Jaccard over token sets: 1 when both are empty, 0 when exactly one is.
pub fn jaccard(a: &str, b: &str) -> f64 {
    jaccard_sets(&tokenize(a), &tokenize(b))
}

/// Jaccard that treats any empty side as incomparable (0).
pub fn jaccard_nonempty(a: &str, b: &str) -> f64 {
    jaccard_sets_nonempty(&tokenize(a), &tokenize(b))
}

/// Dice coefficient over token sets; 0 when either side is empty.
pub fn dice(a: &str, b: &str) -> f64 {
    dice_sets(&tokenize(a), &tokenize(b))
}

pub fn jaccard_sets<T: Ord>(a: &BTreeSet<T>, b: &BTreeSet<T>) -> f64 {
    match (a.is_empty(), b.is_empty()) {
        (true, true) => 1.0,
        (true, false) | (false, true) => 0.0,
        (false, false) => {
            let intersection = a.intersection(b).count();
            let union = a.union(b).count();
            intersection as f64 / union as f64
        }
    }
}

pub fn jaccard_sets_nonempty<T: Ord>(a: &BTreeSet<T>, b: &BTreeSet<T>) -> f64 {
    if a.is_empty() || b.is_empty() {
        0.0
    } else {
        jaccard_sets(a, b)
    }
}

pub fn dice_sets<T: Ord>(a: &BTreeSet<T>, b: &BTreeSet<T>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    2.0 * intersection as f64 / (a.len() + b.len()) as f64
}

/// Dedup key: normalized text, plus `|normalized evidence` when present.
pub fn finding_key(finding: &Finding) -> String {
    let mut key = normalize(&finding.text);
    if let Some(pointer) = finding.evidence_pointer.as_deref() {
        let pointer = normalize(pointer);
        if !pointer.is_empty() {
            key.push('|');
            key.push_str(&pointer);
        }
    }
    key
}

/// Stable 16-hex identifier of a finding within a mode.
pub fn finding_id(mode_id: &str, finding_text: &str) -> String {
    let material = format!("{}|{}", normalize(mode_id), normalize(finding_text));
    short_hash(material.as_bytes())
}

/// First 16 hex characters of the SHA-256 digest.
pub fn short_hash(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut hex = hex::encode(digest);
    hex.truncate(16);
    hex
}
