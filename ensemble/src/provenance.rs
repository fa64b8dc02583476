//! Provenance tracking: the history of each finding from discovery through
//! filtering, merging, and synthesis citation.
//!
//! Chains live in an arena keyed by finding id; `merged_into` is an index
//! into the same arena, never a pointer. Acyclicity is enforced at write time.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ErrorKind;
use crate::schema::Finding;
use crate::similarity::{finding_id, short_hash};

/// Error type for provenance operations
#[derive(Debug, thiserror::Error)]
pub enum ProvenanceError {
    #[error("unknown finding: {0}")]
    UnknownFinding(String),

    #[error("finding {id} already merged into {into}")]
    AlreadyMerged { id: String, into: String },

    #[error("merging {secondary} into {primary} would create a cycle")]
    Cycle { primary: String, secondary: String },

    #[error("cannot merge finding {0} into itself")]
    SelfMerge(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("lock poisoned")]
    LockPoisoned,
}

impl ProvenanceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownFinding(_) => ErrorKind::NotFound,
            Self::Serialization(_) => ErrorKind::Parse,
            _ => ErrorKind::Invalid,
        }
    }
}

/// Result type for provenance operations
pub type ProvenanceResult<T> = Result<T, ProvenanceError>;

/// Why and when a finding was dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterEvent {
    pub reason: String,
    pub time: DateTime<Utc>,
}

/// A merge absorbed into this chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeEvent {
    pub finding_id: String,
    pub similarity: f64,
    pub time: DateTime<Utc>,
}

/// Append-only history of one finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceChain {
    pub finding_id: String,
    pub origin_mode: String,
    pub finding_text: String,
    pub discovery_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filtered: Option<FilterEvent>,
    #[serde(default)]
    pub merged_from: Vec<MergeEvent>,
    /// Written exactly once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_into: Option<String>,
    #[serde(default)]
    pub synthesis_citations: Vec<String>,
}

impl ProvenanceChain {
    /// A chain is active until it has been merged into another.
    pub fn is_active(&self) -> bool {
        self.merged_into.is_none()
    }

    pub fn is_filtered(&self) -> bool {
        self.filtered.is_some()
    }
}

/// Deterministic hash of a run's question and mode set.
pub fn context_hash(question: &str, mode_ids: &[String]) -> String {
    let mut modes: Vec<&str> = mode_ids.iter().map(String::as_str).collect();
    modes.sort_unstable();
    modes.dedup();
    let material = serde_json::json!({ "question": question, "modes": modes });
    short_hash(material.to_string().as_bytes())
}

#[derive(Debug, Default)]
struct ProvenanceState {
    context_hash: String,
    chains: BTreeMap<String, ProvenanceChain>,
}

#[derive(Serialize)]
struct ProvenanceExport<'a> {
    context_hash: &'a str,
    chain_count: usize,
    active_count: usize,
    chains: &'a BTreeMap<String, ProvenanceChain>,
}

/// In-memory provenance arena. Mutation is serialized by an internal lock;
/// readers get cloned snapshots.
#[derive(Debug, Default)]
pub struct ProvenanceTracker {
    state: RwLock<ProvenanceState>,
}

impl ProvenanceTracker {
    pub fn new(question: &str, mode_ids: &[String]) -> Self {
        Self {
            state: RwLock::new(ProvenanceState {
                context_hash: context_hash(question, mode_ids),
                chains: BTreeMap::new(),
            }),
        }
    }

    pub fn context_hash(&self) -> ProvenanceResult<String> {
        let state = self.state.read().map_err(|_| ProvenanceError::LockPoisoned)?;
        Ok(state.context_hash.clone())
    }

    /// Open the chain for a finding; idempotent.
    pub fn record_discovery(&self, mode_id: &str, finding: &Finding) -> ProvenanceResult<String> {
        let id = finding_id(mode_id, &finding.text);
        let mut state = self.state.write().map_err(|_| ProvenanceError::LockPoisoned)?;
        state
            .chains
            .entry(id.clone())
            .or_insert_with(|| ProvenanceChain {
                finding_id: id.clone(),
                origin_mode: mode_id.to_string(),
                finding_text: finding.text.clone(),
                discovery_time: Utc::now(),
                filtered: None,
                merged_from: Vec::new(),
                merged_into: None,
                synthesis_citations: Vec::new(),
            });
        Ok(id)
    }

    /// Mark a chain filtered. The first reason wins.
    pub fn record_filter(&self, finding_id: &str, reason: &str) -> ProvenanceResult<()> {
        let mut state = self.state.write().map_err(|_| ProvenanceError::LockPoisoned)?;
        let chain = state
            .chains
            .get_mut(finding_id)
            .ok_or_else(|| ProvenanceError::UnknownFinding(finding_id.to_string()))?;
        if chain.filtered.is_none() {
            debug!(finding_id, reason, "Finding filtered");
            chain.filtered = Some(FilterEvent {
                reason: reason.to_string(),
                time: Utc::now(),
            });
        }
        Ok(())
    }

    /// Merge secondaries into `primary_id`.
    ///
    /// All secondaries are checked before any is written, so a rejected call
    /// leaves the arena untouched. Filtered chains are skipped.
    pub fn record_merge(
        &self,
        primary_id: &str,
        secondary_ids: &[String],
        similarity: f64,
    ) -> ProvenanceResult<()> {
        let mut state = self.state.write().map_err(|_| ProvenanceError::LockPoisoned)?;

        let primary = state
            .chains
            .get(primary_id)
            .ok_or_else(|| ProvenanceError::UnknownFinding(primary_id.to_string()))?;
        if primary.is_filtered() {
            debug!(primary_id, "Ignoring merge into filtered finding");
            return Ok(());
        }

        let mut to_merge = Vec::new();
        let mut seen = BTreeSet::new();
        for secondary_id in secondary_ids {
            if !seen.insert(secondary_id.as_str()) {
                continue;
            }
            if secondary_id == primary_id {
                return Err(ProvenanceError::SelfMerge(primary_id.to_string()));
            }
            let secondary = state
                .chains
                .get(secondary_id)
                .ok_or_else(|| ProvenanceError::UnknownFinding(secondary_id.clone()))?;
            if secondary.is_filtered() {
                continue;
            }
            match secondary.merged_into.as_deref() {
                Some(existing) if existing == primary_id => continue,
                Some(existing) => {
                    return Err(ProvenanceError::AlreadyMerged {
                        id: secondary_id.clone(),
                        into: existing.to_string(),
                    })
                }
                None => {}
            }
            if Self::reaches(&state.chains, primary_id, secondary_id) {
                warn!(primary_id, secondary_id = %secondary_id, "Rejected cyclic merge");
                return Err(ProvenanceError::Cycle {
                    primary: primary_id.to_string(),
                    secondary: secondary_id.clone(),
                });
            }
            to_merge.push(secondary_id.clone());
        }

        let now = Utc::now();
        for secondary_id in &to_merge {
            if let Some(chain) = state.chains.get_mut(secondary_id) {
                chain.merged_into = Some(primary_id.to_string());
            }
        }
        if let Some(primary) = state.chains.get_mut(primary_id) {
            for secondary_id in to_merge {
                primary.merged_from.push(MergeEvent {
                    finding_id: secondary_id,
                    similarity,
                    time: now,
                });
            }
        }
        Ok(())
    }

    /// Whether following `merged_into` from `start` reaches `target`.
    fn reaches(chains: &BTreeMap<String, ProvenanceChain>, start: &str, target: &str) -> bool {
        let mut current = start;
        let mut steps = 0usize;
        while let Some(next) = chains.get(current).and_then(|c| c.merged_into.as_deref()) {
            if next == target {
                return true;
            }
            current = next;
            steps += 1;
            if steps > chains.len() {
                return true;
            }
        }
        false
    }

    /// Append a citation path (e.g. `findings[2]`) to a chain. Filtered
    /// chains are left untouched.
    pub fn record_synthesis_citation(&self, finding_id: &str, path: &str) -> ProvenanceResult<()> {
        let mut state = self.state.write().map_err(|_| ProvenanceError::LockPoisoned)?;
        let chain = state
            .chains
            .get_mut(finding_id)
            .ok_or_else(|| ProvenanceError::UnknownFinding(finding_id.to_string()))?;
        if chain.is_filtered() {
            debug!(finding_id, path, "Ignoring citation of filtered finding");
            return Ok(());
        }
        chain.synthesis_citations.push(path.to_string());
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.state.read().map(|s| s.chains.len()).unwrap_or(0)
    }

    pub fn active_count(&self) -> usize {
        self.state
            .read()
            .map(|s| s.chains.values().filter(|c| c.is_active()).count())
            .unwrap_or(0)
    }

    pub fn get_chain(&self, finding_id: &str) -> Option<ProvenanceChain> {
        self.state
            .read()
            .ok()
            .and_then(|s| s.chains.get(finding_id).cloned())
    }

    /// Follow `merged_into` to the surviving chain.
    pub fn resolve_root(&self, finding_id: &str) -> Option<String> {
        let state = self.state.read().ok()?;
        let mut current = state.chains.get(finding_id)?;
        while let Some(next) = current.merged_into.as_deref() {
            current = state.chains.get(next)?;
        }
        Some(current.finding_id.clone())
    }

    /// Ids of every chain (transitively) merged into `finding_id`, sorted.
    pub fn merged_sources(&self, finding_id: &str) -> Vec<String> {
        let Ok(state) = self.state.read() else {
            return Vec::new();
        };
        let mut out = BTreeSet::new();
        let mut stack = vec![finding_id.to_string()];
        while let Some(id) = stack.pop() {
            if let Some(chain) = state.chains.get(&id) {
                for merge in &chain.merged_from {
                    if out.insert(merge.finding_id.clone()) {
                        stack.push(merge.finding_id.clone());
                    }
                }
            }
        }
        out.into_iter().collect()
    }

    pub fn snapshot(&self) -> Vec<ProvenanceChain> {
        self.state
            .read()
            .map(|s| s.chains.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Stable JSON export with sorted keys.
    pub fn export(&self) -> ProvenanceResult<String> {
        let state = self.state.read().map_err(|_| ProvenanceError::LockPoisoned)?;
        let export = ProvenanceExport {
            context_hash: &state.context_hash,
            chain_count: state.chains.len(),
            active_count: state.chains.values().filter(|c| c.is_active()).count(),
            chains: &state.chains,
        };
        // Round-trip through Value so object keys come out sorted.
        let value = serde_json::to_value(&export)?;
        Ok(serde_json::to_string_pretty(&value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Confidence, ImpactLevel};

    fn finding(text: &str) -> Finding {
        Finding::new(text, ImpactLevel::High, Confidence::new(0.8).unwrap())
    }

    fn tracker() -> ProvenanceTracker {
        ProvenanceTracker::new("why?", &["mode-a".to_string(), "mode-b".to_string()])
    }

    #[test]
    fn test_discovery_idempotent() {
        let t = tracker();
        let a = t.record_discovery("mode-a", &finding("Leak")).unwrap();
        let b = t.record_discovery("mode-a", &finding("leak")).unwrap();
        assert_eq!(a, b);
        assert_eq!(t.count(), 1);
        assert_eq!(t.active_count(), 1);
    }

    #[test]
    fn test_filter_first_reason_wins() {
        let t = tracker();
        let id = t.record_discovery("mode-a", &finding("Leak")).unwrap();
        t.record_filter(&id, "low confidence").unwrap();
        t.record_filter(&id, "trimmed by limit").unwrap();
        let chain = t.get_chain(&id).unwrap();
        assert_eq!(chain.filtered.unwrap().reason, "low confidence");
        assert!(matches!(
            t.record_filter("nope", "x"),
            Err(ProvenanceError::UnknownFinding(_))
        ));
    }

    #[test]
    fn test_merge_and_transitive_chaining() {
        let t = tracker();
        let a = t.record_discovery("mode-a", &finding("A")).unwrap();
        let b = t.record_discovery("mode-b", &finding("B")).unwrap();
        let c = t.record_discovery("mode-b", &finding("C")).unwrap();

        t.record_merge(&b, &[c.clone()], 0.7).unwrap();
        t.record_merge(&a, &[b.clone()], 0.8).unwrap();

        assert_eq!(t.active_count(), 1);
        assert_eq!(t.resolve_root(&c).unwrap(), a);
        assert_eq!(t.merged_sources(&a), {
            let mut v = vec![b.clone(), c.clone()];
            v.sort();
            v
        });
        assert_eq!(t.get_chain(&a).unwrap().merged_from[0].finding_id, b);
    }

    #[test]
    fn test_merge_rejects_cycle_and_remerge() {
        let t = tracker();
        let a = t.record_discovery("mode-a", &finding("A")).unwrap();
        let b = t.record_discovery("mode-b", &finding("B")).unwrap();
        let c = t.record_discovery("mode-b", &finding("C")).unwrap();

        t.record_merge(&a, &[b.clone()], 0.9).unwrap();
        // b -> a exists; merging a into b would close a loop.
        let err = t.record_merge(&b, &[a.clone()], 0.9).unwrap_err();
        assert!(matches!(err, ProvenanceError::Cycle { .. }));

        // Same merge twice is a no-op; a different primary is rejected.
        t.record_merge(&a, &[b.clone()], 0.9).unwrap();
        let err = t.record_merge(&c, &[b.clone()], 0.9).unwrap_err();
        assert!(matches!(err, ProvenanceError::AlreadyMerged { .. }));

        let err = t.record_merge(&a, &[a.clone()], 1.0).unwrap_err();
        assert!(matches!(err, ProvenanceError::SelfMerge(_)));
        assert_eq!(t.get_chain(&a).unwrap().merged_from.len(), 1);
    }

    #[test]
    fn test_every_chain_terminates() {
        let t = tracker();
        let ids: Vec<String> = (0..6)
            .map(|i| t.record_discovery("mode-a", &finding(&format!("f{}", i))).unwrap())
            .collect();
        t.record_merge(&ids[1], &[ids[2].clone(), ids[3].clone()], 0.8).unwrap();
        t.record_merge(&ids[0], &[ids[1].clone()], 0.8).unwrap();
        t.record_merge(&ids[4], &[ids[5].clone()], 0.8).unwrap();

        for chain in t.snapshot() {
            if let Some(into) = &chain.merged_into {
                assert!(t.get_chain(into).is_some());
            }
            assert!(t.resolve_root(&chain.finding_id).is_some());
        }
    }

    #[test]
    fn test_citation_and_export_sorted() {
        let t = tracker();
        let id = t.record_discovery("mode-a", &finding("Leak")).unwrap();
        t.record_synthesis_citation(&id, "findings[0]").unwrap();
        let export = t.export().unwrap();
        let value: serde_json::Value = serde_json::from_str(&export).unwrap();
        assert_eq!(value["chain_count"], 1);
        assert_eq!(
            value["chains"][&id]["synthesis_citations"][0],
            "findings[0]"
        );
        // Keys are emitted alphabetically.
        let active = export.find("\"active_count\"").unwrap();
        let chains = export.find("\"chains\"").unwrap();
        assert!(active < chains);
        assert_eq!(export, t.export().unwrap());
    }

    #[test]
    fn test_citation_ignored_on_filtered_chain() {
        let t = tracker();
        let id = t.record_discovery("mode-a", &finding("Leak in pool")).unwrap();
        t.record_filter(&id, "below min confidence").unwrap();
        t.record_synthesis_citation(&id, "findings[0]").unwrap();

        let chain = t.get_chain(&id).unwrap();
        assert!(chain.is_filtered());
        assert!(chain.synthesis_citations.is_empty());
    }

    #[test]
    fn test_context_hash_order_independent() {
        let a = context_hash("q", &["b".to_string(), "a".to_string()]);
        let b = context_hash("q", &["a".to_string(), "b".to_string()]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert_ne!(a, context_hash("other", &["a".to_string()]));
    }
}
