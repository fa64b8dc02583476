//! End-to-end fusion scenarios driven through the public API.
//!
//! Covers:
//! - Cross-mode deduplication
//! - Thesis conflict detection
//! - Coverage blind spots
//! - Similarity-based early stop and reset
//! - Checkpoint resume after an interrupted run
//! - Deterministic run comparison

use std::collections::BTreeMap;

use reasoning_ensemble::catalog::{ModeCatalog, ModeCategory, ModeTier};
use reasoning_ensemble::checkpoint::CheckpointStore;
use reasoning_ensemble::merger::{detect_conflicts, merge_outputs, ConflictType, MergeConfig};
use reasoning_ensemble::observability::{
    compute_coverage, EarlyStopConfig, EarlyStopDetector, RunMetrics, StopReason,
};
use reasoning_ensemble::provenance::context_hash;
use reasoning_ensemble::schema::{Confidence, Finding, ImpactLevel, ModeOutput};
use reasoning_ensemble::{compare, RunSnapshot, SynthesisConfig, SynthesisInput, Synthesizer};
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

fn conf(v: f64) -> Confidence {
    Confidence::new(v).unwrap()
}

fn output_with_finding(mode: &str, thesis: &str, finding: &str) -> ModeOutput {
    ModeOutput::new(mode, thesis, conf(0.8)).with_finding(Finding::new(finding, ImpactLevel::High, conf(0.8)))
}

#[test]
fn test_dedup_across_modes() {
    let a = output_with_finding(
        "mode-a",
        "The pool leaks",
        "Memory leak detected in database connection pool handler",
    );
    let b = output_with_finding(
        "mode-b",
        "Connections are not returned",
        "Memory leak detected in database connection pool handler code",
    );
    let config = MergeConfig {
        dedup_threshold: 0.6,
        max_findings: 10,
        ..MergeConfig::default()
    };

    let merged = merge_outputs(&[a.clone(), b.clone()], &config);
    assert_eq!(merged.findings.len(), 1);
    let cluster = &merged.findings[0];
    assert_eq!(cluster.source_modes, vec!["mode-a".to_string(), "mode-b".to_string()]);

    let alone = merge_outputs(std::slice::from_ref(&a), &config);
    assert!(cluster.merge_score > alone.findings[0].merge_score);
    let alone = merge_outputs(std::slice::from_ref(&b), &config);
    assert!(cluster.merge_score > alone.findings[0].merge_score);
    assert_eq!(merged.stats.deduplicated_findings, 1);
}

#[test]
fn test_thesis_conflict_detected() {
    let a = ModeOutput::new("mode-a", "We should add rate limiting to prevent abuse", conf(0.8));
    let b = ModeOutput::new("mode-b", "We should not add rate limiting as it blocks users", conf(0.7));

    let conflicts = detect_conflicts(&[a, b]);
    let thesis: Vec<_> = conflicts
        .iter()
        .filter(|c| c.conflict_type == ConflictType::Thesis)
        .collect();
    assert_eq!(thesis.len(), 1);
    assert!(thesis[0].severity >= 0.5);
}

#[test]
fn test_coverage_blind_spots() {
    let catalog = ModeCatalog::builtin();
    let report = compute_coverage(&catalog, &["deductive", "means-end"][..]);

    assert!((report.overall - 2.0 / 12.0).abs() < 1e-9);
    let expected: Vec<ModeCategory> = ModeCategory::ALL
        .iter()
        .copied()
        .filter(|c| *c != ModeCategory::Formal && *c != ModeCategory::Practical)
        .collect();
    assert_eq!(report.blind_spots, expected);

    assert_eq!(report.suggestions.len(), 10);
    for (suggestion, category) in report.suggestions.iter().zip(&expected) {
        assert_eq!(suggestion.category, *category);
        assert_eq!(suggestion.tier, ModeTier::Core);
    }
}

#[test]
fn test_early_stop_similarity_then_continue() {
    let mut detector = EarlyStopDetector::new(EarlyStopConfig {
        window_size: 3,
        ..EarlyStopConfig::default()
    });
    for mode in ["mode-a", "mode-b", "mode-c"] {
        let out = output_with_finding(mode, "Lock contention in the scheduler", &format!("finding from {}", mode));
        detector.record(&out, 500);
    }
    let decision = detector.evaluate();
    assert!(decision.should_stop);
    assert_eq!(decision.reason, StopReason::Similarity);
    assert_eq!(decision.reason.as_str(), "similarity");

    let divergent = output_with_finding("mode-d", "Disk latency spikes under compaction", "slow fsync");
    detector.record(&divergent, 500);
    let decision = detector.evaluate();
    assert!(!decision.should_stop);
    assert_eq!(decision.reason.as_str(), "continue");
}

#[test]
fn test_checkpoint_resume_after_interruption() {
    let dir = tempdir().unwrap();
    let modes = vec!["mode-1".to_string(), "mode-2".to_string()];
    let question = "Why does the build take so long?";

    {
        let store = CheckpointStore::new(dir.path());
        store
            .init_run("run-1", "session", question, &modes, &context_hash(question, &modes))
            .unwrap();
        let out = output_with_finding("mode-1", "Linking dominates", "LTO is enabled in dev");
        store.record_output("run-1", &out, 1200).unwrap();
        // store dropped without finishing the run
    }

    let store = CheckpointStore::new(dir.path());
    assert!(store.is_resumable("run-1").unwrap());
    let state = store.get_resume_state("run-1").unwrap();
    assert_eq!(state.metadata.pending_ids, vec!["mode-2".to_string()]);
    assert_eq!(state.metadata.completed_ids, vec!["mode-1".to_string()]);
    assert_eq!(state.completed.len(), 1);
    assert_eq!(state.completed[0].mode_id, "mode-1");
    assert!(state.synthesis.is_none());
}

#[test]
fn test_comparison_is_deterministic() {
    let run_a = RunSnapshot::new(
        "run-a",
        vec![
            output_with_finding("deductive", "Cache misses dominate", "Hot loop misses L2"),
            output_with_finding("causal", "Allocation churn", "Vec grows in the hot path"),
        ],
    );
    let run_b = RunSnapshot::new(
        "run-b",
        vec![
            output_with_finding("deductive", "Cache misses dominate latency", "Hot loop misses L2"),
            output_with_finding("bayesian", "Probably the allocator", "jemalloc is not used"),
        ],
    );

    let strip = |value: &mut serde_json::Value| {
        value.as_object_mut().unwrap().remove("generated_at");
    };
    let mut first = serde_json::to_value(compare(&run_a, &run_b)).unwrap();
    let mut second = serde_json::to_value(compare(&run_a, &run_b)).unwrap();
    strip(&mut first);
    strip(&mut second);
    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );

    let result = compare(&run_a, &run_b);
    assert!(result.has_changes());
    assert_eq!(result.mode_diff.added, vec!["bayesian".to_string()]);
    assert_eq!(result.mode_diff.removed, vec!["causal".to_string()]);
}

#[test]
fn test_resumed_run_feeds_metrics_and_synthesis() {
    let dir = tempdir().unwrap();
    let modes = vec!["deductive".to_string(), "means-end".to_string()];
    let store = CheckpointStore::new(dir.path());
    store.init_run("run-2", "session", "q", &modes, "hash").unwrap();
    store
        .record_output("run-2", &output_with_finding("deductive", "Add an index", "Full scan on orders"), 800)
        .unwrap();
    store
        .record_output("run-2", &output_with_finding("means-end", "Cache the query", "Query repeats per request"), 800)
        .unwrap();
    assert!(!store.is_resumable("run-2").unwrap());

    let state = store.get_resume_state("run-2").unwrap();
    let tokens = BTreeMap::from([("deductive".to_string(), 800u64), ("means-end".to_string(), 800u64)]);
    let metrics = RunMetrics::compute(&ModeCatalog::builtin(), &state.completed, &tokens, None);
    assert_eq!(metrics.coverage.blind_spots.len(), 10);
    assert_eq!(metrics.velocity.total_tokens, 1600);

    let result = Synthesizer::new(SynthesisConfig::default())
        .synthesize(&SynthesisInput::new("q", state.completed.clone()))
        .unwrap();
    assert_eq!(result.findings.len(), 2);
    assert_eq!(result.source_modes, modes);
}

#[tokio::test]
async fn test_stream_indices_are_contiguous() {
    let outputs = vec![
        output_with_finding("deductive", "Cache misses dominate", "Hot loop misses L2"),
        output_with_finding("causal", "Allocation churn", "Vec grows in the hot path"),
    ];
    let stream = Synthesizer::default().stream(SynthesisInput::new("q", outputs), CancellationToken::new());
    let (chunks, errors) = stream.collect().await;
    assert!(errors.is_empty());
    assert!(!chunks.is_empty());
    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.index, i as u64 + 1);
    }
}
