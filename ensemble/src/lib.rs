//! Reasoning Ensemble Fusion Core
//!
//! Everything that happens after a set of reasoning modes has produced
//! structured answers to one question:
//!
//! - Schema decoding and normalization of mode outputs (`schema`)
//! - Mechanical merging with Jaccard deduplication and conflict detection (`merger`)
//! - Finding provenance, explanation layers, and contribution scoring
//! - Synthesis strategies with a cancellable, resumable chunk stream (`synthesis`)
//! - Run observability: coverage, velocity, redundancy, conflicts, early stop
//! - File-backed checkpoints for resuming partially completed runs (`checkpoint`)
//! - Pre-run helpers: token estimates, mode suggestions, pane assignment
//! - Run-to-run comparison (`compare`)
//!
//! Dispatching modes to agents, terminal panes, and user interfaces live
//! outside this crate; it consumes their outputs and produces fused results.
//!
//! # Usage
//!
//! ```no_run
//! use reasoning_ensemble::{parse_normalize, SynthesisInput, Synthesizer, SynthesisConfig};
//!
//! let raw = r#"{"mode_id": "deductive", "thesis": "Cache misses dominate", "confidence": 0.8}"#;
//! let (output, _warnings) = parse_normalize(raw, "deductive").unwrap();
//! let result = Synthesizer::new(SynthesisConfig::default())
//!     .synthesize(&SynthesisInput::new("Why is it slow?", vec![output]))
//!     .unwrap();
//! println!("{}", result.thesis);
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod assignment;
pub mod catalog;
pub mod checkpoint;
pub mod compare;
pub mod config;
pub mod context_pack;
pub mod contribution;
pub mod error;
pub mod estimate;
pub mod explanation;
pub mod fsutil;
pub mod merger;
pub mod observability;
pub mod provenance;
pub mod schema;
pub mod similarity;
pub mod suggest;
pub mod synthesis;
pub mod telemetry;

// Schema
pub use schema::{
    normalize_mode_id, parse, parse_normalize, Confidence, EvidencePointer, Finding, ImpactLevel,
    Likelihood, ModeOutput, Recommendation, Risk, SchemaError, SchemaResult,
};

// Merging and fusion
pub use merger::{
    merge_outputs, ConflictType, MechanicalMerger, MergeConfig, MergedOutput, PotentialConflict,
};
pub use synthesis::{
    ChunkType, Fusion, ResumeCursor, SynthesisChunk, SynthesisConfig, SynthesisError,
    SynthesisInput, SynthesisResult, SynthesisStrategy, SynthesisStream, Synthesizer,
};

// Traceability
pub use contribution::{ContributionReport, ContributionTracker, ContributionWeights};
pub use explanation::{ExplanationLayer, ExplanationTracker};
pub use provenance::{ProvenanceChain, ProvenanceTracker};

// Persistence
pub use checkpoint::{CheckpointError, CheckpointMetadata, CheckpointStore, ResumeState, RunStatus};
pub use context_pack::{ContextPack, ContextPackCache};

// Observability
pub use observability::{EarlyStopConfig, EarlyStopDetector, MetricsReport, RunMetrics, StopDecision};

// Planning
pub use assignment::{plan_assignments, Assignment, AssignmentStrategy, Pane};
pub use catalog::{ModeCatalog, ModeCategory, ModeInfo, ModeTier};
pub use estimate::{EnsembleEstimate, EstimateRequest, Estimator};
pub use suggest::{SuggestionEngine, SuggestionResult};

// Comparison, configuration, errors
pub use compare::{compare, ComparisonResult, RunSnapshot};
pub use config::{ConfigError, EnsembleConfig};
pub use error::ErrorKind;
pub use telemetry::init_tracing;
