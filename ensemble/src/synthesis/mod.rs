//! Strategy-driven synthesis of mode outputs.
//!
//! Every strategy starts from manual fusion over the mechanical merge.
//! Strategies that need a synthesizer agent additionally get a rendered
//! prompt from [`prompt::render_synthesis_prompt`]; the agent's reply is read
//! back with [`parse::parse_synthesis_output`].

pub mod parse;
pub mod prompt;
pub mod stream;

pub use parse::parse_synthesis_output;
pub use prompt::{render_synthesis_prompt, DefaultPreamble, PreambleRenderer};
pub use stream::{ChunkType, ResumeCursor, SynthesisChunk, SynthesisStream, DEFAULT_STREAM_CAPACITY};

use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::contribution::{ContributionReport, ContributionTracker, ContributionWeights};
use crate::error::ErrorKind;
use crate::explanation::{
    confidence_basis, ConclusionExplanation, ConclusionKind, ConflictPosition, ExplanationLayer,
    ExplanationTracker,
};
use crate::merger::{MechanicalMerger, MergeConfig, MergedOutput, PotentialConflict};
use crate::provenance::ProvenanceTracker;
use crate::schema::{Confidence, Finding, ModeOutput, Recommendation, Risk, SchemaError};
use crate::similarity::{jaccard, normalize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SynthesisStrategy {
    #[default]
    Manual,
    Consensus,
    Majority,
    Weighted,
    Deferred,
}

impl SynthesisStrategy {
    /// Whether a synthesizer agent must be prompted.
    pub fn requires_agent(self) -> bool {
        matches!(self, Self::Consensus | Self::Majority | Self::Weighted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Consensus => "consensus",
            Self::Majority => "majority",
            Self::Weighted => "weighted",
            Self::Deferred => "deferred",
        }
    }
}

impl std::fmt::Display for SynthesisStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SynthesisStrategy {
    type Err = SynthesisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "manual" => Ok(Self::Manual),
            "consensus" => Ok(Self::Consensus),
            "majority" => Ok(Self::Majority),
            "weighted" => Ok(Self::Weighted),
            "deferred" => Ok(Self::Deferred),
            other => Err(SynthesisError::UnknownStrategy(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    pub strategy: SynthesisStrategy,
    pub max_findings: usize,
    pub min_confidence: f64,
    pub include_explanation: bool,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            strategy: SynthesisStrategy::Manual,
            max_findings: 20,
            min_confidence: 0.3,
            include_explanation: true,
        }
    }
}

/// Error type for synthesis
#[derive(Debug, thiserror::Error)]
pub enum SynthesisError {
    #[error("no mode outputs to synthesize")]
    NoOutputs,

    #[error("unknown synthesis strategy: {0}")]
    UnknownStrategy(String),

    #[error("synthesis cancelled")]
    Cancelled,

    #[error("stream consumer went away")]
    ChannelClosed,

    #[error("failed to encode chunk: {0}")]
    Encode(String),

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

impl SynthesisError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoOutputs | Self::UnknownStrategy(_) | Self::Encode(_) => ErrorKind::Invalid,
            Self::Cancelled | Self::ChannelClosed => ErrorKind::Cancelled,
            Self::Schema(e) => e.kind(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisResult {
    pub strategy: SynthesisStrategy,
    pub thesis: String,
    /// Mode whose thesis was selected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thesis_mode: Option<String>,
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub risks: Vec<Risk>,
    #[serde(default)]
    pub recommendations: Vec<Recommendation>,
    #[serde(default)]
    pub questions_for_user: Vec<String>,
    #[serde(default)]
    pub conflicts: Vec<PotentialConflict>,
    pub confidence: Confidence,
    #[serde(default)]
    pub source_modes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<ExplanationLayer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contributions: Option<ContributionReport>,
    pub generated_at: DateTime<Utc>,
}

/// Question plus the outputs to fuse.
#[derive(Debug, Clone)]
pub struct SynthesisInput {
    pub question: String,
    pub outputs: Vec<ModeOutput>,
    pub provenance: Option<Arc<ProvenanceTracker>>,
}

impl SynthesisInput {
    pub fn new(question: impl Into<String>, outputs: Vec<ModeOutput>) -> Self {
        Self {
            question: question.into(),
            outputs,
            provenance: None,
        }
    }

    pub fn with_provenance(mut self, tracker: Arc<ProvenanceTracker>) -> Self {
        self.provenance = Some(tracker);
        self
    }
}

/// Synthesis result together with the merge it was projected from.
#[derive(Debug, Clone)]
pub struct Fusion {
    pub result: SynthesisResult,
    pub merged: MergedOutput,
}

#[derive(Debug, Clone, Default)]
pub struct Synthesizer {
    config: SynthesisConfig,
    merge: MergeConfig,
    weights: ContributionWeights,
}

impl Synthesizer {
    pub fn new(config: SynthesisConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Base merge settings; `max_findings` and `min_confidence` are taken
    /// from the synthesis config.
    pub fn with_merge_config(mut self, merge: MergeConfig) -> Self {
        self.merge = merge;
        self
    }

    pub fn with_contribution_weights(mut self, weights: ContributionWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn config(&self) -> &SynthesisConfig {
        &self.config
    }

    pub fn synthesize(&self, input: &SynthesisInput) -> Result<SynthesisResult, SynthesisError> {
        self.fuse(input).map(|f| f.result)
    }

    /// Agent prompt for strategies that need one; `None` otherwise.
    pub fn agent_prompt(&self, input: &SynthesisInput, merged: &MergedOutput) -> Option<String> {
        self.config.strategy.requires_agent().then(|| {
            render_synthesis_prompt(&input.question, self.config.strategy, &input.outputs, merged)
        })
    }

    /// Manual fusion: mechanical merge projected to plain lists.
    pub fn fuse(&self, input: &SynthesisInput) -> Result<Fusion, SynthesisError> {
        if input.outputs.is_empty() {
            return Err(SynthesisError::NoOutputs);
        }

        let merge_config = MergeConfig {
            max_findings: self.config.max_findings,
            min_confidence: self.config.min_confidence,
            ..self.merge.clone()
        };
        let merged = MechanicalMerger::new(merge_config).merge(&input.outputs, input.provenance.as_deref());

        let thesis_output = select_thesis(&input.outputs);
        let confidence = mean_confidence(&input.outputs);

        let contributions = ContributionTracker::new(self.weights.clone());
        contributions.track_from_merge(&input.outputs, &merged);

        for (i, finding) in merged.findings.iter().enumerate() {
            for mode in &finding.source_modes {
                contributions.record_citation(mode);
            }
            if let (Some(tracker), Some(id)) = (input.provenance.as_deref(), finding.provenance_id.as_deref()) {
                if let Err(e) = tracker.record_synthesis_citation(id, &format!("findings[{}]", i)) {
                    warn!(error = %e, finding_id = id, "Failed to record citation");
                }
            }
        }

        let explanation = self
            .config
            .include_explanation
            .then(|| build_explanation(thesis_output, &merged, &input.outputs, input.provenance.as_deref()));

        if self.config.strategy.requires_agent() {
            info!(
                strategy = %self.config.strategy,
                "Strategy requires a synthesizer agent; returning mechanical fusion"
            );
        }

        let result = SynthesisResult {
            strategy: self.config.strategy,
            thesis: thesis_output.map(|o| o.thesis.clone()).unwrap_or_default(),
            thesis_mode: thesis_output.map(|o| o.mode_id.clone()),
            findings: merged.findings.iter().map(|f| f.finding.clone()).collect(),
            risks: merged.risks.iter().map(|r| r.risk.clone()).collect(),
            recommendations: merged
                .recommendations
                .iter()
                .map(|r| r.recommendation.clone())
                .collect(),
            questions_for_user: collect_questions(&input.outputs),
            conflicts: merged.conflicts.clone(),
            confidence,
            source_modes: merged.source_modes.clone(),
            explanation,
            contributions: Some(contributions.report()),
            generated_at: Utc::now(),
        };

        info!(
            strategy = %result.strategy,
            findings = result.findings.len(),
            risks = result.risks.len(),
            recommendations = result.recommendations.len(),
            confidence = result.confidence.value(),
            "Synthesis complete"
        );

        Ok(Fusion { result, merged })
    }
}

/// Highest-confidence output; ties go to the earliest `generated_at`, then
/// the lowest mode id.
fn select_thesis(outputs: &[ModeOutput]) -> Option<&ModeOutput> {
    outputs
        .iter()
        .filter(|o| !o.thesis.trim().is_empty())
        .min_by(|a, b| {
            b.confidence
                .value()
                .total_cmp(&a.confidence.value())
                .then_with(|| a.generated_at.cmp(&b.generated_at))
                .then_with(|| a.mode_id.cmp(&b.mode_id))
        })
}

fn mean_confidence(outputs: &[ModeOutput]) -> Confidence {
    if outputs.is_empty() {
        return Confidence::ZERO;
    }
    let sum: f64 = outputs.iter().map(|o| o.confidence.value()).sum();
    Confidence::new((sum / outputs.len() as f64).clamp(0.0, 1.0)).unwrap_or(Confidence::ZERO)
}

/// Questions from every output in mode order, first occurrence wins.
fn collect_questions(outputs: &[ModeOutput]) -> Vec<String> {
    let mut sorted: Vec<&ModeOutput> = outputs.iter().collect();
    sorted.sort_by(|a, b| a.mode_id.cmp(&b.mode_id));
    let mut seen = BTreeSet::new();
    sorted
        .iter()
        .flat_map(|o| o.questions_for_user.iter())
        .filter(|q| seen.insert(normalize(q)))
        .cloned()
        .collect()
}

const COUNTER_EVIDENCE_SIMILARITY: f64 = 0.3;

fn build_explanation(
    thesis_output: Option<&ModeOutput>,
    merged: &MergedOutput,
    outputs: &[ModeOutput],
    provenance: Option<&ProvenanceTracker>,
) -> ExplanationLayer {
    let mut tracker = ExplanationTracker::new();

    if let Some(output) = thesis_output {
        tracker.record_conclusion(ConclusionExplanation {
            conclusion: output.thesis.clone(),
            kind: ConclusionKind::Thesis,
            source_findings: Vec::new(),
            contributing_modes: vec![output.mode_id.clone()],
            confidence_basis: format!("highest mode confidence ({})", output.confidence),
            supporting_evidence: Vec::new(),
            counter_evidence: Vec::new(),
        });
    }

    for finding in &merged.findings {
        let mut sources: Vec<String> = finding.provenance_id.iter().cloned().collect();
        if let (Some(tracker), Some(id)) = (provenance, finding.provenance_id.as_deref()) {
            sources.extend(tracker.merged_sources(id));
        }
        let counter_evidence = merged
            .conflicts
            .iter()
            .filter_map(|c| {
                let against_a = finding.source_modes.contains(&c.mode_a)
                    && jaccard(&finding.finding.text, &c.position_a) >= COUNTER_EVIDENCE_SIMILARITY;
                let against_b = finding.source_modes.contains(&c.mode_b)
                    && jaccard(&finding.finding.text, &c.position_b) >= COUNTER_EVIDENCE_SIMILARITY;
                if against_a {
                    Some(format!("{}: {}", c.mode_b, c.position_b))
                } else if against_b {
                    Some(format!("{}: {}", c.mode_a, c.position_a))
                } else {
                    None
                }
            })
            .collect();
        tracker.record_conclusion(ConclusionExplanation {
            conclusion: finding.finding.text.clone(),
            kind: ConclusionKind::Finding,
            source_findings: sources,
            contributing_modes: finding.source_modes.clone(),
            confidence_basis: confidence_basis(&finding.source_modes),
            supporting_evidence: finding.finding.evidence_pointer.iter().cloned().collect(),
            counter_evidence,
        });
    }

    for risk in &merged.risks {
        tracker.record_conclusion(ConclusionExplanation {
            conclusion: risk.risk.text.clone(),
            kind: ConclusionKind::Risk,
            source_findings: Vec::new(),
            contributing_modes: risk.source_modes.clone(),
            confidence_basis: confidence_basis(&risk.source_modes),
            supporting_evidence: risk.risk.mitigation.iter().cloned().collect(),
            counter_evidence: Vec::new(),
        });
    }

    for rec in &merged.recommendations {
        tracker.record_conclusion(ConclusionExplanation {
            conclusion: rec.recommendation.text.clone(),
            kind: ConclusionKind::Recommendation,
            source_findings: Vec::new(),
            contributing_modes: rec.source_modes.clone(),
            confidence_basis: confidence_basis(&rec.source_modes),
            supporting_evidence: rec.recommendation.rationale.iter().cloned().collect(),
            counter_evidence: Vec::new(),
        });
    }

    let confidence_of = |mode: &str| {
        outputs
            .iter()
            .find(|o| o.mode_id == mode)
            .map(|o| o.confidence.value())
            .unwrap_or(0.0)
    };
    for conflict in &merged.conflicts {
        let (winner, position) = if confidence_of(&conflict.mode_b) > confidence_of(&conflict.mode_a) {
            (&conflict.mode_b, &conflict.position_b)
        } else {
            (&conflict.mode_a, &conflict.position_a)
        };
        tracker.record_conflict_resolution(
            &conflict.topic,
            vec![
                ConflictPosition {
                    mode_id: conflict.mode_a.clone(),
                    position: conflict.position_a.clone(),
                },
                ConflictPosition {
                    mode_id: conflict.mode_b.clone(),
                    position: conflict.position_b.clone(),
                },
            ],
            position,
            &format!("manual fusion kept the higher-confidence position from {}", winner),
        );
    }

    tracker.generate_layer()
}
