//! Early-stop detection over a sliding window of mode outputs.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::schema::ModeOutput;
use crate::similarity::{jaccard_sets, tokenize};

/// Rate warnings fire when the rate is within this factor above threshold.
pub const RATE_WARNING_MARGIN: f64 = 1.1;
/// Similarity warnings fire at this fraction of the threshold.
pub const SIMILARITY_WARNING_MARGIN: f64 = 0.9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EarlyStopConfig {
    pub enabled: bool,
    /// Never stop before this many outputs have arrived.
    pub min_agents_before_stop: usize,
    /// Stop when findings per token in the window drop below this.
    pub findings_threshold: f64,
    /// Stop when mean pairwise thesis similarity reaches this.
    pub similarity_threshold: f64,
    /// Trailing outputs considered; 0 means all.
    pub window_size: usize,
}

impl Default for EarlyStopConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_agents_before_stop: 3,
            findings_threshold: 0.001,
            similarity_threshold: 0.8,
            window_size: 3,
        }
    }
}

impl EarlyStopConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.findings_threshold < 0.0 {
            issues.push("early_stop.findings_threshold must be >= 0".to_string());
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            issues.push("early_stop.similarity_threshold must be in [0, 1]".to_string());
        }
        issues
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Disabled,
    MinAgents,
    FindingsRate,
    Similarity,
    FindingsRateAndSimilarity,
    Continue,
}

impl StopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::MinAgents => "min_agents",
            Self::FindingsRate => "findings_rate",
            Self::Similarity => "similarity",
            Self::FindingsRateAndSimilarity => "findings_rate_and_similarity",
            Self::Continue => "continue",
        }
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopDecision {
    pub should_stop: bool,
    pub reason: StopReason,
    pub agents_run: usize,
    /// Outputs inside the evaluation window.
    pub window: usize,
    /// Findings per token in the window; absent when no tokens were spent.
    pub findings_rate: Option<f64>,
    /// Mean pairwise thesis-signature Jaccard in the window.
    pub similarity: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
struct Sample {
    mode_id: String,
    signature: BTreeSet<String>,
    findings: usize,
    tokens: u64,
}

/// Thesis token set used to compare outputs.
pub fn thesis_signature(output: &ModeOutput) -> BTreeSet<String> {
    tokenize(&output.thesis)
}

#[derive(Debug, Clone, Default)]
pub struct EarlyStopDetector {
    config: EarlyStopConfig,
    samples: Vec<Sample>,
}

impl EarlyStopDetector {
    pub fn new(config: EarlyStopConfig) -> Self {
        Self {
            config,
            samples: Vec::new(),
        }
    }

    pub fn config(&self) -> &EarlyStopConfig {
        &self.config
    }

    pub fn agents_run(&self) -> usize {
        self.samples.len()
    }

    /// Record an output in arrival order.
    pub fn record(&mut self, output: &ModeOutput, tokens: u64) {
        self.samples.push(Sample {
            mode_id: output.mode_id.clone(),
            signature: thesis_signature(output),
            findings: output.top_findings.len(),
            tokens,
        });
    }

    fn window(&self) -> &[Sample] {
        let size = self.config.window_size;
        if size == 0 || size >= self.samples.len() {
            &self.samples
        } else {
            &self.samples[self.samples.len() - size..]
        }
    }

    pub fn evaluate(&self) -> StopDecision {
        let agents_run = self.samples.len();
        let window = self.window();
        let mut decision = StopDecision {
            should_stop: false,
            reason: StopReason::Continue,
            agents_run,
            window: window.len(),
            findings_rate: None,
            similarity: 0.0,
            warnings: Vec::new(),
        };

        if !self.config.enabled {
            decision.reason = StopReason::Disabled;
            return decision;
        }
        if agents_run < self.config.min_agents_before_stop {
            decision.reason = StopReason::MinAgents;
            return decision;
        }

        let tokens: u64 = window.iter().map(|s| s.tokens).sum();
        let findings: usize = window.iter().map(|s| s.findings).sum();
        decision.findings_rate = (tokens > 0).then(|| findings as f64 / tokens as f64);
        decision.similarity = mean_pairwise_similarity(window);

        let rate_fires = decision
            .findings_rate
            .map(|rate| rate < self.config.findings_threshold)
            .unwrap_or(false);
        let similarity_fires = window.len() >= 2 && decision.similarity >= self.config.similarity_threshold;

        decision.reason = match (rate_fires, similarity_fires) {
            (true, true) => StopReason::FindingsRateAndSimilarity,
            (true, false) => StopReason::FindingsRate,
            (false, true) => StopReason::Similarity,
            (false, false) => StopReason::Continue,
        };
        decision.should_stop = rate_fires || similarity_fires;

        if let Some(rate) = decision.findings_rate {
            if !rate_fires && rate < self.config.findings_threshold * RATE_WARNING_MARGIN {
                warn!(rate, threshold = self.config.findings_threshold, "Findings rate near early-stop threshold");
                decision.warnings.push(format!(
                    "findings rate {:.5} is within 10% of the threshold {:.5}",
                    rate, self.config.findings_threshold
                ));
            }
        }
        if !similarity_fires
            && window.len() >= 2
            && decision.similarity >= self.config.similarity_threshold * SIMILARITY_WARNING_MARGIN
        {
            warn!(
                similarity = decision.similarity,
                threshold = self.config.similarity_threshold,
                "Thesis similarity near early-stop threshold"
            );
            decision.warnings.push(format!(
                "thesis similarity {:.2} is within 10% of the threshold {:.2}",
                decision.similarity, self.config.similarity_threshold
            ));
        }

        if decision.should_stop {
            let window_modes: Vec<&str> = window.iter().map(|s| s.mode_id.as_str()).collect();
            info!(reason = %decision.reason, agents_run, window = ?window_modes, "Early stop recommended");
        } else {
            debug!(reason = %decision.reason, agents_run, "Early stop check");
        }
        decision
    }
}

fn mean_pairwise_similarity(window: &[Sample]) -> f64 {
    let mut total = 0.0;
    let mut pairs = 0usize;
    for i in 0..window.len() {
        for j in (i + 1)..window.len() {
            total += jaccard_sets(&window[i].signature, &window[j].signature);
            pairs += 1;
        }
    }
    if pairs == 0 {
        0.0
    } else {
        total / pairs as f64
    }
}
