//! Pre-run token projection for an ensemble.
//!
//! Each requested mode is costed as its rendered preamble, the context it
//! carries, and its typical output clipped to the per-mode cap. When the
//! run would exceed the total budget, cheaper same-category modes are
//! offered as alternatives.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::catalog::{ModeCatalog, ModeInfo};
use crate::context_pack::ContextPack;
use crate::error::ErrorKind;
use crate::synthesis::{DefaultPreamble, PreambleRenderer};

/// Minimum absolute saving for an alternative to be offered.
pub const MIN_ALTERNATIVE_SAVING: u32 = 200;
/// Minimum relative saving, as a fraction of the mode's current total.
pub const MIN_ALTERNATIVE_SAVING_RATIO: f64 = 0.10;
/// Alternatives offered per over-budget mode.
pub const MAX_ALTERNATIVES: usize = 3;

/// Costs the two halves of a mode invocation: the rendered prompt and the
/// mode's answer.
pub trait TokenEstimator {
    /// Tokens in rendered prompt text.
    fn prompt_tokens(&self, text: &str) -> u32;

    /// Tokens the mode is expected to answer with, clipped to `cap`.
    fn output_tokens(&self, mode: &ModeInfo, cap: u32) -> u32 {
        mode.typical_output.min(cap)
    }

    fn name(&self) -> &str;
}

/// Prompt tokens from a chars-per-token ratio; output from the catalog's
/// `typical_output` scaled by `output_scale`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CharRatioEstimator {
    pub chars_per_token: f64,
    /// Multiplier on `typical_output`, e.g. 1.5 for verbose providers.
    pub output_scale: f64,
}

impl Default for CharRatioEstimator {
    fn default() -> Self {
        Self {
            chars_per_token: 4.0,
            output_scale: 1.0,
        }
    }
}

impl TokenEstimator for CharRatioEstimator {
    fn prompt_tokens(&self, text: &str) -> u32 {
        if self.chars_per_token <= 0.0 {
            return 0;
        }
        (text.chars().count() as f64 / self.chars_per_token).ceil() as u32
    }

    fn output_tokens(&self, mode: &ModeInfo, cap: u32) -> u32 {
        let scaled = (f64::from(mode.typical_output) * self.output_scale.max(0.0)).ceil();
        clamp_u32(scaled as u64).min(cap)
    }

    fn name(&self) -> &str {
        "char_ratio"
    }
}

/// Token budget for one ensemble run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimateBudget {
    /// Cap on any single mode's output tokens.
    pub per_mode: u32,
    /// Budget for the whole run, reserves included.
    pub total: u32,
    /// Held back for the synthesis pass.
    pub synthesis_reserve: u32,
    /// Held back for shared context.
    pub context_reserve: u32,
}

impl Default for EstimateBudget {
    fn default() -> Self {
        Self {
            per_mode: 6_000,
            total: 60_000,
            synthesis_reserve: 8_000,
            context_reserve: 4_000,
        }
    }
}

impl EstimateBudget {
    pub fn validate(&self) -> Result<(), String> {
        if self.per_mode == 0 {
            return Err("per_mode must be > 0".to_string());
        }
        if self.total == 0 {
            return Err("total must be > 0".to_string());
        }
        let reserves = u64::from(self.synthesis_reserve) + u64::from(self.context_reserve);
        if reserves >= u64::from(self.total) {
            return Err(format!(
                "reserves ({}) must be below total ({})",
                reserves, self.total
            ));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EstimateError {
    #[error("no modes requested")]
    NoModes,

    #[error("unknown mode: {0}")]
    UnknownMode(String),

    #[error("invalid budget: {0}")]
    InvalidBudget(String),
}

impl EstimateError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Invalid
    }
}

pub type EstimateResult<T> = Result<T, EstimateError>;

/// What to estimate.
#[derive(Debug, Clone, Default)]
pub struct EstimateRequest {
    /// Mode ids or codes.
    pub mode_ids: Vec<String>,
    pub question: String,
    pub budget: EstimateBudget,
    pub context_pack: Option<ContextPack>,
    /// Offer advanced and experimental alternatives even for an all-core run.
    pub allow_advanced: bool,
}

impl EstimateRequest {
    pub fn new(mode_ids: Vec<String>, question: impl Into<String>) -> Self {
        Self {
            mode_ids,
            question: question.into(),
            ..Self::default()
        }
    }

    pub fn with_budget(mut self, budget: EstimateBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_context(mut self, pack: ContextPack) -> Self {
        self.context_pack = Some(pack);
        self
    }

    pub fn allow_advanced(mut self, allow: bool) -> Self {
        self.allow_advanced = allow;
        self
    }
}

/// A cheaper same-category substitute for an over-budget mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeAlternative {
    pub mode_id: String,
    pub code: String,
    pub total_tokens: u32,
    pub savings: u32,
    pub value_score: f64,
    pub value_per_token: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeEstimate {
    pub mode_id: String,
    pub code: String,
    pub prompt_tokens: u32,
    pub context_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
    pub value_score: f64,
    pub value_per_token: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternatives: Vec<ModeAlternative>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleEstimate {
    pub modes: Vec<ModeEstimate>,
    pub budget: EstimateBudget,
    /// Sum of mode totals plus both reserves.
    pub estimated_total: u32,
    pub over_budget: bool,
    pub over_by: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Name of the token estimator used.
    pub estimator: String,
}

/// Projects token use for a set of modes against a budget.
pub struct Estimator<'a> {
    catalog: &'a ModeCatalog,
    tokens: Box<dyn TokenEstimator + Send + Sync>,
    preamble: Box<dyn PreambleRenderer>,
}

impl<'a> Estimator<'a> {
    pub fn new(catalog: &'a ModeCatalog) -> Self {
        Self {
            catalog,
            tokens: Box::new(CharRatioEstimator::default()),
            preamble: Box::new(DefaultPreamble),
        }
    }

    pub fn with_token_estimator(mut self, estimator: impl TokenEstimator + Send + Sync + 'static) -> Self {
        self.tokens = Box::new(estimator);
        self
    }

    pub fn with_preamble(mut self, renderer: impl PreambleRenderer + 'static) -> Self {
        self.preamble = Box::new(renderer);
        self
    }

    pub fn estimate(&self, request: &EstimateRequest) -> EstimateResult<EnsembleEstimate> {
        if request.mode_ids.is_empty() {
            return Err(EstimateError::NoModes);
        }
        request
            .budget
            .validate()
            .map_err(EstimateError::InvalidBudget)?;

        let modes = request
            .mode_ids
            .iter()
            .map(|id| {
                self.catalog
                    .resolve(id)
                    .ok_or_else(|| EstimateError::UnknownMode(id.clone()))
            })
            .collect::<EstimateResult<Vec<&ModeInfo>>>()?;

        let budget = &request.budget;
        let mut warnings = Vec::new();
        let mut estimates: Vec<ModeEstimate> = modes
            .iter()
            .map(|mode| self.estimate_mode(mode, request))
            .collect();

        for est in &estimates {
            if est.total_tokens > budget.per_mode {
                warnings.push(format!(
                    "{} estimated at {} tokens, above the per-mode cap of {}",
                    est.mode_id, est.total_tokens, budget.per_mode
                ));
            }
        }

        let mode_sum: u64 = estimates.iter().map(|e| u64::from(e.total_tokens)).sum();
        let estimated_total = clamp_u32(
            mode_sum + u64::from(budget.synthesis_reserve) + u64::from(budget.context_reserve),
        );
        let over_budget = estimated_total > budget.total;
        let over_by = estimated_total.saturating_sub(budget.total);

        if over_budget {
            warn!(
                estimated_total,
                budget = budget.total,
                over_by,
                "Ensemble estimate exceeds token budget"
            );
            warnings.push(format!(
                "estimated {} tokens exceeds the budget of {} by {}",
                estimated_total, budget.total, over_by
            ));

            let any_non_core = modes.iter().any(|m| !m.tier.is_core());
            let include_non_core = request.allow_advanced || any_non_core;
            let requested: Vec<&str> = modes.iter().map(|m| m.id.as_str()).collect();
            for (est, mode) in estimates.iter_mut().zip(&modes) {
                est.alternatives =
                    self.alternatives_for(mode, est.total_tokens, &requested, include_non_core, request);
            }
        }

        debug!(
            modes = estimates.len(),
            estimated_total,
            over_budget,
            estimator = self.tokens.name(),
            "Estimated ensemble run"
        );

        Ok(EnsembleEstimate {
            modes: estimates,
            budget: budget.clone(),
            estimated_total,
            over_budget,
            over_by,
            warnings,
            estimator: self.tokens.name().to_string(),
        })
    }

    fn estimate_mode(&self, mode: &ModeInfo, request: &EstimateRequest) -> ModeEstimate {
        let bare = self.preamble.render(mode, &request.question, None);
        let prompt_tokens = self.tokens.prompt_tokens(&bare);
        let context_tokens = match &request.context_pack {
            Some(pack) if pack.token_estimate > 0 => pack.token_estimate,
            Some(pack) => {
                let full = self.preamble.render(mode, &request.question, Some(pack));
                self.tokens.prompt_tokens(&full).saturating_sub(prompt_tokens)
            }
            None => 0,
        };
        let output_tokens = self.tokens.output_tokens(mode, request.budget.per_mode);
        let total_tokens = prompt_tokens
            .saturating_add(context_tokens)
            .saturating_add(output_tokens);

        ModeEstimate {
            mode_id: mode.id.clone(),
            code: mode.code.clone(),
            prompt_tokens,
            context_tokens,
            output_tokens,
            total_tokens,
            value_score: mode.value_score,
            value_per_token: value_per_token(mode.value_score, total_tokens),
            alternatives: Vec::new(),
        }
    }

    fn alternatives_for(
        &self,
        mode: &ModeInfo,
        current_total: u32,
        requested: &[&str],
        include_non_core: bool,
        request: &EstimateRequest,
    ) -> Vec<ModeAlternative> {
        let min_saving = MIN_ALTERNATIVE_SAVING
            .max((f64::from(current_total) * MIN_ALTERNATIVE_SAVING_RATIO).ceil() as u32);

        let mut alternatives: Vec<ModeAlternative> = self
            .catalog
            .in_category(mode.category)
            .into_iter()
            .filter(|candidate| !requested.contains(&candidate.id.as_str()))
            .filter(|candidate| include_non_core || candidate.tier.is_core())
            .filter_map(|candidate| {
                let est = self.estimate_mode(candidate, request);
                let savings = current_total.checked_sub(est.total_tokens)?;
                (savings >= min_saving).then(|| ModeAlternative {
                    mode_id: est.mode_id,
                    code: est.code,
                    total_tokens: est.total_tokens,
                    savings,
                    value_score: est.value_score,
                    value_per_token: est.value_per_token,
                })
            })
            .collect();

        alternatives.sort_by(|a, b| {
            b.value_per_token
                .total_cmp(&a.value_per_token)
                .then(b.savings.cmp(&a.savings))
                .then_with(|| a.mode_id.cmp(&b.mode_id))
        });
        alternatives.truncate(MAX_ALTERNATIVES);
        alternatives
    }
}

fn value_per_token(value_score: f64, total_tokens: u32) -> f64 {
    if total_tokens == 0 {
        0.0
    } else {
        value_score / f64::from(total_tokens)
    }
}

fn clamp_u32(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}
