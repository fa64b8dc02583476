//! Structured mode output schema and the lenient normalizer.
//!
//! Agents reply with YAML or JSON documents shaped like [`ModeOutput`].
//! [`parse`] and [`parse_normalize`] turn that text into canonical values,
//! returning field-level [`ValidationError`](crate::error::ValidationError)s
//! alongside the best-effort object.

pub mod evidence;
pub mod parse;
pub mod types;

pub use evidence::{evidence_proximity, EvidencePointer};
pub use parse::{parse, parse_normalize, strip_code_fence};
pub use types::{
    normalize_mode_id, Confidence, Finding, ImpactLevel, Likelihood, ModeOutput, RawScalar,
    Recommendation, Risk,
};

use crate::error::ErrorKind;

/// Error type for schema decoding
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("invalid confidence: {0}")]
    InvalidConfidence(String),

    #[error("invalid impact level: {0}")]
    InvalidImpact(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("empty document")]
    Empty,
}

impl SchemaError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidConfidence(_) | Self::InvalidImpact(_) => ErrorKind::Validation,
            Self::Parse(_) | Self::Empty => ErrorKind::Parse,
        }
    }
}

/// Result type for schema operations
pub type SchemaResult<T> = Result<T, SchemaError>;
