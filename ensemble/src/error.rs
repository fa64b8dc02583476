//! Boundary error taxonomy.
//!
//! Every module owns its own typed error; this module defines the shared
//! vocabulary callers use to decide how to react to any of them.

use serde::{Deserialize, Serialize};

/// High-level error kind shared by every module error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Structural failure to decode agent output.
    Parse,
    /// Field-level problem in an otherwise decodable value.
    Validation,
    /// Missing checkpoint, metadata, or cache entry.
    NotFound,
    /// Caller supplied a malformed argument.
    Invalid,
    /// Token budget overrun.
    Budget,
    /// Cooperative cancellation was observed.
    Cancelled,
    /// Filesystem failure.
    Io,
}

impl ErrorKind {
    /// Whether callers should treat this kind as an empty state rather than a failure.
    pub fn is_empty_state(self) -> bool {
        matches!(self, Self::NotFound)
    }

    /// Whether retrying the same call may succeed.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Io | Self::Cancelled)
    }

    /// Suggested action for this error kind.
    pub fn suggested_action(self) -> &'static str {
        match self {
            Self::Parse => "substitute a synthetic \"no output captured\" checkpoint for the mode",
            Self::Validation => "proceed with defaults and surface the field locators",
            Self::NotFound => "treat as an empty state",
            Self::Invalid => "fix the caller arguments",
            Self::Budget => "pick one of the suggested cheaper alternatives",
            Self::Cancelled => "resume from the last checkpoint",
            Self::Io => "check storage health and retry",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse => write!(f, "parse"),
            Self::Validation => write!(f, "validation"),
            Self::NotFound => write!(f, "not_found"),
            Self::Invalid => write!(f, "invalid"),
            Self::Budget => write!(f, "budget"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Io => write!(f, "io"),
        }
    }
}

/// Non-fatal, field-scoped problem found while normalizing a value.
///
/// `field` is a JSONPath-like locator such as `top_findings[0].confidence`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Validation
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_display() {
        assert_eq!(ErrorKind::NotFound.to_string(), "not_found");
        assert_eq!(ErrorKind::Cancelled.to_string(), "cancelled");
    }

    #[test]
    fn test_kind_serde() {
        let json = serde_json::to_string(&ErrorKind::NotFound).unwrap();
        assert_eq!(json, "\"not_found\"");
    }

    #[test]
    fn test_empty_state() {
        assert!(ErrorKind::NotFound.is_empty_state());
        assert!(!ErrorKind::Io.is_empty_state());
        assert!(ErrorKind::Io.is_retryable());
        assert!(!ErrorKind::Parse.is_retryable());
    }

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::new("top_findings[0].confidence", "out of range");
        assert_eq!(err.to_string(), "top_findings[0].confidence: out of range");
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
