//! Canonical domain values produced by a reasoning mode.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use super::{SchemaError, SchemaResult};
use crate::error::ValidationError;

/// Loosely-typed scalar as it appears in agent replies.
///
/// Confidence and likelihood arrive as numbers, words, or percentages; this is
/// the single decode point for all of them.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawScalar {
    Number(f64),
    Text(String),
    Other(serde_yaml::Value),
}

/// A probability-like score in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize)]
#[serde(transparent)]
pub struct Confidence(f64);

/// Likelihood of a risk materializing; decoded exactly like [`Confidence`].
pub type Likelihood = Confidence;

impl Confidence {
    pub const ZERO: Confidence = Confidence(0.0);

    /// Create a confidence, rejecting anything outside `[0, 1]`.
    pub fn new(value: f64) -> SchemaResult<Self> {
        if value.is_finite() && (0.0..=1.0).contains(&value) {
            Ok(Self(value))
        } else {
            Err(SchemaError::InvalidConfidence(value.to_string()))
        }
    }

    pub fn value(self) -> f64 {
        self.0
    }

    /// Decode a textual confidence: a named level or an `NN%` percentage.
    pub fn parse_str(input: &str) -> SchemaResult<Self> {
        let normalized = input.trim().to_lowercase().replace(['_', '-'], " ");

        let named = match normalized.as_str() {
            "very low" => Some(0.1),
            "low" => Some(0.2),
            "medium" => Some(0.5),
            "high" => Some(0.8),
            "very high" => Some(0.95),
            _ => None,
        };
        if let Some(value) = named {
            return Self::new(value);
        }

        if let Some(number) = normalized.strip_suffix('%') {
            let pct: f64 = number
                .trim()
                .parse()
                .map_err(|_| SchemaError::InvalidConfidence(input.to_string()))?;
            return Self::new(pct / 100.0)
                .map_err(|_| SchemaError::InvalidConfidence(input.to_string()));
        }

        Err(SchemaError::InvalidConfidence(input.to_string()))
    }

    /// Decode any raw scalar form.
    pub fn from_raw(raw: &RawScalar) -> SchemaResult<Self> {
        match raw {
            RawScalar::Number(n) => Self::new(*n),
            RawScalar::Text(s) => Self::parse_str(s),
            RawScalar::Other(v) => Err(SchemaError::InvalidConfidence(format!("{:?}", v))),
        }
    }
}

impl<'de> Deserialize<'de> for Confidence {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawScalar::deserialize(deserializer)?;
        Confidence::from_raw(&raw).map_err(serde::de::Error::custom)
    }
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

/// Closed impact scale. Declaration order is most to least severe, so the
/// derived `Ord` sorts critical first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImpactLevel {
    Critical,
    High,
    Medium,
    Low,
}

impl ImpactLevel {
    pub const ALL: [ImpactLevel; 4] = [Self::Critical, Self::High, Self::Medium, Self::Low];

    /// Weight used when scoring merged items.
    pub fn weight(self) -> f64 {
        match self {
            Self::Critical => 1.0,
            Self::High => 0.8,
            Self::Medium => 0.5,
            Self::Low => 0.3,
        }
    }

    /// Severity rank: low = 0 … critical = 3.
    pub fn rank(self) -> u8 {
        match self {
            Self::Critical => 3,
            Self::High => 2,
            Self::Medium => 1,
            Self::Low => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl std::str::FromStr for ImpactLevel {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "critical" => Ok(Self::Critical),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            _ => Err(SchemaError::InvalidImpact(s.to_string())),
        }
    }
}

impl<'de> Deserialize<'de> for ImpactLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

impl std::fmt::Display for ImpactLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single observation made by a mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub text: String,
    pub impact: ImpactLevel,
    pub confidence: Confidence,
    /// `file[:line]` reference backing the finding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence_pointer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl Finding {
    pub fn new(text: impl Into<String>, impact: ImpactLevel, confidence: Confidence) -> Self {
        Self {
            text: text.into(),
            impact,
            confidence,
            evidence_pointer: None,
            reasoning: None,
        }
    }

    pub fn with_evidence(mut self, pointer: impl Into<String>) -> Self {
        self.evidence_pointer = Some(pointer.into());
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Risk {
    pub text: String,
    pub impact: ImpactLevel,
    pub likelihood: Likelihood,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mitigation: Option<String>,
}

impl Risk {
    pub fn new(text: impl Into<String>, impact: ImpactLevel, likelihood: Likelihood) -> Self {
        Self {
            text: text.into(),
            impact,
            likelihood,
            mitigation: None,
        }
    }

    pub fn with_mitigation(mut self, mitigation: impl Into<String>) -> Self {
        self.mitigation = Some(mitigation.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub text: String,
    pub priority: ImpactLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

impl Recommendation {
    pub fn new(text: impl Into<String>, priority: ImpactLevel) -> Self {
        Self {
            text: text.into(),
            priority,
            rationale: None,
        }
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = Some(rationale.into());
        self
    }
}

/// Structured output of one reasoning mode. Immutable once normalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeOutput {
    pub mode_id: String,
    pub thesis: String,
    pub top_findings: Vec<Finding>,
    #[serde(default)]
    pub risks: Vec<Risk>,
    #[serde(default)]
    pub recommendations: Vec<Recommendation>,
    #[serde(default)]
    pub questions_for_user: Vec<String>,
    #[serde(default)]
    pub failure_modes_to_watch: Vec<String>,
    pub confidence: Confidence,
    pub generated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub raw_output: String,
}

impl ModeOutput {
    /// Minimal output with a thesis and no findings; callers push findings.
    pub fn new(mode_id: &str, thesis: impl Into<String>, confidence: Confidence) -> Self {
        Self {
            mode_id: normalize_mode_id(mode_id),
            thesis: thesis.into(),
            top_findings: Vec::new(),
            risks: Vec::new(),
            recommendations: Vec::new(),
            questions_for_user: Vec::new(),
            failure_modes_to_watch: Vec::new(),
            confidence,
            generated_at: Utc::now(),
            raw_output: String::new(),
        }
    }

    pub fn with_finding(mut self, finding: Finding) -> Self {
        self.top_findings.push(finding);
        self
    }

    pub fn with_risk(mut self, risk: Risk) -> Self {
        self.risks.push(risk);
        self
    }

    pub fn with_recommendation(mut self, recommendation: Recommendation) -> Self {
        self.recommendations.push(recommendation);
        self
    }

    pub fn with_question(mut self, question: impl Into<String>) -> Self {
        self.questions_for_user.push(question.into());
        self
    }

    pub fn generated_at(mut self, at: DateTime<Utc>) -> Self {
        self.generated_at = at;
        self
    }

    /// Check structural invariants. Range invariants are enforced by the types.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.mode_id.trim().is_empty() {
            errors.push(ValidationError::new("mode_id", "required"));
        }
        if self.thesis.trim().is_empty() {
            errors.push(ValidationError::new("thesis", "required"));
        }
        if self.top_findings.is_empty() {
            errors.push(ValidationError::new(
                "top_findings",
                "at least one finding is required",
            ));
        }
        for (i, finding) in self.top_findings.iter().enumerate() {
            if finding.text.trim().is_empty() {
                errors.push(ValidationError::new(
                    format!("top_findings[{}].text", i),
                    "required",
                ));
            }
        }
        for (i, risk) in self.risks.iter().enumerate() {
            if risk.text.trim().is_empty() {
                errors.push(ValidationError::new(format!("risks[{}].text", i), "required"));
            }
        }
        for (i, rec) in self.recommendations.iter().enumerate() {
            if rec.text.trim().is_empty() {
                errors.push(ValidationError::new(
                    format!("recommendations[{}].text", i),
                    "required",
                ));
            }
        }

        errors
    }
}

/// Lowercase slug form of a mode id: trimmed, lowercased, separators collapsed to `-`.
pub fn normalize_mode_id(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .split(|c: char| c.is_whitespace() || c == '_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conf(v: f64) -> Confidence {
        Confidence::new(v).unwrap()
    }

    #[test]
    fn test_confidence_bounds() {
        assert!(Confidence::new(0.0).is_ok());
        assert!(Confidence::new(1.0).is_ok());
        assert!(Confidence::new(-f64::EPSILON).is_err());
        assert!(Confidence::new(1.0 + 1e-9).is_err());
        assert!(Confidence::new(f64::NAN).is_err());
    }

    #[test]
    fn test_confidence_named_levels() {
        assert_eq!(Confidence::parse_str("very low").unwrap().value(), 0.1);
        assert_eq!(Confidence::parse_str("Low").unwrap().value(), 0.2);
        assert_eq!(Confidence::parse_str(" medium ").unwrap().value(), 0.5);
        assert_eq!(Confidence::parse_str("HIGH").unwrap().value(), 0.8);
        assert_eq!(Confidence::parse_str("very_high").unwrap().value(), 0.95);
    }

    #[test]
    fn test_confidence_percentage() {
        assert!((Confidence::parse_str("85%").unwrap().value() - 0.85).abs() < 1e-9);
        assert!(Confidence::parse_str("120%").is_err());
        assert!(Confidence::parse_str("abc%").is_err());
    }

    #[test]
    fn test_confidence_rejects_unknown_text() {
        let err = Confidence::parse_str("pretty sure").unwrap_err();
        assert!(matches!(err, SchemaError::InvalidConfidence(_)));
    }

    #[test]
    fn test_confidence_lenient_deserialize() {
        let c: Confidence = serde_json::from_str("0.7").unwrap();
        assert_eq!(c.value(), 0.7);
        let c: Confidence = serde_json::from_str("1").unwrap();
        assert_eq!(c.value(), 1.0);
        let c: Confidence = serde_json::from_str("\"high\"").unwrap();
        assert_eq!(c.value(), 0.8);
        assert!(serde_json::from_str::<Confidence>("1.5").is_err());
        assert!(serde_json::from_str::<Confidence>("true").is_err());
    }

    #[test]
    fn test_impact_parse_and_weight() {
        assert_eq!("Critical".parse::<ImpactLevel>().unwrap(), ImpactLevel::Critical);
        assert!("severe".parse::<ImpactLevel>().is_err());
        assert_eq!(ImpactLevel::High.weight(), 0.8);
        assert_eq!(ImpactLevel::Low.weight(), 0.3);
        assert_eq!(ImpactLevel::Critical.rank() - ImpactLevel::Medium.rank(), 2);
        assert!(ImpactLevel::Critical < ImpactLevel::Low);
    }

    #[test]
    fn test_impact_serde() {
        let json = serde_json::to_string(&ImpactLevel::Medium).unwrap();
        assert_eq!(json, "\"medium\"");
        assert!(serde_json::from_str::<ImpactLevel>("\"unknown\"").is_err());
    }

    #[test]
    fn test_normalize_mode_id() {
        assert_eq!(normalize_mode_id("  Deductive Logic "), "deductive-logic");
        assert_eq!(normalize_mode_id("bayesian_update"), "bayesian-update");
        assert_eq!(normalize_mode_id("mode-a"), "mode-a");
    }

    #[test]
    fn test_validate_reports_locators() {
        let mut output = ModeOutput::new("", "", conf(0.5));
        output.top_findings.push(Finding::new("", ImpactLevel::Low, conf(0.5)));
        let errors = output.validate();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"mode_id"));
        assert!(fields.contains(&"thesis"));
        assert!(fields.contains(&"top_findings[0].text"));
    }

    #[test]
    fn test_mode_output_json_roundtrip() {
        let at = DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z")
            .unwrap()
            .with_timezone(&Utc);
        let output = ModeOutput::new("deductive", "Thesis", conf(0.8))
            .with_finding(
                Finding::new("Leak in pool", ImpactLevel::High, conf(0.9))
                    .with_evidence("src/pool.rs:42"),
            )
            .with_risk(Risk::new("Outage", ImpactLevel::Critical, conf(0.3)))
            .with_recommendation(Recommendation::new("Add tests", ImpactLevel::Medium))
            .generated_at(at);

        let json = serde_json::to_string(&output).unwrap();
        let back: ModeOutput = serde_json::from_str(&json).unwrap();
        assert_eq!(back, output);
    }
}
