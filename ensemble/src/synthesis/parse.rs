//! Reading a synthesizer agent's reply back into a [`SynthesisResult`].

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use super::{SynthesisError, SynthesisResult, SynthesisStrategy};
use crate::error::ValidationError;
use crate::schema::parse::{
    clean_list, decode_confidence, decode_document, normalize_findings,
    normalize_recommendations, normalize_risks, RawFinding, RawRecommendation, RawRisk,
};
use crate::schema::{normalize_mode_id, strip_code_fence, Confidence, RawScalar};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawSynthesis {
    strategy: Option<String>,
    thesis: Option<String>,
    #[serde(alias = "top_findings")]
    findings: Vec<RawFinding>,
    risks: Vec<RawRisk>,
    recommendations: Vec<RawRecommendation>,
    #[serde(alias = "questions")]
    questions_for_user: Vec<String>,
    confidence: Option<RawScalar>,
    source_modes: Vec<String>,
    generated_at: Option<String>,
}

/// Parse an agent synthesis reply (optionally fenced JSON or YAML).
/// Decode failures are fatal; field problems come back as validation errors.
pub fn parse_synthesis_output(
    raw: &str,
) -> Result<(SynthesisResult, Vec<ValidationError>), SynthesisError> {
    let body = strip_code_fence(raw);
    let doc: RawSynthesis = decode_document(body)?;
    let mut errors = Vec::new();

    let strategy = match doc.strategy.as_deref().map(str::trim) {
        Some(s) if !s.is_empty() => s.parse().unwrap_or_else(|e: SynthesisError| {
            errors.push(ValidationError::new("strategy", e.to_string()));
            SynthesisStrategy::Manual
        }),
        _ => SynthesisStrategy::Manual,
    };

    let thesis = doc.thesis.unwrap_or_default().trim().to_string();
    if thesis.is_empty() {
        errors.push(ValidationError::new("thesis", "required"));
    }

    let confidence = match doc.confidence {
        Some(ref scalar) => decode_confidence(scalar, "confidence", &mut errors),
        None => {
            errors.push(ValidationError::new("confidence", "required"));
            Confidence::ZERO
        }
    };

    let findings = normalize_findings(doc.findings, "findings", &mut errors);
    if findings.is_empty() {
        errors.push(ValidationError::new("findings", "at least one finding is required"));
    }
    let risks = normalize_risks(doc.risks, "risks", &mut errors);
    let recommendations = normalize_recommendations(doc.recommendations, "recommendations", &mut errors);

    let mut source_modes: Vec<String> = doc
        .source_modes
        .iter()
        .map(|m| normalize_mode_id(m))
        .filter(|m| !m.is_empty())
        .collect();
    source_modes.sort();
    source_modes.dedup();

    let generated_at = match doc.generated_at.as_deref().map(str::trim) {
        Some(ts) if !ts.is_empty() => match DateTime::parse_from_rfc3339(ts) {
            Ok(dt) => dt.with_timezone(&Utc),
            Err(e) => {
                errors.push(ValidationError::new(
                    "generated_at",
                    format!("invalid RFC 3339 timestamp: {}", e),
                ));
                Utc::now()
            }
        },
        _ => Utc::now(),
    };

    debug!(
        findings = findings.len(),
        issues = errors.len(),
        "Parsed synthesis output"
    );

    Ok((
        SynthesisResult {
            strategy,
            thesis,
            thesis_mode: None,
            findings,
            risks,
            recommendations,
            questions_for_user: clean_list(doc.questions_for_user),
            conflicts: Vec::new(),
            confidence,
            source_modes,
            explanation: None,
            contributions: None,
            generated_at,
        },
        errors,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ImpactLevel;

    #[test]
    fn test_parse_fenced_yaml() {
        let raw = r#"```yaml
strategy: consensus
thesis: The pool leaks on error paths
confidence: high
findings:
  - text: Connections are not returned
    impact: critical
    confidence: 0.9
recommendations:
  - text: Use a guard type
    priority: high
source_modes: [Deductive, causal, causal]
```"#;
        let (result, errors) = parse_synthesis_output(raw).unwrap();
        assert!(errors.is_empty(), "{:?}", errors);
        assert_eq!(result.strategy, SynthesisStrategy::Consensus);
        assert_eq!(result.findings[0].impact, ImpactLevel::Critical);
        assert!((result.confidence.value() - 0.8).abs() < 1e-9);
        assert_eq!(result.source_modes, vec!["causal", "deductive"]);
    }

    #[test]
    fn test_parse_json_with_issues() {
        let raw = r#"{"strategy": "coinflip", "findings": [{"text": "x", "impact": "severe", "confidence": "50%"}]}"#;
        let (result, errors) = parse_synthesis_output(raw).unwrap();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"strategy"));
        assert!(fields.contains(&"thesis"));
        assert!(fields.contains(&"confidence"));
        assert!(fields.contains(&"findings[0].impact"));
        assert_eq!(result.strategy, SynthesisStrategy::Manual);
        assert!((result.findings[0].confidence.value() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_parse_garbage_is_fatal() {
        assert!(parse_synthesis_output("").is_err());
        assert!(parse_synthesis_output("thesis: [unclosed").is_err());
    }
}
