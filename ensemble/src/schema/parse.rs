//! Lenient YAML/JSON decoding of agent replies into [`ModeOutput`].
//!
//! Structural decode failures are fatal. Field problems are collected as
//! [`ValidationError`]s and returned next to a best-effort value.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use super::types::{
    normalize_mode_id, Confidence, Finding, ImpactLevel, ModeOutput, RawScalar, Recommendation,
    Risk,
};
use super::{SchemaError, SchemaResult};
use crate::error::ValidationError;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawModeOutput {
    mode_id: Option<String>,
    thesis: Option<String>,
    #[serde(alias = "findings")]
    top_findings: Vec<RawFinding>,
    risks: Vec<RawRisk>,
    recommendations: Vec<RawRecommendation>,
    questions_for_user: Vec<String>,
    failure_modes_to_watch: Vec<String>,
    confidence: Option<RawScalar>,
    generated_at: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct RawFinding {
    #[serde(alias = "finding")]
    text: Option<String>,
    impact: Option<RawScalar>,
    confidence: Option<RawScalar>,
    #[serde(alias = "evidence")]
    evidence_pointer: Option<String>,
    reasoning: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct RawRisk {
    #[serde(alias = "risk")]
    text: Option<String>,
    impact: Option<RawScalar>,
    likelihood: Option<RawScalar>,
    mitigation: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct RawRecommendation {
    #[serde(alias = "recommendation")]
    text: Option<String>,
    priority: Option<RawScalar>,
    rationale: Option<String>,
}

/// Strip a single enclosing fenced code block whose language hint is
/// empty, `yaml`, `yml`, or `json`. Other text is returned trimmed.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some((hint, body)) = rest.split_once('\n') else {
        return trimmed;
    };
    if !matches!(
        hint.trim().to_lowercase().as_str(),
        "" | "yaml" | "yml" | "json"
    ) {
        return trimmed;
    }
    match body.trim_end().strip_suffix("```") {
        Some(inner) => inner.trim(),
        None => trimmed,
    }
}

/// Decode a document as JSON first, then YAML.
pub(crate) fn decode_document<T: for<'de> Deserialize<'de>>(text: &str) -> SchemaResult<T> {
    if text.trim().is_empty() {
        return Err(SchemaError::Empty);
    }
    match serde_json::from_str::<T>(text) {
        Ok(value) => Ok(value),
        Err(json_err) => {
            debug!(error = %json_err, "JSON decode failed, trying YAML");
            serde_yaml::from_str::<T>(text).map_err(|e| SchemaError::Parse(e.to_string()))
        }
    }
}

/// Parse an agent reply. A missing `mode_id` is reported, not injected.
pub fn parse(raw_text: &str) -> SchemaResult<(ModeOutput, Vec<ValidationError>)> {
    parse_inner(raw_text, None)
}

/// Parse an agent reply, injecting `fallback_mode_id` when `mode_id` is absent.
pub fn parse_normalize(
    raw_text: &str,
    fallback_mode_id: &str,
) -> SchemaResult<(ModeOutput, Vec<ValidationError>)> {
    parse_inner(raw_text, Some(fallback_mode_id))
}

fn parse_inner(
    raw_text: &str,
    fallback_mode_id: Option<&str>,
) -> SchemaResult<(ModeOutput, Vec<ValidationError>)> {
    let body = strip_code_fence(raw_text);
    let raw: RawModeOutput = decode_document(body)?;
    let mut errors = Vec::new();

    let mode_id = match raw.mode_id.as_deref().map(normalize_mode_id) {
        Some(id) if !id.is_empty() => id,
        _ => match fallback_mode_id.map(normalize_mode_id) {
            Some(id) if !id.is_empty() => id,
            _ => {
                errors.push(ValidationError::new("mode_id", "required"));
                String::new()
            }
        },
    };

    let thesis = raw.thesis.unwrap_or_default().trim().to_string();
    if thesis.is_empty() {
        errors.push(ValidationError::new("thesis", "required"));
    }

    let confidence = match raw.confidence {
        Some(ref scalar) => decode_confidence(scalar, "confidence", &mut errors),
        None => {
            errors.push(ValidationError::new("confidence", "required"));
            Confidence::ZERO
        }
    };

    let top_findings = normalize_findings(raw.top_findings, "top_findings", &mut errors);
    if top_findings.is_empty() {
        errors.push(ValidationError::new(
            "top_findings",
            "at least one finding is required",
        ));
    }
    let risks = normalize_risks(raw.risks, "risks", &mut errors);
    let recommendations =
        normalize_recommendations(raw.recommendations, "recommendations", &mut errors);

    let generated_at = match raw.generated_at.as_deref().map(str::trim) {
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

    let output = ModeOutput {
        mode_id,
        thesis,
        top_findings,
        risks,
        recommendations,
        questions_for_user: clean_list(raw.questions_for_user),
        failure_modes_to_watch: clean_list(raw.failure_modes_to_watch),
        confidence,
        generated_at,
        raw_output: raw_text.to_string(),
    };

    debug!(
        mode_id = %output.mode_id,
        findings = output.top_findings.len(),
        issues = errors.len(),
        "Normalized mode output"
    );

    Ok((output, errors))
}

pub(crate) fn normalize_findings(
    items: Vec<RawFinding>,
    prefix: &str,
    errors: &mut Vec<ValidationError>,
) -> Vec<Finding> {
    let mut findings = Vec::with_capacity(items.len());
    for (i, f) in items.into_iter().enumerate() {
        let path = format!("{}[{}]", prefix, i);
        let Some(text) = required_text(f.text, &path, errors) else {
            continue;
        };
        let impact = decode_impact(f.impact.as_ref(), &format!("{}.impact", path), errors);
        let confidence = match f.confidence {
            Some(ref scalar) => decode_confidence(scalar, &format!("{}.confidence", path), errors),
            None => {
                errors.push(ValidationError::new(format!("{}.confidence", path), "required"));
                Confidence::ZERO
            }
        };
        findings.push(Finding {
            text,
            impact,
            confidence,
            evidence_pointer: non_empty(f.evidence_pointer),
            reasoning: non_empty(f.reasoning),
        });
    }
    findings
}

pub(crate) fn normalize_risks(
    items: Vec<RawRisk>,
    prefix: &str,
    errors: &mut Vec<ValidationError>,
) -> Vec<Risk> {
    let mut risks = Vec::with_capacity(items.len());
    for (i, r) in items.into_iter().enumerate() {
        let path = format!("{}[{}]", prefix, i);
        let Some(text) = required_text(r.text, &path, errors) else {
            continue;
        };
        let impact = decode_impact(r.impact.as_ref(), &format!("{}.impact", path), errors);
        let likelihood = match r.likelihood {
            Some(ref scalar) => decode_confidence(scalar, &format!("{}.likelihood", path), errors),
            None => {
                errors.push(ValidationError::new(format!("{}.likelihood", path), "required"));
                Confidence::ZERO
            }
        };
        risks.push(Risk {
            text,
            impact,
            likelihood,
            mitigation: non_empty(r.mitigation),
        });
    }
    risks
}

pub(crate) fn normalize_recommendations(
    items: Vec<RawRecommendation>,
    prefix: &str,
    errors: &mut Vec<ValidationError>,
) -> Vec<Recommendation> {
    let mut recommendations = Vec::with_capacity(items.len());
    for (i, r) in items.into_iter().enumerate() {
        let path = format!("{}[{}]", prefix, i);
        let Some(text) = required_text(r.text, &path, errors) else {
            continue;
        };
        let priority = decode_impact(r.priority.as_ref(), &format!("{}.priority", path), errors);
        recommendations.push(Recommendation {
            text,
            priority,
            rationale: non_empty(r.rationale),
        });
    }
    recommendations
}

pub(crate) fn decode_confidence(
    scalar: &RawScalar,
    field: &str,
    errors: &mut Vec<ValidationError>,
) -> Confidence {
    Confidence::from_raw(scalar).unwrap_or_else(|e| {
        errors.push(ValidationError::new(field, e.to_string()));
        Confidence::ZERO
    })
}

/// Impact is mandatory; a missing or unknown literal is recorded and the
/// best-effort value falls back to medium.
fn decode_impact(
    scalar: Option<&RawScalar>,
    field: &str,
    errors: &mut Vec<ValidationError>,
) -> ImpactLevel {
    match scalar {
        Some(RawScalar::Text(s)) => s.parse().unwrap_or_else(|e: SchemaError| {
            errors.push(ValidationError::new(field, e.to_string()));
            ImpactLevel::Medium
        }),
        Some(other) => {
            errors.push(ValidationError::new(
                field,
                format!("invalid impact level: {:?}", other),
            ));
            ImpactLevel::Medium
        }
        None => {
            errors.push(ValidationError::new(field, "required"));
            ImpactLevel::Medium
        }
    }
}

fn required_text(
    text: Option<String>,
    path: &str,
    errors: &mut Vec<ValidationError>,
) -> Option<String> {
    match non_empty(text) {
        Some(text) => Some(text),
        None => {
            errors.push(ValidationError::new(format!("{}.text", path), "required"));
            None
        }
    }
}

pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub(crate) fn clean_list(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML_REPLY: &str = r#"
mode_id: Deductive
thesis: The connection pool leaks under load
confidence: high
top_findings:
  - text: Connections are never returned on error paths
    impact: critical
    confidence: 0.9
    evidence_pointer: src/db/pool.rs:118
  - text: Pool size is unbounded
    impact: medium
    confidence: 70%
risks:
  - text: Production outage during peak traffic
    impact: high
    likelihood: medium
recommendations:
  - text: Add a guard that returns connections on drop
    priority: high
questions_for_user:
  - Is the pool shared across tenants?
"#;

    #[test]
    fn test_parse_yaml() {
        let (output, errors) = parse(YAML_REPLY).unwrap();
        assert!(errors.is_empty(), "unexpected errors: {:?}", errors);
        assert_eq!(output.mode_id, "deductive");
        assert_eq!(output.confidence.value(), 0.8);
        assert_eq!(output.top_findings.len(), 2);
        assert_eq!(output.top_findings[0].impact, ImpactLevel::Critical);
        assert_eq!(
            output.top_findings[0].evidence_pointer.as_deref(),
            Some("src/db/pool.rs:118")
        );
        assert!((output.top_findings[1].confidence.value() - 0.7).abs() < 1e-9);
        assert_eq!(output.risks[0].likelihood.value(), 0.5);
        assert_eq!(output.questions_for_user.len(), 1);
        assert_eq!(output.raw_output, YAML_REPLY);
    }

    #[test]
    fn test_parse_fenced_json() {
        let raw = "```json\n{\"mode_id\": \"bayesian\", \"thesis\": \"Likely fine\", \"confidence\": 0.6, \"top_findings\": [{\"text\": \"Tests pass\", \"impact\": \"low\", \"confidence\": \"medium\"}]}\n```";
        let (output, errors) = parse(raw).unwrap();
        assert!(errors.is_empty());
        assert_eq!(output.mode_id, "bayesian");
        assert_eq!(output.top_findings[0].confidence.value(), 0.5);
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("```yaml\na: 1\n```"), "a: 1");
        assert_eq!(strip_code_fence("```\na: 1\n```\n"), "a: 1");
        assert_eq!(strip_code_fence("  a: 1  "), "a: 1");
        // Unknown language hints are left alone.
        assert_eq!(strip_code_fence("```rust\nfn x() {}\n```"), "```rust\nfn x() {}\n```");
    }

    #[test]
    fn test_parse_error_is_fatal() {
        assert!(matches!(parse(""), Err(SchemaError::Empty)));
        assert!(matches!(parse("[1, 2"), Err(SchemaError::Parse(_))));
    }

    #[test]
    fn test_missing_mode_id_reported() {
        let raw = "thesis: x\nconfidence: 0.5\ntop_findings:\n  - text: y\n    impact: low\n    confidence: 0.5\n";
        let (output, errors) = parse(raw).unwrap();
        assert_eq!(output.mode_id, "");
        assert!(errors.iter().any(|e| e.field == "mode_id"));
    }

    #[test]
    fn test_parse_normalize_injects_mode_id() {
        let raw = "thesis: x\nconfidence: 0.5\ntop_findings:\n  - text: y\n    impact: low\n    confidence: 0.5\n";
        let (output, errors) = parse_normalize(raw, "Root Cause").unwrap();
        assert_eq!(output.mode_id, "root-cause");
        assert!(errors.is_empty());
    }

    #[test]
    fn test_field_locators() {
        let raw = r#"
mode_id: m
thesis: t
confidence: 0.5
top_findings:
  - text: first
    impact: catastrophic
    confidence: 1.4
  - impact: low
    confidence: 0.5
risks:
  - text: r
    impact: low
    likelihood: maybe
"#;
        let (output, errors) = parse(raw).unwrap();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"top_findings[0].impact"));
        assert!(fields.contains(&"top_findings[0].confidence"));
        assert!(fields.contains(&"top_findings[1].text"));
        assert!(fields.contains(&"risks[0].likelihood"));
        // Best-effort object keeps the usable finding.
        assert_eq!(output.top_findings.len(), 1);
        assert_eq!(output.top_findings[0].impact, ImpactLevel::Medium);
    }

    #[test]
    fn test_generated_at_parsed() {
        let raw = "mode_id: m\nthesis: t\nconfidence: 0.5\ngenerated_at: 2026-03-01T10:00:00Z\ntop_findings:\n  - text: y\n    impact: low\n    confidence: 0.5\n";
        let (output, _) = parse(raw).unwrap();
        assert_eq!(output.generated_at.to_rfc3339(), "2026-03-01T10:00:00+00:00");
    }
}
