//! Pairwise conflict detection between mode outputs.
//!
//! Three channels run over every ordered pair of outputs: thesis sentiment,
//! risk severity disagreement, and opposing recommendations. The keyword
//! vocabularies below are closed; changing them changes detection output.

use serde::{Deserialize, Serialize};

use super::grouping::{contains_word, word_padded};
use crate::schema::ModeOutput;
use crate::similarity::{jaccard, jaccard_sets, tokenize};

/// Minimum topic similarity for the thesis channel.
pub const THESIS_TOPIC_THRESHOLD: f64 = 0.3;
/// Minimum risk-text similarity for the severity channel.
pub const SEVERITY_TOPIC_THRESHOLD: f64 = 0.5;
/// Minimum rank gap for the severity channel.
pub const SEVERITY_RANK_GAP: u8 = 2;
/// Minimum text similarity for the recommendation channel.
pub const RECOMMENDATION_TOPIC_THRESHOLD: f64 = 0.3;

const POSITIVE_INDICATORS: &[&str] = &[
    "should",
    "must",
    "recommend",
    "add",
    "enable",
    "increase",
    "adopt",
    "implement",
    "use",
    "keep",
    "support",
    "beneficial",
    "improve",
    "necessary",
    "essential",
];

const NEGATIVE_INDICATORS: &[&str] = &[
    "should not",
    "must not",
    "shouldn't",
    "do not",
    "don't",
    "not recommended",
    "avoid",
    "against",
    "reject",
    "unnecessary",
    "harmful",
    "never",
    "disable",
    "remove",
];

const OPPOSING_ACTIONS: &[(&str, &str)] = &[
    ("add", "remove"),
    ("enable", "disable"),
    ("increase", "decrease"),
    ("use", "avoid"),
    ("implement", "remove"),
    ("keep", "delete"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictType {
    Thesis,
    Severity,
    Recommendation,
}

impl ConflictType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Thesis => "thesis",
            Self::Severity => "severity",
            Self::Recommendation => "recommendation",
        }
    }
}

impl std::fmt::Display for ConflictType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Two modes taking incompatible positions on the same topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PotentialConflict {
    pub topic: String,
    pub mode_a: String,
    pub mode_b: String,
    pub position_a: String,
    pub position_b: String,
    #[serde(rename = "type")]
    pub conflict_type: ConflictType,
    /// In [0, 1]. Scales differ per channel.
    pub severity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

fn has_phrase(padded: &str, phrase: &str) -> bool {
    contains_word(padded, word_padded(phrase).trim())
}

fn sentiment(text: &str) -> Sentiment {
    let padded = word_padded(text);
    if NEGATIVE_INDICATORS.iter().any(|p| has_phrase(&padded, p)) {
        Sentiment::Negative
    } else if POSITIVE_INDICATORS.iter().any(|p| has_phrase(&padded, p)) {
        Sentiment::Positive
    } else {
        Sentiment::Neutral
    }
}

fn opposed(a: Sentiment, b: Sentiment) -> bool {
    matches!(
        (a, b),
        (Sentiment::Positive, Sentiment::Negative) | (Sentiment::Negative, Sentiment::Positive)
    )
}

/// Tokens shared by both texts, sorted and space-joined.
fn shared_topic(a: &str, b: &str) -> String {
    let left = tokenize(a);
    let right = tokenize(b);
    left.intersection(&right)
        .cloned()
        .collect::<Vec<_>>()
        .join(" ")
}

/// `should` without a negation on one side, `should not` on the other.
fn should_opposed(a: &str, b: &str) -> bool {
    let negated = |padded: &str| {
        has_phrase(padded, "should not") || has_phrase(padded, "shouldn't")
    };
    let (a, b) = (word_padded(a), word_padded(b));
    let a_neg = negated(&a);
    let b_neg = negated(&b);
    (has_phrase(&a, "should") && !a_neg && b_neg) || (has_phrase(&b, "should") && !b_neg && a_neg)
}

fn actions_opposed(a: &str, b: &str) -> bool {
    let (pa, pb) = (word_padded(a), word_padded(b));
    OPPOSING_ACTIONS.iter().any(|(x, y)| {
        (has_phrase(&pa, x) && has_phrase(&pb, y)) || (has_phrase(&pa, y) && has_phrase(&pb, x))
    }) || should_opposed(a, b)
}

/// Thesis channel for one pair.
pub fn detect_thesis_conflict(a: &ModeOutput, b: &ModeOutput) -> Option<PotentialConflict> {
    let similarity = jaccard(&a.thesis, &b.thesis);
    if similarity < THESIS_TOPIC_THRESHOLD {
        return None;
    }
    if !opposed(sentiment(&a.thesis), sentiment(&b.thesis)) {
        return None;
    }
    Some(PotentialConflict {
        topic: shared_topic(&a.thesis, &b.thesis),
        mode_a: a.mode_id.clone(),
        mode_b: b.mode_id.clone(),
        position_a: a.thesis.clone(),
        position_b: b.thesis.clone(),
        conflict_type: ConflictType::Thesis,
        severity: (0.5 + 0.5 * similarity).min(1.0),
    })
}

/// Severity channel: the same risk rated at least two levels apart.
pub fn detect_severity_conflicts(a: &ModeOutput, b: &ModeOutput) -> Vec<PotentialConflict> {
    let mut conflicts = Vec::new();
    for risk_a in &a.risks {
        let tokens_a = tokenize(&risk_a.text);
        for risk_b in &b.risks {
            if jaccard_sets(&tokens_a, &tokenize(&risk_b.text)) < SEVERITY_TOPIC_THRESHOLD {
                continue;
            }
            let gap = risk_a.impact.rank().abs_diff(risk_b.impact.rank());
            if gap < SEVERITY_RANK_GAP {
                continue;
            }
            conflicts.push(PotentialConflict {
                topic: risk_a.text.clone(),
                mode_a: a.mode_id.clone(),
                mode_b: b.mode_id.clone(),
                position_a: risk_a.impact.as_str().to_string(),
                position_b: risk_b.impact.as_str().to_string(),
                conflict_type: ConflictType::Severity,
                severity: f64::from(gap) / 3.0,
            });
        }
    }
    conflicts
}

/// Recommendation channel: similar recommendations with opposing actions.
pub fn detect_recommendation_conflicts(a: &ModeOutput, b: &ModeOutput) -> Vec<PotentialConflict> {
    let mut conflicts = Vec::new();
    for rec_a in &a.recommendations {
        for rec_b in &b.recommendations {
            let similarity = jaccard(&rec_a.text, &rec_b.text);
            if similarity < RECOMMENDATION_TOPIC_THRESHOLD {
                continue;
            }
            if !actions_opposed(&rec_a.text, &rec_b.text) {
                continue;
            }
            conflicts.push(PotentialConflict {
                topic: shared_topic(&rec_a.text, &rec_b.text),
                mode_a: a.mode_id.clone(),
                mode_b: b.mode_id.clone(),
                position_a: rec_a.text.clone(),
                position_b: rec_b.text.clone(),
                conflict_type: ConflictType::Recommendation,
                severity: (0.5 + 0.5 * similarity).min(1.0),
            });
        }
    }
    conflicts
}

/// Run every channel over each output pair. Pairs are visited in mode_id
/// order, so `mode_a < mode_b` in every result.
pub fn detect_conflicts(outputs: &[ModeOutput]) -> Vec<PotentialConflict> {
    let mut sorted: Vec<&ModeOutput> = outputs.iter().collect();
    sorted.sort_by(|a, b| a.mode_id.cmp(&b.mode_id));

    let mut conflicts = Vec::new();
    for (i, a) in sorted.iter().enumerate() {
        for b in sorted.iter().skip(i + 1) {
            if a.mode_id == b.mode_id {
                continue;
            }
            if let Some(conflict) = detect_thesis_conflict(a, b) {
                conflicts.push(conflict);
            }
            conflicts.extend(detect_severity_conflicts(a, b));
            conflicts.extend(detect_recommendation_conflicts(a, b));
        }
    }
    conflicts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Confidence, ImpactLevel, Recommendation, Risk};

    fn output(mode: &str, thesis: &str) -> ModeOutput {
        ModeOutput::new(mode, thesis, Confidence::new(0.7).unwrap())
    }

    #[test]
    fn test_thesis_conflict_rate_limiting() {
        let a = output("mode-a", "We should add rate limiting to prevent abuse");
        let b = output("mode-b", "We should not add rate limiting as it blocks users");
        let conflicts = detect_conflicts(&[b, a]);
        assert_eq!(conflicts.len(), 1);
        let conflict = &conflicts[0];
        assert_eq!(conflict.conflict_type, ConflictType::Thesis);
        assert_eq!(conflict.mode_a, "mode-a");
        assert_eq!(conflict.mode_b, "mode-b");
        assert!(conflict.severity >= 0.5);
        assert!(conflict.topic.contains("rate"));
    }

    #[test]
    fn test_no_thesis_conflict_when_agreeing() {
        let a = output("a", "We should add rate limiting");
        let b = output("b", "We should add rate limiting soon");
        assert!(detect_conflicts(&[a, b]).is_empty());
    }

    #[test]
    fn test_no_thesis_conflict_on_unrelated_topics() {
        let a = output("a", "Adopt the new build cache");
        let b = output("b", "Never ship on fridays");
        assert!(detect_thesis_conflict(&a, &b).is_none());
    }

    #[test]
    fn test_severity_conflict() {
        let conf = Confidence::new(0.5).unwrap();
        let a = output("a", "x").with_risk(Risk::new("data loss on failover", ImpactLevel::Critical, conf));
        let b = output("b", "y").with_risk(Risk::new("data loss on failover", ImpactLevel::Low, conf));
        let conflicts = detect_severity_conflicts(&a, &b);
        assert_eq!(conflicts.len(), 1);
        assert!((conflicts[0].severity - 1.0).abs() < 1e-9);
        assert_eq!(conflicts[0].position_a, "critical");

        let c = output("c", "z").with_risk(Risk::new("data loss on failover", ImpactLevel::High, conf));
        assert!(detect_severity_conflicts(&a, &c).is_empty());
    }

    #[test]
    fn test_recommendation_conflict_opposing_actions() {
        let a = output("a", "alpha").with_recommendation(Recommendation::new(
            "Enable the request cache",
            ImpactLevel::High,
        ));
        let b = output("b", "beta").with_recommendation(Recommendation::new(
            "Disable the request cache",
            ImpactLevel::Medium,
        ));
        let conflicts = detect_recommendation_conflicts(&a, &b);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].conflict_type, ConflictType::Recommendation);
    }

    #[test]
    fn test_recommendation_should_versus_should_not() {
        assert!(actions_opposed(
            "We should cache responses",
            "We should not cache responses"
        ));
        assert!(!actions_opposed("We should cache", "We should cache more"));
    }

    #[test]
    fn test_sentiment_negative_wins() {
        assert_eq!(sentiment("We should not do this"), Sentiment::Negative);
        assert_eq!(sentiment("We should do this"), Sentiment::Positive);
        assert_eq!(sentiment("The sky is blue"), Sentiment::Neutral);
    }
}
