//! Prompt rendering: per-mode preambles and the agent synthesis prompt.

use crate::catalog::ModeInfo;
use crate::context_pack::ContextPack;
use crate::merger::MergedOutput;
use crate::schema::ModeOutput;

use super::SynthesisStrategy;

/// Output contract every mode reply must follow.
pub const MODE_OUTPUT_SCHEMA: &str = "\
mode_id: <your mode id>
thesis: <one-sentence main claim>
confidence: <0.0-1.0 or very low|low|medium|high|very high>
top_findings:
  - text: <finding>
    impact: critical|high|medium|low
    confidence: <0.0-1.0>
    evidence_pointer: <file[:line], optional>
    reasoning: <optional>
risks:
  - text: <risk>
    impact: critical|high|medium|low
    likelihood: <0.0-1.0>
    mitigation: <optional>
recommendations:
  - text: <action>
    priority: critical|high|medium|low
    rationale: <optional>
questions_for_user: [<question>]
failure_modes_to_watch: [<failure mode>]";

/// Output contract for a synthesizer agent reply.
pub const SYNTHESIS_OUTPUT_SCHEMA: &str = "\
strategy: <strategy>
thesis: <fused main claim>
confidence: <0.0-1.0>
findings:
  - text: <finding>
    impact: critical|high|medium|low
    confidence: <0.0-1.0>
    evidence_pointer: <file[:line], optional>
risks:
  - text: <risk>
    impact: critical|high|medium|low
    likelihood: <0.0-1.0>
recommendations:
  - text: <action>
    priority: critical|high|medium|low
questions_for_user: [<question>]
source_modes: [<mode id>]";

/// Renders the preamble that opens a mode's prompt.
pub trait PreambleRenderer: Send + Sync {
    fn render(&self, mode: &ModeInfo, question: &str, context: Option<&ContextPack>) -> String;

    /// Renderer name for logging.
    fn name(&self) -> &str;
}

/// Built-in preamble template.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPreamble;

impl PreambleRenderer for DefaultPreamble {
    fn render(&self, mode: &ModeInfo, question: &str, context: Option<&ContextPack>) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "You are reasoning in the {} mode ({}, {} category).\n{}\n\n",
            mode.name, mode.code, mode.category, mode.description
        ));
        out.push_str(&format!("## Question\n{}\n\n", question.trim()));

        if let Some(pack) = context {
            let brief = &pack.project_brief;
            out.push_str("## Project context\n");
            if !brief.name.is_empty() {
                out.push_str(&format!("Project: {}\n", brief.name));
            }
            if !brief.description.is_empty() {
                out.push_str(&format!("{}\n", brief.description));
            }
            if !brief.languages.is_empty() {
                out.push_str(&format!("Languages: {}\n", brief.languages.join(", ")));
            }
            if !brief.frameworks.is_empty() {
                out.push_str(&format!("Frameworks: {}\n", brief.frameworks.join(", ")));
            }
            let user = &pack.user_context;
            if !user.problem_statement.is_empty() {
                out.push_str(&format!("Problem: {}\n", user.problem_statement));
            }
            for (label, items) in [
                ("Focus areas", &user.focus_areas),
                ("Constraints", &user.constraints),
                ("Success criteria", &user.success_criteria),
            ] {
                if !items.is_empty() {
                    out.push_str(&format!("{}: {}\n", label, items.join("; ")));
                }
            }
            out.push('\n');
        }

        out.push_str("## Reply format\nReply with a single YAML document:\n```yaml\n");
        out.push_str(MODE_OUTPUT_SCHEMA);
        out.push_str("\n```\n");
        out
    }

    fn name(&self) -> &str {
        "default"
    }
}

/// Prompt for a synthesizer agent: the question, each mode's thesis, the
/// mechanically merged items, detected conflicts, and the reply schema.
pub fn render_synthesis_prompt(
    question: &str,
    strategy: SynthesisStrategy,
    outputs: &[ModeOutput],
    merged: &MergedOutput,
) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "You are synthesizing {} reasoning modes using the {} strategy.\n\n",
        outputs.len(),
        strategy
    ));
    out.push_str(&format!("## Question\n{}\n\n", question.trim()));

    let mut sorted: Vec<&ModeOutput> = outputs.iter().collect();
    sorted.sort_by(|a, b| a.mode_id.cmp(&b.mode_id));
    out.push_str("## Mode theses\n");
    for output in sorted {
        out.push_str(&format!(
            "- {} (confidence {}): {}\n",
            output.mode_id, output.confidence, output.thesis
        ));
    }

    out.push_str("\n## Merged findings\n");
    for (i, f) in merged.findings.iter().enumerate() {
        out.push_str(&format!(
            "{}. [{}] {} (score {:.2}; {})\n",
            i + 1,
            f.finding.impact,
            f.finding.text,
            f.merge_score,
            f.source_modes.join(", ")
        ));
    }

    if !merged.risks.is_empty() {
        out.push_str("\n## Merged risks\n");
        for r in &merged.risks {
            out.push_str(&format!("- [{}] {}\n", r.risk.impact, r.risk.text));
        }
    }
    if !merged.recommendations.is_empty() {
        out.push_str("\n## Merged recommendations\n");
        for r in &merged.recommendations {
            out.push_str(&format!(
                "- [{}] {}\n",
                r.recommendation.priority, r.recommendation.text
            ));
        }
    }
    if !merged.conflicts.is_empty() {
        out.push_str("\n## Conflicts to resolve\n");
        for c in &merged.conflicts {
            out.push_str(&format!(
                "- {} ({}): {} says \"{}\"; {} says \"{}\"\n",
                c.topic, c.conflict_type, c.mode_a, c.position_a, c.mode_b, c.position_b
            ));
        }
    }

    out.push_str(&format!(
        "\n## Instructions\n{}\nReply with a single YAML document:\n```yaml\n{}\n```\n",
        strategy_instructions(strategy),
        SYNTHESIS_OUTPUT_SCHEMA
    ));
    out
}

fn strategy_instructions(strategy: SynthesisStrategy) -> &'static str {
    match strategy {
        SynthesisStrategy::Consensus => "Keep only conclusions every mode would accept; say where consensus fails.",
        SynthesisStrategy::Majority => "Resolve each disagreement by the position most modes hold.",
        SynthesisStrategy::Weighted => "Weigh each position by its mode's confidence and the finding's merge score.",
        SynthesisStrategy::Manual | SynthesisStrategy::Deferred => {
            "Summarize faithfully and leave disagreements for the user to decide."
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ModeCatalog;
    use crate::context_pack::{ProjectBrief, UserContext};
    use crate::merger::{merge_outputs, MergeConfig};
    use crate::schema::{Confidence, Finding, ImpactLevel};

    #[test]
    fn test_default_preamble_includes_context() {
        let catalog = ModeCatalog::builtin();
        let mode = catalog.get("bayesian").unwrap();
        let pack = ContextPack {
            project_brief: ProjectBrief {
                name: "billing".into(),
                languages: vec!["rust".into(), "sql".into()],
                ..ProjectBrief::default()
            },
            user_context: UserContext {
                constraints: vec!["no downtime".into()],
                ..UserContext::default()
            },
            ..ContextPack::default()
        };
        let text = DefaultPreamble.render(mode, "Should we shard?", Some(&pack));
        assert!(text.contains("Bayesian mode (C1, Uncertainty category)"));
        assert!(text.contains("Should we shard?"));
        assert!(text.contains("Languages: rust, sql"));
        assert!(text.contains("Constraints: no downtime"));
        assert!(text.contains("top_findings:"));
    }

    #[test]
    fn test_synthesis_prompt_lists_theses_and_findings() {
        let c = Confidence::new(0.7).unwrap();
        let outputs = vec![
            ModeOutput::new("b", "second view", c).with_finding(Finding::new("lock contention", ImpactLevel::High, c)),
            ModeOutput::new("a", "first view", c),
        ];
        let merged = merge_outputs(&outputs, &MergeConfig::default());
        let text = render_synthesis_prompt("Why slow?", SynthesisStrategy::Majority, &outputs, &merged);
        let a = text.find("- a (").unwrap();
        let b = text.find("- b (").unwrap();
        assert!(a < b);
        assert!(text.contains("1. [high] lock contention"));
        assert!(text.contains("majority strategy"));
        assert!(text.contains("source_modes:"));
    }
}
