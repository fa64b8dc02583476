//! Binding reasoning modes to agent panes.
//!
//! Three planners: round-robin over sorted panes, category affinity, and an
//! explicit `mode:agent` list. All are deterministic for a given input.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::catalog::{ModeCatalog, ModeCategory};
use crate::error::ErrorKind;

/// Agent types a pane may run.
pub const KNOWN_AGENT_TYPES: &[&str] = &["claude", "codex", "gemini", "cursor", "windsurf", "aider", "user"];

pub fn is_known_agent_type(agent_type: &str) -> bool {
    KNOWN_AGENT_TYPES.contains(&agent_type.trim().to_lowercase().as_str())
}

/// Preferred agent types per category, best first.
pub fn category_affinity(category: ModeCategory) -> &'static [&'static str] {
    match category {
        ModeCategory::Formal => &["codex", "claude", "gemini"],
        ModeCategory::Ampliative => &["claude", "gemini", "codex"],
        ModeCategory::Uncertainty => &["gemini", "claude", "codex"],
        ModeCategory::Vagueness => &["claude", "gemini"],
        ModeCategory::Change => &["claude", "codex"],
        ModeCategory::Causal => &["claude", "codex", "gemini"],
        ModeCategory::Practical => &["codex", "claude"],
        ModeCategory::Strategic => &["gemini", "claude"],
        ModeCategory::Dialectical => &["claude", "gemini"],
        ModeCategory::Modal => &["codex", "claude"],
        ModeCategory::Domain => &["codex", "claude", "gemini"],
        ModeCategory::Meta => &["claude", "gemini"],
    }
}

/// A multiplexer pane hosting one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pane {
    pub title: String,
    pub agent_type: String,
    /// Stable index assigned by the multiplexer.
    pub index: u32,
}

impl Pane {
    pub fn new(title: impl Into<String>, agent_type: impl Into<String>, index: u32) -> Self {
        Self {
            title: title.into(),
            agent_type: agent_type.into().trim().to_lowercase(),
            index,
        }
    }

    /// Agent type, trimmed and lowercased.
    pub fn agent(&self) -> String {
        self.agent_type.trim().to_lowercase()
    }

    fn hosts(&self, agent: &str) -> bool {
        self.agent_type.trim().eq_ignore_ascii_case(agent)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub mode_id: String,
    pub pane_title: String,
    pub pane_index: u32,
    pub agent_type: String,
    /// Set when the preferred agent type was unavailable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
}

impl Assignment {
    fn bind(mode_id: &str, pane: &Pane, fallback_reason: Option<String>) -> Self {
        Self {
            mode_id: mode_id.to_string(),
            pane_title: pane.title.clone(),
            pane_index: pane.index,
            agent_type: pane.agent(),
            fallback_reason,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStrategy {
    RoundRobin,
    ByCategory,
    Explicit,
}

impl std::str::FromStr for AssignmentStrategy {
    type Err = AssignmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "round_robin" => Ok(Self::RoundRobin),
            "by_category" | "category" => Ok(Self::ByCategory),
            "explicit" => Ok(Self::Explicit),
            other => Err(AssignmentError::BadSpec(format!("unknown strategy: {}", other))),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AssignmentError {
    #[error("insufficient panes: {modes} modes need panes but only {panes} available")]
    InsufficientPanes { modes: usize, panes: usize },

    #[error("bad assignment spec: {0}")]
    BadSpec(String),

    #[error("no unused {agent_type} pane for mode {mode_id}")]
    NoPaneForAgent { mode_id: String, agent_type: String },

    #[error("invalid assignment: {0}")]
    Invalid(String),
}

impl AssignmentError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Invalid
    }
}

pub type AssignmentResult<T> = Result<T, AssignmentError>;

fn sorted_panes(panes: &[Pane]) -> Vec<&Pane> {
    let mut sorted: Vec<&Pane> = panes.iter().collect();
    sorted.sort_by(|a, b| a.index.cmp(&b.index).then_with(|| a.title.cmp(&b.title)));
    sorted
}

fn ensure_capacity(modes: usize, panes: &[Pane]) -> AssignmentResult<()> {
    if panes.len() < modes {
        return Err(AssignmentError::InsufficientPanes {
            modes,
            panes: panes.len(),
        });
    }
    Ok(())
}

/// Pair the i-th sorted mode with the i-th sorted pane.
pub fn assign_round_robin(mode_ids: &[String], panes: &[Pane]) -> AssignmentResult<Vec<Assignment>> {
    ensure_capacity(mode_ids.len(), panes)?;
    let mut modes: Vec<&String> = mode_ids.iter().collect();
    modes.sort();

    let plan: Vec<Assignment> = modes
        .into_iter()
        .zip(sorted_panes(panes))
        .map(|(mode, pane)| Assignment::bind(mode, pane, None))
        .collect();
    debug!(assigned = plan.len(), "Round-robin assignment planned");
    Ok(plan)
}

/// Give each mode an unused pane of its category's best available agent
/// type, falling back to any unused pane.
pub fn assign_by_category(
    mode_ids: &[String],
    panes: &[Pane],
    catalog: &ModeCatalog,
) -> AssignmentResult<Vec<Assignment>> {
    ensure_capacity(mode_ids.len(), panes)?;
    let ordered = sorted_panes(panes);
    let mut used = vec![false; ordered.len()];
    let mut plan = Vec::with_capacity(mode_ids.len());

    for mode_id in mode_ids {
        let category = catalog.category_of(mode_id);
        let preferred = category.map(category_affinity).unwrap_or(&[]);

        let picked = preferred.iter().find_map(|agent| {
            ordered
                .iter()
                .enumerate()
                .position(|(i, pane)| !used[i] && pane.hosts(agent))
        });

        let (slot, fallback_reason) = match picked {
            Some(slot) => (slot, None),
            None => {
                let slot = used.iter().position(|u| !u).ok_or(AssignmentError::InsufficientPanes {
                    modes: mode_ids.len(),
                    panes: panes.len(),
                })?;
                let reason = match category {
                    Some(cat) => format!(
                        "no unused {} pane for {} mode",
                        preferred.join("/"),
                        cat
                    ),
                    None => "mode not in catalog".to_string(),
                };
                info!(mode_id = %mode_id, pane = %ordered[slot].title, reason = %reason, "Assignment fell back");
                (slot, Some(reason))
            }
        };

        used[slot] = true;
        plan.push(Assignment::bind(mode_id, ordered[slot], fallback_reason));
    }

    debug!(assigned = plan.len(), "Category assignment planned");
    Ok(plan)
}

/// Parse `mode:agent` pairs separated by commas or whitespace. Modes may be
/// given by id or code; both are resolved case-insensitively.
pub fn parse_explicit_spec(spec: &str, catalog: &ModeCatalog) -> AssignmentResult<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    let mut seen = BTreeSet::new();

    for item in spec.split([',', ' ', '\n', '\t']).filter(|s| !s.trim().is_empty()) {
        let (mode, agent) = item
            .split_once(':')
            .ok_or_else(|| AssignmentError::BadSpec(format!("expected mode:agent, got {:?}", item)))?;
        let (mode, agent) = (mode.trim(), agent.trim().to_lowercase());
        if mode.is_empty() || agent.is_empty() {
            return Err(AssignmentError::BadSpec(format!("empty field in {:?}", item)));
        }
        let info = catalog
            .resolve(mode)
            .ok_or_else(|| AssignmentError::BadSpec(format!("unknown mode {:?}", mode)))?;
        if !is_known_agent_type(&agent) {
            return Err(AssignmentError::BadSpec(format!("unknown agent type {:?}", agent)));
        }
        if !seen.insert(info.id.clone()) {
            return Err(AssignmentError::BadSpec(format!("mode {} listed twice", info.id)));
        }
        pairs.push((info.id.clone(), agent));
    }

    if pairs.is_empty() {
        return Err(AssignmentError::BadSpec("empty spec".to_string()));
    }
    Ok(pairs)
}

/// Bind each parsed pair to the first unused pane of the named agent type.
pub fn assign_explicit(spec: &str, panes: &[Pane], catalog: &ModeCatalog) -> AssignmentResult<Vec<Assignment>> {
    let pairs = parse_explicit_spec(spec, catalog)?;
    ensure_capacity(pairs.len(), panes)?;
    let ordered = sorted_panes(panes);
    let mut used = vec![false; ordered.len()];

    let mut plan = Vec::with_capacity(pairs.len());
    for (mode_id, agent_type) in pairs {
        let slot = ordered
            .iter()
            .enumerate()
            .position(|(i, pane)| !used[i] && pane.hosts(&agent_type))
            .ok_or_else(|| AssignmentError::NoPaneForAgent {
                mode_id: mode_id.clone(),
                agent_type: agent_type.clone(),
            })?;
        used[slot] = true;
        plan.push(Assignment::bind(&mode_id, ordered[slot], None));
    }
    debug!(assigned = plan.len(), "Explicit assignment planned");
    Ok(plan)
}

/// Check that `plan` assigns every requested mode exactly once to distinct
/// panes running recognized agent types.
pub fn validate_assignments(plan: &[Assignment], mode_ids: &[String]) -> AssignmentResult<()> {
    let requested: BTreeSet<&str> = mode_ids.iter().map(String::as_str).collect();
    let mut assigned = BTreeSet::new();
    let mut panes = BTreeSet::new();

    for a in plan {
        if !requested.contains(a.mode_id.as_str()) {
            return Err(AssignmentError::Invalid(format!("mode {} was not requested", a.mode_id)));
        }
        if !assigned.insert(a.mode_id.as_str()) {
            return Err(AssignmentError::Invalid(format!("mode {} assigned twice", a.mode_id)));
        }
        if !panes.insert((a.pane_index, a.pane_title.as_str())) {
            return Err(AssignmentError::Invalid(format!("pane {} reused", a.pane_title)));
        }
        if a.agent_type.trim().is_empty() {
            return Err(AssignmentError::Invalid(format!("mode {} has no agent type", a.mode_id)));
        }
        if !is_known_agent_type(&a.agent_type) {
            return Err(AssignmentError::Invalid(format!(
                "mode {} bound to unknown agent type {}",
                a.mode_id, a.agent_type
            )));
        }
    }

    if let Some(missing) = requested.iter().find(|m| !assigned.contains(*m)) {
        return Err(AssignmentError::Invalid(format!("mode {} is unassigned", missing)));
    }
    Ok(())
}

/// Plan with the given strategy. `spec` is only read by the explicit planner.
pub fn plan_assignments(
    strategy: AssignmentStrategy,
    mode_ids: &[String],
    panes: &[Pane],
    catalog: &ModeCatalog,
    spec: Option<&str>,
) -> AssignmentResult<Vec<Assignment>> {
    let plan = match strategy {
        AssignmentStrategy::RoundRobin => assign_round_robin(mode_ids, panes)?,
        AssignmentStrategy::ByCategory => assign_by_category(mode_ids, panes, catalog)?,
        AssignmentStrategy::Explicit => {
            let spec = spec.ok_or_else(|| AssignmentError::BadSpec("explicit strategy needs a spec".to_string()))?;
            assign_explicit(spec, panes, catalog)?
        }
    };
    let requested: Vec<String> = match strategy {
        AssignmentStrategy::Explicit => plan.iter().map(|a| a.mode_id.clone()).collect(),
        _ => mode_ids.to_vec(),
    };
    validate_assignments(&plan, &requested)?;
    Ok(plan)
}
