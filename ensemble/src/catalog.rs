//! Reasoning-mode catalog: ids, codes, categories, tiers, and cost hints.
//!
//! Coverage, assignment, suggestion, and estimation all read the same
//! catalog. [`ModeCatalog::builtin`] ships at least one core mode per
//! category; callers may construct their own with [`ModeCatalog::new`].

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Closed set of reasoning categories, in catalog order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ModeCategory {
    Formal,
    Ampliative,
    Uncertainty,
    Vagueness,
    Change,
    Causal,
    Practical,
    Strategic,
    Dialectical,
    Modal,
    Domain,
    Meta,
}

impl ModeCategory {
    pub const ALL: [ModeCategory; 12] = [
        Self::Formal,
        Self::Ampliative,
        Self::Uncertainty,
        Self::Vagueness,
        Self::Change,
        Self::Causal,
        Self::Practical,
        Self::Strategic,
        Self::Dialectical,
        Self::Modal,
        Self::Domain,
        Self::Meta,
    ];

    /// Code prefix letter: `A` for Formal through `L` for Meta.
    pub fn letter(self) -> char {
        match self {
            Self::Formal => 'A',
            Self::Ampliative => 'B',
            Self::Uncertainty => 'C',
            Self::Vagueness => 'D',
            Self::Change => 'E',
            Self::Causal => 'F',
            Self::Practical => 'G',
            Self::Strategic => 'H',
            Self::Dialectical => 'I',
            Self::Modal => 'J',
            Self::Domain => 'K',
            Self::Meta => 'L',
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Formal => "Formal",
            Self::Ampliative => "Ampliative",
            Self::Uncertainty => "Uncertainty",
            Self::Vagueness => "Vagueness",
            Self::Change => "Change",
            Self::Causal => "Causal",
            Self::Practical => "Practical",
            Self::Strategic => "Strategic",
            Self::Dialectical => "Dialectical",
            Self::Modal => "Modal",
            Self::Domain => "Domain",
            Self::Meta => "Meta",
        }
    }
}

impl std::fmt::Display for ModeCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModeCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| format!("unknown mode category: {}", s))
    }
}

/// Maturity tier. Ordering is preference order: core first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModeTier {
    Core,
    Advanced,
    Experimental,
}

impl ModeTier {
    pub fn is_core(self) -> bool {
        self == Self::Core
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeInfo {
    pub id: String,
    pub code: String,
    pub name: String,
    pub category: ModeCategory,
    pub tier: ModeTier,
    /// Typical total tokens for one run of the mode.
    pub typical_cost: u32,
    /// Typical output tokens.
    pub typical_output: u32,
    /// Relative usefulness in [0, 1].
    pub value_score: f64,
    pub description: String,
    #[serde(default)]
    pub best_for: Vec<String>,
}

type BuiltinRow = (
    &'static str,
    &'static str,
    &'static str,
    ModeCategory,
    ModeTier,
    u32,
    u32,
    f64,
    &'static str,
    &'static [&'static str],
);

const BUILTIN: &[BuiltinRow] = &[
    ("deductive", "A1", "Deductive", ModeCategory::Formal, ModeTier::Core, 3000, 1200, 0.80,
        "Derive conclusions that follow necessarily from stated premises", &["correctness", "invariants", "proofs"]),
    ("mathematical", "A2", "Mathematical", ModeCategory::Formal, ModeTier::Advanced, 4500, 1800, 0.75,
        "Model the problem formally and reason over the model", &["algorithms", "complexity", "proofs"]),
    ("constraint", "A3", "Constraint Satisfaction", ModeCategory::Formal, ModeTier::Experimental, 5000, 1600, 0.60,
        "Encode requirements as constraints and search for consistent assignments", &["scheduling", "configuration"]),
    ("inductive", "B1", "Inductive", ModeCategory::Ampliative, ModeTier::Core, 3000, 1200, 0.75,
        "Generalize from observed cases to likely patterns", &["patterns", "trends", "logs"]),
    ("abductive", "B2", "Abductive", ModeCategory::Ampliative, ModeTier::Core, 3200, 1300, 0.85,
        "Infer the best explanation for the observed evidence", &["debugging", "diagnosis", "incidents"]),
    ("analogical", "B3", "Analogical", ModeCategory::Ampliative, ModeTier::Advanced, 3500, 1400, 0.65,
        "Transfer insight from structurally similar problems", &["design", "novel problems"]),
    ("bayesian", "C1", "Bayesian", ModeCategory::Uncertainty, ModeTier::Core, 3500, 1400, 0.80,
        "Update beliefs in proportion to evidence strength", &["risk", "estimation", "uncertainty"]),
    ("probabilistic-risk", "C2", "Probabilistic Risk", ModeCategory::Uncertainty, ModeTier::Advanced, 4200, 1700, 0.70,
        "Quantify failure likelihoods and their combined impact", &["reliability", "risk"]),
    ("evidential", "C3", "Evidential", ModeCategory::Uncertainty, ModeTier::Experimental, 4800, 1700, 0.55,
        "Combine partial and conflicting evidence without forcing priors", &["conflicting data"]),
    ("fuzzy", "D1", "Fuzzy", ModeCategory::Vagueness, ModeTier::Core, 2800, 1100, 0.60,
        "Reason with graded membership instead of crisp categories", &["thresholds", "classification"]),
    ("prototype", "D2", "Prototype", ModeCategory::Vagueness, ModeTier::Advanced, 3000, 1200, 0.55,
        "Judge cases by similarity to typical exemplars", &["categorization", "naming"]),
    ("belief-revision", "E1", "Belief Revision", ModeCategory::Change, ModeTier::Core, 3000, 1200, 0.70,
        "Revise prior conclusions minimally in light of new facts", &["migrations", "changing requirements"]),
    ("temporal", "E2", "Temporal", ModeCategory::Change, ModeTier::Advanced, 3600, 1400, 0.65,
        "Track how states and obligations evolve over time", &["ordering", "races", "lifecycles"]),
    ("causal", "F1", "Causal", ModeCategory::Causal, ModeTier::Core, 3400, 1400, 0.85,
        "Identify cause and effect chains behind the behavior", &["root cause", "incidents", "performance"]),
    ("counterfactual", "F2", "Counterfactual", ModeCategory::Causal, ModeTier::Core, 3600, 1500, 0.75,
        "Ask what would change under alternative conditions", &["tradeoffs", "postmortems"]),
    ("systems-dynamics", "F3", "Systems Dynamics", ModeCategory::Causal, ModeTier::Advanced, 4400, 1800, 0.65,
        "Model feedback loops and delays across the system", &["scaling", "capacity"]),
    ("means-end", "G1", "Means-End", ModeCategory::Practical, ModeTier::Core, 2800, 1200, 0.80,
        "Work backwards from the goal to concrete actions", &["planning", "implementation"]),
    ("decision-theoretic", "G2", "Decision Theoretic", ModeCategory::Practical, ModeTier::Advanced, 4000, 1600, 0.75,
        "Compare options by expected utility under uncertainty", &["architecture decisions", "tradeoffs"]),
    ("game-theoretic", "H1", "Game Theoretic", ModeCategory::Strategic, ModeTier::Core, 3800, 1500, 0.70,
        "Analyze incentives and best responses of interacting parties", &["security", "apis", "markets"]),
    ("adversarial", "H2", "Adversarial", ModeCategory::Strategic, ModeTier::Advanced, 4200, 1700, 0.75,
        "Attack the plan as an opponent would", &["security", "abuse", "red team"]),
    ("dialectical", "I1", "Dialectical", ModeCategory::Dialectical, ModeTier::Core, 3400, 1400, 0.70,
        "Develop thesis and antithesis toward a synthesis", &["controversial decisions", "debates"]),
    ("socratic", "I2", "Socratic", ModeCategory::Dialectical, ModeTier::Advanced, 3000, 1200, 0.60,
        "Probe assumptions through targeted questions", &["requirements", "assumptions"]),
    ("modal", "J1", "Modal", ModeCategory::Modal, ModeTier::Core, 3200, 1300, 0.60,
        "Separate what is necessary from what is merely possible", &["guarantees", "edge cases"]),
    ("deontic", "J2", "Deontic", ModeCategory::Modal, ModeTier::Advanced, 3300, 1300, 0.60,
        "Reason about obligations, permissions, and prohibitions", &["compliance", "policy"]),
    ("systems-thinking", "K1", "Systems Thinking", ModeCategory::Domain, ModeTier::Core, 3600, 1500, 0.80,
        "Treat the codebase as interacting components with emergent behavior", &["architecture", "integration"]),
    ("engineering-design", "K2", "Engineering Design", ModeCategory::Domain, ModeTier::Core, 3400, 1400, 0.80,
        "Evaluate designs against engineering constraints and conventions", &["refactoring", "apis", "code review"]),
    ("legal", "K3", "Legal", ModeCategory::Domain, ModeTier::Experimental, 4000, 1500, 0.45,
        "Read requirements and licenses as a careful counsel would", &["licensing", "compliance"]),
    ("meta-reasoning", "L1", "Meta Reasoning", ModeCategory::Meta, ModeTier::Core, 2600, 1000, 0.70,
        "Assess which reasoning approaches suit the question", &["planning the analysis", "ambiguity"]),
    ("debiasing", "L2", "Debiasing", ModeCategory::Meta, ModeTier::Advanced, 3000, 1200, 0.65,
        "Check conclusions for common cognitive biases", &["reviews", "estimates"]),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeCatalog {
    modes: Vec<ModeInfo>,
}

impl Default for ModeCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ModeCatalog {
    pub fn new(modes: Vec<ModeInfo>) -> Self {
        Self { modes }
    }

    pub fn builtin() -> Self {
        let modes = BUILTIN
            .iter()
            .map(
                |&(id, code, name, category, tier, typical_cost, typical_output, value_score, description, best_for)| {
                    ModeInfo {
                        id: id.to_string(),
                        code: code.to_string(),
                        name: name.to_string(),
                        category,
                        tier,
                        typical_cost,
                        typical_output,
                        value_score,
                        description: description.to_string(),
                        best_for: best_for.iter().map(|s| s.to_string()).collect(),
                    }
                },
            )
            .collect();
        Self { modes }
    }

    pub fn modes(&self) -> &[ModeInfo] {
        &self.modes
    }

    pub fn len(&self) -> usize {
        self.modes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modes.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&ModeInfo> {
        self.modes.iter().find(|m| m.id == id)
    }

    /// Case-insensitive code lookup.
    pub fn by_code(&self, code: &str) -> Option<&ModeInfo> {
        let code = code.trim();
        self.modes.iter().find(|m| m.code.eq_ignore_ascii_case(code))
    }

    /// Resolve an id or a code, case-insensitively.
    pub fn resolve(&self, id_or_code: &str) -> Option<&ModeInfo> {
        let wanted = id_or_code.trim().to_lowercase();
        self.get(&wanted).or_else(|| self.by_code(&wanted))
    }

    /// Modes of one category in preference order: tier, cost, code, id.
    pub fn in_category(&self, category: ModeCategory) -> Vec<&ModeInfo> {
        let mut modes: Vec<&ModeInfo> = self
            .modes
            .iter()
            .filter(|m| m.category == category)
            .collect();
        modes.sort_by(|a, b| {
            a.tier
                .cmp(&b.tier)
                .then_with(|| a.typical_cost.cmp(&b.typical_cost))
                .then_with(|| a.code.cmp(&b.code))
                .then_with(|| a.id.cmp(&b.id))
        });
        modes
    }

    /// Every category, in catalog order.
    pub fn categories(&self) -> &'static [ModeCategory] {
        &ModeCategory::ALL
    }

    pub fn category_of(&self, id: &str) -> Option<ModeCategory> {
        self.resolve(id).map(|m| m.category)
    }
}
