use aloe_core::{Label, Severity};
use serde::{Deserialize, Serialize};

/// Reason carried by every plan produced when no usable decision exists.
pub const FALLBACK_REASON: &str = "fallback: decision unavailable";

// ── Agents ──

/// The closed set of downstream action agents.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AgentName {
    JiraDrafts,
    FilterSuggestions,
    ConfluenceDraft,
}

impl AgentName {
    /// Canonical plan order. Dependencies always precede dependents.
    pub const ALL: [AgentName; 3] = [
        AgentName::JiraDrafts,
        AgentName::FilterSuggestions,
        AgentName::ConfluenceDraft,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::JiraDrafts => "JiraDrafts",
            Self::FilterSuggestions => "FilterSuggestions",
            Self::ConfluenceDraft => "ConfluenceDraft",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.as_str() == raw)
    }

    /// Agents whose outputs this agent reads when they ran in the same plan.
    pub fn depends_on(&self) -> &'static [AgentName] {
        match self {
            Self::ConfluenceDraft => &[AgentName::JiraDrafts, AgentName::FilterSuggestions],
            _ => &[],
        }
    }
}

impl std::fmt::Display for AgentName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    Summary,
    JiraLinks,
    Filters,
}

impl Section {
    pub const ALL: [Section; 3] = [Section::Summary, Section::JiraLinks, Section::Filters];
}

pub const DEFAULT_FILTER_LABELS: [Label; 3] = [Label::Timeout, Label::ExternalService, Label::Noise];

// ── Plan ──

/// Inputs that scope what one action operates on. All-empty means neutral.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScopedInputs {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cluster_indices: Vec<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub for_labels: Vec<Label>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tickets: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_severity: Option<Severity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include_sections: Vec<Section>,
}

impl ScopedInputs {
    pub fn is_neutral(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionSpec {
    pub agent: AgentName,
    pub run: bool,
    #[serde(default)]
    pub scoped_inputs: ScopedInputs,
}

impl ActionSpec {
    /// A disabled action with neutral inputs.
    pub fn off(agent: AgentName) -> Self {
        Self {
            agent,
            run: false,
            scoped_inputs: ScopedInputs::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TicketStrategy {
    Aggressive,
    #[default]
    Balanced,
    Conservative,
    Baseline,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum NoiseHandling {
    None,
    #[default]
    BasicFilters,
    AggressiveFilters,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GlobalPolicy {
    #[serde(default)]
    pub ticket_strategy: TicketStrategy,
    #[serde(default)]
    pub noise_handling: NoiseHandling,
}

/// Where a plan's decision came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlanSource {
    Decision,
    Baseline,
    Fallback,
}

impl PlanSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Decision => "decision",
            Self::Baseline => "baseline",
            Self::Fallback => "fallback",
        }
    }
}

/// The validated, total plan for one run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionPlan {
    pub actions: Vec<ActionSpec>,
    pub global_policy: GlobalPolicy,
    pub reason: String,
    pub source: PlanSource,
    /// Every change the engine enforced on the raw decision.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub adjustments: Vec<String>,
}

impl ActionPlan {
    /// Deterministic minimal plan: every action off.
    pub fn fallback(detail: impl Into<String>) -> Self {
        Self {
            actions: AgentName::ALL.into_iter().map(ActionSpec::off).collect(),
            global_policy: GlobalPolicy {
                ticket_strategy: TicketStrategy::Conservative,
                noise_handling: NoiseHandling::None,
            },
            reason: FALLBACK_REASON.to_string(),
            source: PlanSource::Fallback,
            adjustments: vec![detail.into()],
        }
    }

    pub fn action(&self, agent: AgentName) -> Option<&ActionSpec> {
        self.actions.iter().find(|a| a.agent == agent)
    }

    pub fn runs(&self, agent: AgentName) -> bool {
        self.action(agent).is_some_and(|a| a.run)
    }

    pub fn runnable(&self) -> impl Iterator<Item = &ActionSpec> {
        self.actions.iter().filter(|a| a.run)
    }
}
