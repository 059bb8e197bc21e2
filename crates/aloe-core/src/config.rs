use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

// ── Masking ──

/// One masking rule: every match of `regex` is replaced by the placeholder.
///
/// Rules run in order against the lower-cased message, so more specific
/// shapes (timestamps, UUIDs) must come before generic ones (numbers).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MaskRuleConfig {
    pub name: String,
    pub regex: String,
}

impl MaskRuleConfig {
    fn new(name: &str, regex: &str) -> Self {
        Self {
            name: name.to_string(),
            regex: regex.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MaskConfig {
    pub rules: Vec<MaskRuleConfig>,
    pub placeholder: String,
    pub max_pattern_len: usize,
}

impl Default for MaskConfig {
    fn default() -> Self {
        Self {
            rules: vec![
                MaskRuleConfig::new(
                    "timestamp",
                    r"\d{4}-\d{2}-\d{2}[t ]\d{2}:\d{2}:\d{2}(?:[.,]\d+)?(?:z|[+-]\d{2}:?\d{2})?",
                ),
                MaskRuleConfig::new(
                    "uuid",
                    r"\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b",
                ),
                MaskRuleConfig::new("hex", r"\b(?:0x[0-9a-f]+|[0-9a-f]{12,})\b"),
                MaskRuleConfig::new("ipv4", r"\b\d{1,3}(?:\.\d{1,3}){3}(?::\d+)?\b"),
                MaskRuleConfig::new("number", r"\d+"),
            ],
            placeholder: "<*>".to_string(),
            max_pattern_len: 200,
        }
    }
}

// ── Normalization ──

/// Ordered field aliases; the first present, non-empty field wins.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FieldAliases {
    pub timestamp: Vec<String>,
    pub level: Vec<String>,
    pub service: Vec<String>,
    pub message: Vec<String>,
    pub class: Vec<String>,
    pub trace_id: Vec<String>,
    pub stack: Vec<String>,
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl Default for FieldAliases {
    fn default() -> Self {
        Self {
            timestamp: names(&["@timestamp", "timestamp", "time"]),
            level: names(&["athena_level", "level", "severity"]),
            service: names(&["AthenaServiceName", "athena_service", "service"]),
            message: names(&["athena_message", "message", "log"]),
            class: names(&["athena_java_class", "java_class", "class", "logger"]),
            trace_id: names(&["athena_trace_id", "traceId", "trace_id"]),
            stack: names(&["log", "stack_trace", "stack"]),
        }
    }
}

// ── Stages ──

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClassifyConfig {
    pub concurrency: usize,
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub timeout_sec: u64,
}

impl Default for ClassifyConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_attempts: 3,
            backoff_ms: 500,
            timeout_sec: 60,
        }
    }
}

/// Optional pass that asks the reasoning service to fold clusters describing
/// the same error into one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RefineConfig {
    pub enabled: bool,
    pub timeout_sec: u64,
}

impl Default for RefineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_sec: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlanMode {
    /// The reasoning service decides which actions run.
    #[default]
    Orchestrator,
    /// Static heuristics decide; no reasoning call is made for the plan.
    Baseline,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlanConfig {
    pub mode: PlanMode,
    pub timeout_sec: u64,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            mode: PlanMode::Orchestrator,
            timeout_sec: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ActionsConfig {
    pub concurrency: usize,
    pub timeout_sec: u64,
}

impl Default for ActionsConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            timeout_sec: 120,
        }
    }
}

// ── External services ──

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub temperature: f64,
    pub timeout_sec: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.groq.com/openai/v1".to_string(),
            model: "llama-3.1-8b-instant".to_string(),
            api_key: None,
            temperature: 0.1,
            timeout_sec: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    #[default]
    File,
    Elastic,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SourceConfig {
    pub kind: SourceKind,
    pub file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub es_url: Option<String>,
    pub es_index: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub es_username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub es_password: Option<String>,
    /// Elasticsearch date-math lower bound for `@timestamp`.
    pub window: String,
    pub page_size: usize,
    pub max_records: usize,
    pub timeout_sec: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::File,
            file: "resources/test_logs.json".to_string(),
            es_url: None,
            es_index: "logstash-*".to_string(),
            es_username: None,
            es_password: None,
            window: "now-1d".to_string(),
            page_size: 1000,
            max_records: 1000,
            timeout_sec: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClientMode {
    /// Log what would be sent; never call out.
    #[default]
    Mock,
    Real,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct JiraConfig {
    pub mode: ClientMode,
    pub url: Option<String>,
    pub project: Option<String>,
    pub user: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConfluenceConfig {
    pub mode: ClientMode,
    pub url: Option<String>,
    pub page_id: Option<String>,
    pub user: Option<String>,
    pub token: Option<String>,
}

// ── Top level ──

/// Full configuration, stored in `.aloe/config.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AloeConfig {
    pub mask: MaskConfig,
    pub normalize: FieldAliases,
    pub refine: RefineConfig,
    pub classify: ClassifyConfig,
    pub plan: PlanConfig,
    pub actions: ActionsConfig,
    pub llm: LlmConfig,
    pub source: SourceConfig,
    pub jira: JiraConfig,
    pub confluence: ConfluenceConfig,
}

impl AloeConfig {
    /// Load from `path`, then apply `ALOE_*` environment overrides.
    /// A missing file yields defaults; an unparseable one is an error.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut cfg = match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content)
                .with_context(|| format!("parse config {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => {
                return Err(e).with_context(|| format!("read config {}", path.display()));
            }
        };
        cfg.apply_env(|key| std::env::var(key).ok());
        Ok(cfg)
    }

    /// Overlay environment values. `lookup` is injectable for tests.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("ALOE_LLM_URL") {
            self.llm.base_url = v;
        }
        if let Some(v) = get("ALOE_LLM_MODEL").or_else(|| get("GROQ_MODEL")) {
            self.llm.model = v;
        }
        if let Some(v) = get("ALOE_LLM_API_KEY").or_else(|| get("GROQ_API_KEY")) {
            self.llm.api_key = Some(v);
        }
        if let Some(v) = get("ALOE_REFINE_CLUSTERS") {
            self.refine.enabled = !matches!(v.to_ascii_lowercase().as_str(), "0" | "false" | "off");
        }
        if let Some(v) = get("ALOE_PLAN_MODE") {
            match v.as_str() {
                "baseline" => self.plan.mode = PlanMode::Baseline,
                "orchestrator" => self.plan.mode = PlanMode::Orchestrator,
                other => tracing::warn!(value = other, "ignoring unknown ALOE_PLAN_MODE"),
            }
        }

        if let Some(v) = get("ALOE_MOCK_LOG_FILE") {
            self.source.file = v;
        }
        if let Some(v) = get("ALOE_ES_URL") {
            self.source.es_url = Some(v);
            self.source.kind = SourceKind::Elastic;
        }
        if let Some(v) = get("ALOE_ES_INDEX") {
            self.source.es_index = v;
        }
        if let Some(v) = get("ALOE_ES_USERNAME") {
            self.source.es_username = Some(v);
        }
        if let Some(v) = get("ALOE_ES_PASSWORD") {
            self.source.es_password = Some(v);
        }

        if let Some(v) = get("ALOE_JIRA_URL") {
            self.jira.url = Some(v);
        }
        if let Some(v) = get("ALOE_JIRA_PROJECT") {
            self.jira.project = Some(v);
        }
        if let Some(v) = get("ALOE_JIRA_USER") {
            self.jira.user = Some(v);
        }
        if let Some(v) = get("ALOE_JIRA_TOKEN") {
            self.jira.token = Some(v);
        }
        if let Some(v) = get("ALOE_JIRA_MODE") {
            self.jira.mode = parse_mode(&v, self.jira.mode);
        }

        if let Some(v) = get("ALOE_CONFLUENCE_URL") {
            self.confluence.url = Some(v);
        }
        if let Some(v) = get("ALOE_CONFLUENCE_PAGE_ID") {
            self.confluence.page_id = Some(v);
        }
        if let Some(v) = get("ALOE_CONFLUENCE_USER") {
            self.confluence.user = Some(v);
        }
        if let Some(v) = get("ALOE_CONFLUENCE_TOKEN") {
            self.confluence.token = Some(v);
        }
        if let Some(v) = get("ALOE_CONFLUENCE_MODE") {
            self.confluence.mode = parse_mode(&v, self.confluence.mode);
        }
    }
}

fn parse_mode(raw: &str, current: ClientMode) -> ClientMode {
    match raw {
        "mock" => ClientMode::Mock,
        "real" => ClientMode::Real,
        other => {
            tracing::warn!(value = other, "ignoring unknown client mode");
            current
        }
    }
}
