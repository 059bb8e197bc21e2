//! OpenAI-compatible chat-completions client.
//!
//! Every caller wants a JSON object back, so the client's main entry point
//! is [`ChatModel::ask_json`], which digs the object out of whatever text
//! the model produced.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use aloe_conductor::agent::external::UsageReporter;
use aloe_core::config::LlmConfig;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::prompts::JSON_ONLY;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// Network failure, timeout, rate limit or server error. Worth retrying.
    #[error("reasoning service unavailable: {0}")]
    Unavailable(String),
    /// The service refused the request (bad key, bad model, bad payload).
    #[error("reasoning service rejected the request: {0}")]
    Rejected(String),
    #[error("reasoning service returned no JSON object: {0}")]
    NotJson(String),
}

impl LlmError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Anything that can answer a system + user prompt with a JSON object.
#[async_trait::async_trait]
pub trait ChatModel: Send + Sync {
    async fn ask_json(&self, system: &str, user: &str) -> Result<Value, LlmError>;
}

// ── Usage ──

/// Call and token counters, shared by every component using one client.
#[derive(Debug, Default)]
pub struct LlmUsage {
    calls: AtomicU64,
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
}

impl LlmUsage {
    fn record(&self, usage: Option<&TokenUsage>) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if let Some(u) = usage {
            self.prompt_tokens.fetch_add(u.prompt_tokens, Ordering::Relaxed);
            self.completion_tokens.fetch_add(u.completion_tokens, Ordering::Relaxed);
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

impl UsageReporter for LlmUsage {
    fn usage(&self) -> Value {
        let prompt = self.prompt_tokens.load(Ordering::Relaxed);
        let completion = self.completion_tokens.load(Ordering::Relaxed);
        json!({
            "calls": self.calls(),
            "prompt_tokens": prompt,
            "completion_tokens": completion,
            "total_tokens": prompt + completion,
        })
    }
}

// ── Wire types ──

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

// ── Client ──

pub struct LlmClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    temperature: f64,
    usage: Arc<LlmUsage>,
}

impl LlmClient {
    pub fn new(cfg: &LlmConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_sec.max(1)))
            .build()?;
        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", cfg.base_url.trim_end_matches('/')),
            model: cfg.model.clone(),
            api_key: cfg.api_key.clone(),
            temperature: cfg.temperature,
            usage: Arc::new(LlmUsage::default()),
        })
    }

    pub fn usage(&self) -> Arc<LlmUsage> {
        Arc::clone(&self.usage)
    }

    /// One chat completion; returns the first choice's text.
    pub async fn complete(&self, system: &str, user: &str) -> Result<String, LlmError> {
        let system = format!("{system}\n{JSON_ONLY}");
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: self.temperature,
        };

        let mut req = self.http.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| LlmError::Unavailable(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(status_error(status, &text));
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::Unavailable(format!("unreadable response body: {e}")))?;
        self.usage.record(parsed.usage.as_ref());

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        tracing::debug!(model = %self.model, chars = content.len(), "completion received");
        Ok(content)
    }
}

#[async_trait::async_trait]
impl ChatModel for LlmClient {
    async fn ask_json(&self, system: &str, user: &str) -> Result<Value, LlmError> {
        let text = self.complete(system, user).await?;
        extract_json(&text).ok_or_else(|| LlmError::NotJson(preview(&text)))
    }
}

/// 429 and 5xx are transient; every other failure status is a refusal.
fn status_error(status: StatusCode, body: &str) -> LlmError {
    let msg = format!("{} {}", status.as_u16(), preview(body));
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        LlmError::Unavailable(msg)
    } else {
        LlmError::Rejected(msg)
    }
}

/// Find a JSON object in model output: the whole text, then a fenced
/// block, then the span from the first `{` to the last `}`.
pub fn extract_json(text: &str) -> Option<Value> {
    let text = text.trim();
    let as_object = |s: &str| serde_json::from_str::<Value>(s).ok().filter(Value::is_object);

    if let Some(v) = as_object(text) {
        return Some(v);
    }
    if text.starts_with("```") {
        let lines: Vec<&str> = text.lines().collect();
        if lines.len() >= 2 {
            let inner = lines[1..lines.len() - 1].join("\n");
            if let Some(v) = as_object(inner.trim()) {
                return Some(v);
            }
        }
    }
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => as_object(&text[start..=end]),
        _ => None,
    }
}

fn preview(text: &str) -> String {
    text.chars().take(200).collect()
}

// ── Mock (for testing) ──

/// Replays canned answers in order, then repeats the last one.
pub struct ScriptedModel {
    replies: std::sync::Mutex<VecDeque<Result<Value, String>>>,
    last: std::sync::Mutex<Option<Result<Value, String>>>,
    prompts: std::sync::Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new(replies: impl IntoIterator<Item = Result<Value, String>>) -> Self {
        Self {
            replies: std::sync::Mutex::new(replies.into_iter().collect()),
            last: std::sync::Mutex::new(None),
            prompts: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn answering(value: Value) -> Self {
        Self::new([Ok(value)])
    }

    /// User prompts seen so far.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

#[async_trait::async_trait]
impl ChatModel for ScriptedModel {
    async fn ask_json(&self, _system: &str, user: &str) -> Result<Value, LlmError> {
        self.prompts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(user.to_string());
        let next = self.replies.lock().unwrap_or_else(|p| p.into_inner()).pop_front();
        let mut last = self.last.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(reply) = next {
            *last = Some(reply);
        }
        match last.clone() {
            Some(Ok(v)) => Ok(v),
            Some(Err(e)) => Err(LlmError::Unavailable(e)),
            None => Err(LlmError::NotJson("no scripted reply".into())),
        }
    }
}
