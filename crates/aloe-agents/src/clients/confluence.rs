use aloe_conductor::agent::external::DocPublisher;
use aloe_core::config::{ClientMode, ConfluenceConfig};
use aloe_core::AloeError;
use serde_json::{json, Value};

use super::{check, http_client, required, transport};

const SERVICE: &str = "confluence";

enum Target {
    Mock,
    Real {
        http: reqwest::Client,
        url: String,
        page_id: String,
        user: String,
        token: String,
    },
}

/// Appends each report to one existing page.
pub struct ConfluenceClient {
    target: Target,
}

impl ConfluenceClient {
    pub fn mock() -> Self {
        Self { target: Target::Mock }
    }

    pub fn from_config(cfg: &ConfluenceConfig) -> anyhow::Result<Self> {
        let target = match cfg.mode {
            ClientMode::Mock => Target::Mock,
            ClientMode::Real => Target::Real {
                http: http_client()?,
                url: required(&cfg.url, "confluence.url")?.trim_end_matches('/').to_string(),
                page_id: required(&cfg.page_id, "confluence.page_id")?,
                user: required(&cfg.user, "confluence.user")?,
                token: required(&cfg.token, "confluence.token")?,
            },
        };
        Ok(Self { target })
    }
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Storage-format block appended to the page for one report.
pub fn report_section(title: &str, markdown: &str) -> String {
    format!(
        "<h2>{}</h2><pre>{}</pre>",
        escape_html(title),
        escape_html(markdown)
    )
}

/// Body of the page update: existing content plus the new section, one
/// version up.
pub fn update_payload(page_id: &str, page: &Value, section: &str) -> Result<Value, AloeError> {
    let version = page
        .pointer("/version/number")
        .and_then(Value::as_u64)
        .ok_or_else(|| AloeError::action_failed(SERVICE, "page has no version number"))?;
    let title = page.get("title").and_then(Value::as_str).unwrap_or_default();
    let existing = page
        .pointer("/body/storage/value")
        .and_then(Value::as_str)
        .unwrap_or_default();
    Ok(json!({
        "id": page_id,
        "type": "page",
        "title": title,
        "version": {"number": version + 1},
        "body": {"storage": {"value": format!("{existing}{section}"), "representation": "storage"}},
    }))
}

#[async_trait::async_trait]
impl DocPublisher for ConfluenceClient {
    async fn publish(&self, title: &str, markdown: &str) -> Result<String, AloeError> {
        match &self.target {
            Target::Mock => {
                tracing::info!(title, chars = markdown.len(), "mock confluence: would append report");
                Ok(format!("mock:{title}"))
            }
            Target::Real {
                http,
                url,
                page_id,
                user,
                token,
            } => {
                let content_url = format!("{url}/rest/api/content/{page_id}");
                let resp = http
                    .get(format!("{content_url}?expand=body.storage,version"))
                    .basic_auth(user, Some(token))
                    .send()
                    .await
                    .map_err(|e| transport(SERVICE, e))?;
                let page: Value = check(SERVICE, resp)
                    .await?
                    .json()
                    .await
                    .map_err(|e| transport(SERVICE, e))?;

                let body = update_payload(page_id, &page, &report_section(title, markdown))?;
                let resp = http
                    .put(&content_url)
                    .basic_auth(user, Some(token))
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| transport(SERVICE, e))?;
                check(SERVICE, resp).await?;
                tracing::info!(page_id = %page_id, title, "report appended to confluence page");
                Ok(format!("{url}/pages/viewpage.action?pageId={page_id}"))
            }
        }
    }
}
