use std::sync::atomic::{AtomicU64, Ordering};

use aloe_conductor::agent::external::TicketSink;
use aloe_conductor::agent::outputs::TicketDraft;
use aloe_core::config::{ClientMode, JiraConfig};
use aloe_core::AloeError;
use serde_json::{json, Value};

use super::{check, http_client, required, transport};

const SERVICE: &str = "jira";

enum Target {
    Mock,
    Real {
        http: reqwest::Client,
        url: String,
        project: String,
        user: String,
        token: String,
    },
}

/// Creates Bug issues from approved drafts.
pub struct JiraClient {
    target: Target,
    created: AtomicU64,
}

impl JiraClient {
    pub fn mock() -> Self {
        Self {
            target: Target::Mock,
            created: AtomicU64::new(0),
        }
    }

    /// Real mode needs url, project, user and token.
    pub fn from_config(cfg: &JiraConfig) -> anyhow::Result<Self> {
        let target = match cfg.mode {
            ClientMode::Mock => Target::Mock,
            ClientMode::Real => Target::Real {
                http: http_client()?,
                url: required(&cfg.url, "jira.url")?.trim_end_matches('/').to_string(),
                project: required(&cfg.project, "jira.project")?,
                user: required(&cfg.user, "jira.user")?,
                token: required(&cfg.token, "jira.token")?,
            },
        };
        Ok(Self {
            target,
            created: AtomicU64::new(0),
        })
    }
}

// ── Issue body ──

fn text_node(text: &str) -> Value {
    json!({"type": "text", "text": text})
}

fn paragraph(text: &str) -> Value {
    json!({"type": "paragraph", "content": [text_node(text)]})
}

fn heading(text: &str) -> Value {
    json!({"type": "heading", "attrs": {"level": 3}, "content": [text_node(text)]})
}

fn bullets(items: &[String]) -> Value {
    let list: Vec<Value> = items
        .iter()
        .map(|i| json!({"type": "listItem", "content": [paragraph(i)]}))
        .collect();
    json!({"type": "bulletList", "content": list})
}

/// Atlassian document for the issue description. Empty sections are left
/// out since the format rejects empty text nodes.
pub fn description_doc(draft: &TicketDraft) -> Value {
    let mut content = Vec::new();
    if !draft.description.trim().is_empty() {
        content.push(paragraph(&draft.description));
    }
    content.push(paragraph(&format!(
        "Service: {}. Hits in the review window: {}.",
        draft.service, draft.hits
    )));
    if !draft.kql_filter.trim().is_empty() {
        content.push(heading("KQL filter"));
        content.push(json!({"type": "codeBlock", "content": [text_node(&draft.kql_filter)]}));
    }
    if !draft.stack_excerpt.trim().is_empty() {
        content.push(heading("Stack trace excerpt"));
        content.push(json!({"type": "codeBlock", "attrs": {"language": "java"}, "content": [text_node(&draft.stack_excerpt)]}));
    }
    if !draft.notes.is_empty() {
        content.push(heading("Notes for development"));
        content.push(bullets(&draft.notes));
    }
    if !draft.repro_steps.is_empty() {
        content.push(heading("Steps to reproduce"));
        content.push(bullets(&draft.repro_steps));
    }
    json!({"type": "doc", "version": 1, "content": content})
}

pub fn issue_payload(project: &str, draft: &TicketDraft) -> Value {
    let mut labels = vec!["aloe".to_string()];
    if let Some(label) = draft.label {
        labels.push(label.as_str().to_string());
    }
    json!({
        "fields": {
            "project": {"key": project},
            "summary": draft.summary,
            "issuetype": {"name": "Bug"},
            "labels": labels,
            "description": description_doc(draft),
        }
    })
}

#[async_trait::async_trait]
impl TicketSink for JiraClient {
    async fn create(&self, draft: &TicketDraft) -> Result<String, AloeError> {
        match &self.target {
            Target::Mock => {
                let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
                tracing::info!(
                    signature = %draft.cluster_signature,
                    summary = %draft.summary,
                    "mock jira: would create issue"
                );
                Ok(format!("MOCK-{n}"))
            }
            Target::Real {
                http,
                url,
                project,
                user,
                token,
            } => {
                let resp = http
                    .post(format!("{url}/rest/api/3/issue"))
                    .basic_auth(user, Some(token))
                    .json(&issue_payload(project, draft))
                    .send()
                    .await
                    .map_err(|e| transport(SERVICE, e))?;
                let body: Value = check(SERVICE, resp)
                    .await?
                    .json()
                    .await
                    .map_err(|e| transport(SERVICE, e))?;
                let key = body
                    .get("key")
                    .and_then(Value::as_str)
                    .ok_or_else(|| AloeError::action_failed(SERVICE, "response has no issue key"))?;
                self.created.fetch_add(1, Ordering::SeqCst);
                tracing::info!(key, signature = %draft.cluster_signature, "jira issue created");
                Ok(key.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aloe_core::Label;

    fn draft() -> TicketDraft {
        TicketDraft {
            cluster_index: 2,
            cluster_signature: "abcd".into(),
            service: "checkout".into(),
            label: Some(Label::InternalError),
            severity: None,
            summary: "NPE in Checkout.pay".into(),
            description: "Basket is null when paying.".into(),
            kql_filter: String::new(),
            hits: 17,
            stack_excerpt: "at com.shop.Checkout.pay(Checkout.java:41)".into(),
            notes: vec!["check basket init".into()],
            repro_steps: vec![],
        }
    }

    #[tokio::test]
    async fn mock_mode_hands_out_sequential_keys() {
        let client = JiraClient::mock();
        assert_eq!(client.create(&draft()).await.unwrap(), "MOCK-1");
        assert_eq!(client.create(&draft()).await.unwrap(), "MOCK-2");
    }

    #[test]
    fn real_mode_requires_settings() {
        let cfg = JiraConfig {
            mode: ClientMode::Real,
            url: Some("https://jira.example.com".into()),
            project: None,
            user: Some("bot".into()),
            token: Some("t".into()),
        };
        let err = JiraClient::from_config(&cfg).err().unwrap();
        assert!(err.to_string().contains("jira.project"));
        assert!(JiraClient::from_config(&JiraConfig::default()).is_ok());
    }

    #[test]
    fn payload_is_a_bug_with_adf_description() {
        let p = issue_payload("OPS", &draft());
        assert_eq!(p["fields"]["project"]["key"], "OPS");
        assert_eq!(p["fields"]["issuetype"]["name"], "Bug");
        assert_eq!(p["fields"]["labels"], json!(["aloe", "internal_error"]));
        let doc = &p["fields"]["description"];
        assert_eq!(doc["type"], "doc");
        let kinds: Vec<&str> = doc["content"]
            .as_array()
            .unwrap()
            .iter()
            .map(|n| n["type"].as_str().unwrap())
            .collect();
        // No KQL filter and no repro steps: those sections are absent.
        assert_eq!(
            kinds,
            vec!["paragraph", "paragraph", "heading", "codeBlock", "heading", "bulletList"]
        );
        assert!(doc.to_string().contains("Hits in the review window: 17"));
    }
}
