//! Ticket tracker and wiki clients.
//!
//! Both default to a mock mode that only logs what would be sent.

pub mod confluence;
pub mod jira;

use std::time::Duration;

use aloe_core::AloeError;

pub use confluence::ConfluenceClient;
pub use jira::JiraClient;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

fn required(value: &Option<String>, what: &str) -> anyhow::Result<String> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => anyhow::bail!("{what} is required in real mode"),
    }
}

fn http_client() -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?)
}

/// Turn a non-success response into an action error carrying the body.
async fn check(service: &str, resp: reqwest::Response) -> Result<reqwest::Response, AloeError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(AloeError::action_failed(
        service,
        format!("{} {}", status.as_u16(), body.chars().take(300).collect::<String>()),
    ))
}

fn transport(service: &str, e: reqwest::Error) -> AloeError {
    AloeError::action_failed(service, e.to_string())
}
