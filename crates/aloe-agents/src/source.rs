//! Log sources: an exported JSON file or a live Elasticsearch index.

use std::path::PathBuf;
use std::time::Duration;

use aloe_conductor::agent::external::LogSource;
use aloe_core::config::{SourceConfig, SourceKind};
use anyhow::{bail, Context};
use serde_json::{json, Value};

const PIT_KEEP_ALIVE: &str = "2m";

/// Records from an Elasticsearch export (`hits.hits[]._source`) or a plain
/// JSON array of records.
pub fn records_from_export(doc: Value) -> anyhow::Result<Vec<Value>> {
    match doc {
        Value::Array(records) => Ok(records),
        Value::Object(_) => {
            let Some(hits) = doc.pointer("/hits/hits").and_then(Value::as_array) else {
                bail!("expected a JSON array or an object with hits.hits");
            };
            Ok(hits
                .iter()
                .map(|h| h.get("_source").cloned().unwrap_or_else(|| json!({})))
                .collect())
        }
        _ => bail!("expected a JSON array or an object with hits.hits"),
    }
}

pub struct FileLogSource {
    path: PathBuf,
}

impl FileLogSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl LogSource for FileLogSource {
    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }

    async fn fetch(&self) -> anyhow::Result<Vec<Value>> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("read log file {}", self.path.display()))?;
        let doc: Value = serde_json::from_str(&content)
            .with_context(|| format!("parse log file {}", self.path.display()))?;
        let records = records_from_export(doc)?;
        tracing::info!(path = %self.path.display(), records = records.len(), "loaded log file");
        Ok(records)
    }
}

// ── Elasticsearch ──

pub struct ElasticLogSource {
    http: reqwest::Client,
    url: String,
    index: String,
    auth: Option<(String, String)>,
    window: String,
    page_size: usize,
    max_records: usize,
}

/// One page of a point-in-time search, newest first.
pub fn search_body(window: &str, size: usize, pit_id: &str, search_after: Option<&Value>) -> Value {
    let mut body = json!({
        "size": size,
        "query": {"bool": {"must": [
            {"range": {"@timestamp": {"gte": window, "lte": "now"}}}
        ]}},
        "sort": [
            {"@timestamp": {"order": "desc"}},
            {"_shard_doc": {"order": "desc"}}
        ],
        "pit": {"id": pit_id, "keep_alive": PIT_KEEP_ALIVE},
    });
    if let Some(after) = search_after {
        body["search_after"] = after.clone();
    }
    body
}

/// Sources of a search page plus the sort key to continue after, if any.
pub fn page_hits(resp: &Value) -> (Vec<Value>, Option<Value>) {
    let hits = resp
        .pointer("/hits/hits")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let next = hits
        .last()
        .and_then(|h| h.get("sort"))
        .filter(|s| s.as_array().is_some_and(|a| !a.is_empty()))
        .cloned();
    let sources = hits
        .into_iter()
        .map(|mut h| h.get_mut("_source").map(Value::take).unwrap_or_else(|| json!({})))
        .collect();
    (sources, next)
}

impl ElasticLogSource {
    pub fn from_config(cfg: &SourceConfig) -> anyhow::Result<Self> {
        let Some(url) = cfg.es_url.as_deref().filter(|u| !u.trim().is_empty()) else {
            bail!("source.es_url (ALOE_ES_URL) is not set");
        };
        if cfg.es_index.trim().is_empty() {
            bail!("source.es_index (ALOE_ES_INDEX) is not set");
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_sec.max(1)))
            .build()?;
        let auth = match (&cfg.es_username, &cfg.es_password) {
            (Some(u), Some(p)) => Some((u.clone(), p.clone())),
            _ => None,
        };
        Ok(Self {
            http,
            url: url.trim_end_matches('/').to_string(),
            index: cfg.es_index.clone(),
            auth,
            window: cfg.window.clone(),
            page_size: cfg.page_size.max(1),
            max_records: cfg.max_records,
        })
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        let req = self.http.request(method, url);
        match &self.auth {
            Some((user, pass)) => req.basic_auth(user, Some(pass)),
            None => req,
        }
    }

    async fn post_json(&self, url: String, body: Option<&Value>) -> anyhow::Result<Value> {
        let mut req = self.request(reqwest::Method::POST, url.clone());
        if let Some(b) = body {
            req = req.json(b);
        }
        let resp = req.send().await.with_context(|| format!("POST {url}"))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("POST {url}: {} {}", status.as_u16(), text.chars().take(300).collect::<String>());
        }
        Ok(resp.json().await?)
    }

    async fn paginate(&self, pit_id: &str) -> anyhow::Result<Vec<Value>> {
        let mut records = Vec::new();
        let mut after: Option<Value> = None;
        while records.len() < self.max_records {
            let size = self.page_size.min(self.max_records - records.len());
            let body = search_body(&self.window, size, pit_id, after.as_ref());
            let resp = self
                .post_json(format!("{}/_search", self.url), Some(&body))
                .await?;
            let (page, next) = page_hits(&resp);
            if page.is_empty() {
                break;
            }
            records.extend(page);
            match next {
                Some(n) => after = Some(n),
                None => break,
            }
        }
        records.truncate(self.max_records);
        Ok(records)
    }
}

#[async_trait::async_trait]
impl LogSource for ElasticLogSource {
    fn describe(&self) -> String {
        format!("elastic:{}/{} ({}..now)", self.url, self.index, self.window)
    }

    async fn fetch(&self) -> anyhow::Result<Vec<Value>> {
        let pit = self
            .post_json(
                format!("{}/{}/_pit?keep_alive={PIT_KEEP_ALIVE}", self.url, self.index),
                None,
            )
            .await
            .context("open point in time")?;
        let pit_id = pit
            .get("id")
            .and_then(Value::as_str)
            .context("point in time response has no id")?
            .to_string();

        let result = self.paginate(&pit_id).await;

        let close = self
            .request(reqwest::Method::DELETE, format!("{}/_pit", self.url))
            .json(&json!({"id": pit_id}))
            .send()
            .await;
        if let Err(e) = close {
            tracing::warn!(error = %e, "closing point in time failed");
        }

        let records = result?;
        tracing::info!(index = %self.index, records = records.len(), "fetched logs from elasticsearch");
        Ok(records)
    }
}

pub fn from_config(cfg: &SourceConfig) -> anyhow::Result<Box<dyn LogSource>> {
    Ok(match cfg.kind {
        SourceKind::File => Box::new(FileLogSource::new(&cfg.file)),
        SourceKind::Elastic => Box::new(ElasticLogSource::from_config(cfg)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_and_plain_array_are_accepted() {
        let export = json!({"hits": {"hits": [
            {"_source": {"athena_message": "a"}},
            {"_id": "no source"}
        ]}});
        let recs = records_from_export(export).unwrap();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0]["athena_message"], "a");
        assert_eq!(recs[1], json!({}));

        assert_eq!(records_from_export(json!([{"m": 1}])).unwrap().len(), 1);
        assert!(records_from_export(json!({"took": 3})).is_err());
        assert!(records_from_export(json!("text")).is_err());
    }

    #[tokio::test]
    async fn file_source_reads_exports() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs.json");
        std::fs::write(&path, r#"{"hits": {"hits": [{"_source": {"log": "x"}}]}}"#).unwrap();
        let src = FileLogSource::new(&path);
        assert!(src.describe().starts_with("file:"));
        assert_eq!(src.fetch().await.unwrap(), vec![json!({"log": "x"})]);

        let missing = FileLogSource::new(dir.path().join("nope.json"));
        let err = missing.fetch().await.unwrap_err();
        assert!(format!("{err:#}").contains("nope.json"));
    }

    #[test]
    fn search_body_pages_with_pit() {
        let first = search_body("now-1d", 500, "pit-1", None);
        assert_eq!(first["size"], 500);
        assert_eq!(first["pit"]["id"], "pit-1");
        assert_eq!(first["query"]["bool"]["must"][0]["range"]["@timestamp"]["gte"], "now-1d");
        assert!(first.get("search_after").is_none());

        let next = search_body("now-1d", 500, "pit-1", Some(&json!([1714557600000u64, 42])));
        assert_eq!(next["search_after"][1], 42);
    }

    #[test]
    fn page_hits_yield_sources_and_cursor() {
        let resp = json!({"hits": {"hits": [
            {"_source": {"m": 1}, "sort": [10, 1]},
            {"_source": {"m": 2}, "sort": [9, 2]}
        ]}});
        let (page, next) = page_hits(&resp);
        assert_eq!(page, vec![json!({"m": 1}), json!({"m": 2})]);
        assert_eq!(next, Some(json!([9, 2])));

        let (page, next) = page_hits(&json!({"hits": {"hits": [{"_source": {}}]}}));
        assert_eq!(page.len(), 1);
        assert!(next.is_none());
    }

    #[test]
    fn elastic_needs_url() {
        let cfg = SourceConfig {
            kind: SourceKind::Elastic,
            ..SourceConfig::default()
        };
        assert!(from_config(&cfg).is_err());
        let cfg = SourceConfig {
            kind: SourceKind::Elastic,
            es_url: Some("http://localhost:9200/".into()),
            ..SourceConfig::default()
        };
        let src = from_config(&cfg).unwrap();
        assert_eq!(src.describe(), "elastic:http://localhost:9200/logstash-* (now-1d..now)");
        assert!(from_config(&SourceConfig::default()).unwrap().describe().starts_with("file:"));
    }
}
