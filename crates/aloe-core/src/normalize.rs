use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::config::FieldAliases;
use crate::error::{AloeError, Issue};
use crate::types::{LogLevel, LogRecord};

pub const UNKNOWN_SERVICE: &str = "<unknown_service>";
pub const UNKNOWN_CLASS: &str = "<unknown_class>";

/// A record that could not be normalized, by input position.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DroppedRecord {
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct NormalizedBatch {
    pub records: Vec<LogRecord>,
    pub dropped: Vec<DroppedRecord>,
}

impl NormalizedBatch {
    pub fn issues(&self) -> Vec<Issue> {
        self.dropped
            .iter()
            .map(|d| {
                Issue::from_error(
                    format!("record[{}]", d.index),
                    &AloeError::MalformedRecord(d.reason.clone()),
                )
            })
            .collect()
    }
}

/// Maps heterogeneous raw records onto [`LogRecord`].
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    aliases: FieldAliases,
}

impl Normalizer {
    pub fn new(aliases: FieldAliases) -> Self {
        Self { aliases }
    }

    /// Normalize one record. Fails only when both message and class are absent
    /// (or the record is not an object).
    pub fn normalize(&self, raw: &Value, ingested_at: OffsetDateTime) -> Result<LogRecord, AloeError> {
        let obj = raw
            .as_object()
            .ok_or_else(|| AloeError::MalformedRecord("record is not an object".into()))?;
        let field = |names: &[String]| -> Option<String> {
            names.iter().find_map(|n| obj.get(n).and_then(scalar_text))
        };

        let message = field(&self.aliases.message);
        let class = field(&self.aliases.class);
        if message.is_none() && class.is_none() {
            return Err(AloeError::MalformedRecord(
                "neither message nor class present".into(),
            ));
        }

        let timestamp = self
            .aliases
            .timestamp
            .iter()
            .find_map(|n| obj.get(n).and_then(parse_timestamp))
            .unwrap_or(ingested_at);

        Ok(LogRecord {
            service: field(&self.aliases.service).unwrap_or_else(|| UNKNOWN_SERVICE.to_string()),
            class: class.unwrap_or_else(|| UNKNOWN_CLASS.to_string()),
            message: message.unwrap_or_default(),
            timestamp,
            level: field(&self.aliases.level)
                .map(|l| LogLevel::parse(&l))
                .unwrap_or_default(),
            trace_id: field(&self.aliases.trace_id),
            stack: field(&self.aliases.stack),
        })
    }

    /// Normalize a batch; malformed records are dropped and counted, never fatal.
    pub fn normalize_batch(&self, raw: &[Value], ingested_at: OffsetDateTime) -> NormalizedBatch {
        let mut batch = NormalizedBatch::default();
        for (index, item) in raw.iter().enumerate() {
            match self.normalize(item, ingested_at) {
                Ok(rec) => batch.records.push(rec),
                Err(e) => {
                    tracing::debug!(index, error = %e, "dropping record");
                    batch.dropped.push(DroppedRecord {
                        index,
                        reason: e.to_string(),
                    });
                }
            }
        }
        if !batch.dropped.is_empty() {
            tracing::warn!(
                dropped = batch.dropped.len(),
                kept = batch.records.len(),
                "dropped malformed records"
            );
        }
        batch
    }
}

fn scalar_text(v: &Value) -> Option<String> {
    let s = match v {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!s.is_empty()).then_some(s)
}

/// RFC 3339 strings, or integer epoch milliseconds.
fn parse_timestamp(v: &Value) -> Option<OffsetDateTime> {
    match v {
        Value::String(s) => OffsetDateTime::parse(s.trim(), &Rfc3339).ok(),
        Value::Number(n) => {
            let millis = n.as_i64()?;
            OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000).ok()
        }
        _ => None,
    }
}
