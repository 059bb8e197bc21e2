use std::collections::HashMap;

use time::OffsetDateTime;

use crate::config::MaskConfig;
use crate::error::AloeError;
use crate::hash::cluster_signature;
use crate::mask::Masker;
use crate::types::{Cluster, LogRecord, UNCLASSIFIABLE_SIGNATURE};

/// Groups records by (service, class, masked pattern) in a single pass.
#[derive(Debug, Clone)]
pub struct ClusterEngine {
    masker: Masker,
}

struct Group {
    signature: String,
    pattern: String,
    service: String,
    class: String,
    members: Vec<LogRecord>,
}

impl ClusterEngine {
    pub fn new(masker: Masker) -> Self {
        Self { masker }
    }

    pub fn from_config(cfg: &MaskConfig) -> Result<Self, AloeError> {
        Ok(Self::new(Masker::new(cfg)?))
    }

    /// Masked pattern and signature for one record.
    pub fn signature_of(&self, record: &LogRecord) -> (String, String) {
        let pattern = self.masker.mask(&record.message);
        if self.masker.is_empty_pattern(&pattern) {
            return (String::new(), UNCLASSIFIABLE_SIGNATURE.to_string());
        }
        let sig = cluster_signature(&record.service, &record.class, &pattern);
        (pattern, sig)
    }

    /// Cluster a batch. Members keep input order; clusters are ordered by
    /// size descending, then signature, so the same batch always yields the
    /// same output.
    pub fn cluster(&self, records: Vec<LogRecord>) -> Vec<Cluster> {
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut groups: Vec<Group> = Vec::new();

        for record in records {
            let (pattern, signature) = self.signature_of(&record);
            let slot = match index.get(&signature) {
                Some(&i) => i,
                None => {
                    index.insert(signature.clone(), groups.len());
                    groups.push(Group {
                        signature,
                        pattern,
                        service: record.service.clone(),
                        class: record.class.clone(),
                        members: Vec::new(),
                    });
                    groups.len() - 1
                }
            };
            groups[slot].members.push(record);
        }

        let mut clusters: Vec<Cluster> = groups.into_iter().map(into_cluster).collect();
        clusters.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.signature.cmp(&b.signature)));
        tracing::debug!(clusters = clusters.len(), "clustered records");
        clusters
    }
}

fn into_cluster(group: Group) -> Cluster {
    let rep_idx = representative_index(&group.members);
    let representative = group.members[rep_idx].clone();
    Cluster {
        size: group.members.len(),
        signature: group.signature,
        pattern: group.pattern,
        service: group.service,
        class: group.class,
        representative,
        members: group.members,
        merged_from: Vec::new(),
    }
}

/// Most frequent raw message wins; ties go to the earliest timestamp, then to
/// the earliest input position. `members` is never empty.
fn representative_index(members: &[LogRecord]) -> usize {
    // message -> (count, earliest timestamp, index of that earliest member)
    let mut seen: HashMap<&str, (usize, OffsetDateTime, usize)> = HashMap::new();
    for (i, m) in members.iter().enumerate() {
        seen.entry(m.message.as_str())
            .and_modify(|(count, ts, idx)| {
                *count += 1;
                if m.timestamp < *ts {
                    *ts = m.timestamp;
                    *idx = i;
                }
            })
            .or_insert((1, m.timestamp, i));
    }
    seen.into_values()
        .max_by(|a, b| {
            a.0.cmp(&b.0)
                .then_with(|| b.1.cmp(&a.1))
                .then_with(|| b.2.cmp(&a.2))
        })
        .map(|(_, _, idx)| idx)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LogLevel;

    fn engine() -> ClusterEngine {
        ClusterEngine::from_config(&MaskConfig::default()).unwrap()
    }

    fn rec(service: &str, class: &str, message: &str, ts: i64) -> LogRecord {
        LogRecord {
            service: service.into(),
            class: class.into(),
            message: message.into(),
            timestamp: OffsetDateTime::from_unix_timestamp(ts).unwrap(),
            level: LogLevel::Error,
            trace_id: None,
            stack: None,
        }
    }

    #[test]
    fn token_variants_share_a_signature() {
        let e = engine();
        let a = rec("pay", "Client", "timeout after 3000 ms (req 17)", 1);
        let b = rec("pay", "Client", "Timeout after 12 ms (req 99812)", 2);
        assert_eq!(e.signature_of(&a).1, e.signature_of(&b).1);
    }

    #[test]
    fn service_and_class_split_clusters() {
        let e = engine();
        let a = rec("pay", "Client", "boom", 1);
        let b = rec("ship", "Client", "boom", 1);
        let c = rec("pay", "Server", "boom", 1);
        let sigs = [e.signature_of(&a).1, e.signature_of(&b).1, e.signature_of(&c).1];
        assert_ne!(sigs[0], sigs[1]);
        assert_ne!(sigs[0], sigs[2]);
    }

    #[test]
    fn clustering_is_idempotent() {
        let batch: Vec<LogRecord> = (0..50)
            .map(|i| rec("svc", "C", &format!("error code {} in step {}", i % 5, i % 3), i))
            .chain((0..7).map(|i| rec("svc", "D", &format!("disk {i} full"), i)))
            .collect();
        let first = engine().cluster(batch.clone());
        let second = engine().cluster(batch);
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].size, 50);
        assert_eq!(first[1].size, 7);
    }

    #[test]
    fn members_keep_input_order() {
        let batch = vec![
            rec("s", "c", "fail 3", 30),
            rec("s", "c", "fail 1", 10),
            rec("s", "c", "fail 2", 20),
        ];
        let clusters = engine().cluster(batch);
        let msgs: Vec<&str> = clusters[0].members.iter().map(|m| m.message.as_str()).collect();
        assert_eq!(msgs, vec!["fail 3", "fail 1", "fail 2"]);
    }

    #[test]
    fn representative_prefers_frequency_then_earliest() {
        let batch = vec![
            rec("s", "c", "fail 1", 50),
            rec("s", "c", "fail 2", 40),
            rec("s", "c", "fail 2", 60),
            rec("s", "c", "fail 3", 5),
        ];
        let clusters = engine().cluster(batch);
        let r = &clusters[0].representative;
        assert_eq!(r.message, "fail 2");
        assert_eq!(r.timestamp.unix_timestamp(), 40);

        let tie = vec![
            rec("s", "c", "fail 1", 50),
            rec("s", "c", "fail 2", 40),
        ];
        let clusters = engine().cluster(tie);
        assert_eq!(clusters[0].representative.message, "fail 2");
    }

    #[test]
    fn empty_patterns_go_to_unclassifiable() {
        let batch = vec![
            rec("a", "X", "12345", 1),
            rec("b", "Y", "", 2),
            rec("a", "X", "real error", 3),
        ];
        let clusters = engine().cluster(batch);
        let un = clusters.iter().find(|c| c.is_unclassifiable()).unwrap();
        assert_eq!(un.size, 2);
        assert_eq!(un.signature, UNCLASSIFIABLE_SIGNATURE);
        assert_eq!(un.pattern, "");
    }

    #[test]
    fn equal_sizes_order_by_signature() {
        let batch = vec![rec("s", "c", "alpha", 1), rec("s", "c", "beta", 1)];
        let clusters = engine().cluster(batch);
        assert!(clusters[0].signature < clusters[1].signature);
    }
}
