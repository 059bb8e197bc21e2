use crate::types::{Label, Severity, Summary, Triage};

/// Reduce per-cluster triages into run-level counts.
///
/// Failed triages count toward `cluster_count` and `failed_cluster_count`
/// but never toward the label or priority breakdowns.
pub fn summarize(log_count: usize, dropped_record_count: usize, triages: &[Triage]) -> Summary {
    let mut s = Summary {
        log_count,
        dropped_record_count,
        cluster_count: triages.len(),
        ..Summary::default()
    };
    for t in triages {
        let Some(v) = t.verdict.as_ref().filter(|_| t.is_ok()) else {
            s.failed_cluster_count += 1;
            continue;
        };
        s.triaged_cluster_count += 1;
        *s.by_label.entry(v.label).or_default() += 1;
        *s.by_priority.entry(v.priority).or_default() += 1;
        if v.label == Label::InternalError && v.priority == Severity::High {
            s.internal_high_count += 1;
        }
    }
    s.has_noise = s.by_label.contains_key(&Label::Noise);
    s.has_external = s.by_label.contains_key(&Label::ExternalService);
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Extracted, TriageStatus, Verdict};

    fn triage(i: usize, label: Option<Label>, priority: Severity) -> Triage {
        Triage {
            cluster_signature: format!("sig{i}"),
            cluster_index: i,
            size: 1,
            status: if label.is_some() {
                TriageStatus::Ok
            } else {
                TriageStatus::TriageFailed
            },
            verdict: label.map(|label| Verdict {
                label,
                severity: Severity::Medium,
                priority,
                confidence: 0.9,
                reason: String::new(),
            }),
            extracted: Extracted::default(),
            error: label.is_none().then(|| "timeout".to_string()),
        }
    }

    #[test]
    fn counts_and_flags() {
        let triages = vec![
            triage(0, Some(Label::InternalError), Severity::High),
            triage(1, Some(Label::InternalError), Severity::Low),
            triage(2, Some(Label::Noise), Severity::Low),
            triage(3, Some(Label::Timeout), Severity::High),
            triage(4, None, Severity::High),
        ];
        let s = summarize(120, 3, &triages);
        assert_eq!(s.log_count, 120);
        assert_eq!(s.dropped_record_count, 3);
        assert_eq!(s.cluster_count, 5);
        assert_eq!(s.triaged_cluster_count, 4);
        assert_eq!(s.failed_cluster_count, 1);
        assert_eq!(s.by_label[&Label::InternalError], 2);
        assert_eq!(s.by_priority[&Severity::High], 2);
        assert_eq!(s.internal_high_count, 1);
        assert!(s.has_noise);
        assert!(!s.has_external);
        assert_eq!(s.by_label.values().sum::<usize>(), s.triaged_cluster_count);
    }

    #[test]
    fn empty_run() {
        let s = summarize(0, 0, &[]);
        assert_eq!(s, Summary::default());
    }
}
