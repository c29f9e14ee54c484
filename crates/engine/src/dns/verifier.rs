//! Challenge verification against the primary resolver

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, info};

use wildcert_common::{canonical_name, ChallengeRecord, RecordCheck, RecordIssue, VerificationReport};

use super::resolver::TxtLookup;
use crate::error::DnsLookupError;

/// Checks that every challenge record is visible with its exact value.
///
/// Read-only: the caller decides what to do with the report. Matching is
/// exact and case-sensitive, so a value that merely contains the token or
/// differs in case does not count.
#[derive(Clone)]
pub struct DnsVerifier {
    lookup: Arc<dyn TxtLookup>,
}

impl DnsVerifier {
    pub fn new(lookup: Arc<dyn TxtLookup>) -> Self {
        Self { lookup }
    }

    pub fn resolver_label(&self) -> String {
        self.lookup.label()
    }

    /// Run one verification pass over `records`
    ///
    /// Every record gets a verdict; a failing record never stops the others
    /// from being checked.
    pub async fn verify(&self, domain: &str, records: &[ChallengeRecord]) -> VerificationReport {
        let answers = self.lookup_distinct(records).await;

        let checks: Vec<RecordCheck> = records
            .iter()
            .map(|record| {
                let answer = answers.get(&canonical_name(&record.name));
                check_record(record, answer)
            })
            .collect();

        let all_matched = !checks.is_empty() && checks.iter().all(|c| c.matched);

        if all_matched {
            info!(domain = %domain, records = checks.len(), "All challenge records visible");
        } else {
            debug!(
                domain = %domain,
                failing = checks.iter().filter(|c| !c.matched).count(),
                total = checks.len(),
                "Challenge records not yet visible"
            );
        }

        VerificationReport {
            domain: domain.to_string(),
            resolver: self.lookup.label(),
            checked_at: Utc::now(),
            records: checks,
            all_matched,
        }
    }

    /// Query each distinct record name once
    async fn lookup_distinct(
        &self,
        records: &[ChallengeRecord],
    ) -> HashMap<String, Result<Vec<String>, DnsLookupError>> {
        let mut names: Vec<String> = records.iter().map(|r| canonical_name(&r.name)).collect();
        names.sort();
        names.dedup();

        let lookups = names.iter().map(|name| self.lookup.lookup_txt(name));
        let results = join_all(lookups).await;

        names.into_iter().zip(results).collect()
    }
}

fn check_record(
    record: &ChallengeRecord,
    answer: Option<&Result<Vec<String>, DnsLookupError>>,
) -> RecordCheck {
    let (found, issue) = match answer {
        Some(Ok(values)) => {
            let issue = if values.is_empty() {
                Some(RecordIssue::RecordNotFound)
            } else if values.iter().any(|v| v == &record.value) {
                None
            } else {
                Some(RecordIssue::ValueMismatch)
            };
            (values.clone(), issue)
        }
        Some(Err(e)) => (
            Vec::new(),
            Some(RecordIssue::LookupFailed {
                message: e.to_string(),
            }),
        ),
        None => (Vec::new(), Some(RecordIssue::RecordNotFound)),
    };

    RecordCheck {
        ordinal: record.ordinal,
        name: record.name.clone(),
        expected: record.value.clone(),
        found,
        matched: issue.is_none(),
        issue,
    }
}

/// Copy the verdicts of `report` onto the session records.
///
/// `found_value` is only set for matched records, to the matched value.
pub fn apply_report(records: &mut [ChallengeRecord], report: &VerificationReport) {
    for record in records.iter_mut() {
        let check = report
            .records
            .iter()
            .find(|c| c.ordinal == record.ordinal && c.expected == record.value);

        match check {
            Some(check) if check.matched => {
                record.matched = true;
                record.found_value = Some(record.value.clone());
            }
            _ => {
                record.matched = false;
                record.found_value = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::resolver::StaticResolver;

    const NAME: &str = "_acme-challenge.p2s.tech";

    fn wildcard_records() -> Vec<ChallengeRecord> {
        vec![
            ChallengeRecord::new(NAME, "A", 1),
            ChallengeRecord::new(NAME, "B", 2),
        ]
    }

    fn verifier(zone: &StaticResolver) -> DnsVerifier {
        DnsVerifier::new(Arc::new(zone.clone()))
    }

    #[tokio::test]
    async fn test_all_records_matched() {
        let zone = StaticResolver::new("primary");
        zone.publish(NAME, "B");
        zone.publish(NAME, "A");

        let report = verifier(&zone).verify("p2s.tech", &wildcard_records()).await;
        assert!(report.all_matched);
        assert_eq!(report.resolver, "primary");
        assert!(report.records.iter().all(|c| c.issue.is_none()));
        assert_eq!(report.records[0].found.len(), 2);
    }

    #[tokio::test]
    async fn test_partial_match_reports_every_record() {
        let zone = StaticResolver::new("primary");
        zone.publish(NAME, "A");

        let report = verifier(&zone).verify("p2s.tech", &wildcard_records()).await;
        assert!(!report.all_matched);
        assert!(report.records[0].matched);
        assert!(!report.records[1].matched);
        assert_eq!(report.records[1].issue, Some(RecordIssue::ValueMismatch));
        assert_eq!(report.records[1].found, vec!["A".to_string()]);
        assert_eq!(report.failing().count(), 1);
    }

    #[tokio::test]
    async fn test_missing_record() {
        let zone = StaticResolver::new("primary");
        let report = verifier(&zone).verify("p2s.tech", &wildcard_records()).await;
        assert!(report
            .records
            .iter()
            .all(|c| c.issue == Some(RecordIssue::RecordNotFound)));
    }

    #[tokio::test]
    async fn test_no_superset_or_case_insensitive_match() {
        let zone = StaticResolver::new("primary");
        zone.publish(NAME, "AA");
        zone.publish(NAME, "b");
        zone.publish(NAME, "\"A\"");

        let report = verifier(&zone).verify("p2s.tech", &wildcard_records()).await;
        assert!(report.records.iter().all(|c| !c.matched));
    }

    #[tokio::test]
    async fn test_lookup_failure_is_per_record() {
        let zone = StaticResolver::new("primary");
        zone.fail_with(Some("connection refused".to_string()));

        let report = verifier(&zone).verify("p2s.tech", &wildcard_records()).await;
        assert!(!report.all_matched);
        assert!(matches!(
            report.records[0].issue,
            Some(RecordIssue::LookupFailed { .. })
        ));
        assert_eq!(report.records.len(), 2);
    }

    #[tokio::test]
    async fn test_verification_is_idempotent() {
        let zone = StaticResolver::new("primary");
        zone.publish(NAME, "A");
        let verifier = verifier(&zone);
        let records = wildcard_records();

        let first = verifier.verify("p2s.tech", &records).await;
        let second = verifier.verify("p2s.tech", &records).await;
        assert_eq!(first.records, second.records);
        assert_eq!(first.all_matched, second.all_matched);
    }

    #[tokio::test]
    async fn test_empty_record_set_never_matches() {
        let zone = StaticResolver::new("primary");
        let report = verifier(&zone).verify("p2s.tech", &[]).await;
        assert!(!report.all_matched);
    }

    #[tokio::test]
    async fn test_apply_report_sets_found_value_only_on_match() {
        let zone = StaticResolver::new("primary");
        zone.publish(NAME, "A");
        zone.publish(NAME, "stale");

        let mut records = wildcard_records();
        let report = verifier(&zone).verify("p2s.tech", &records).await;
        apply_report(&mut records, &report);

        assert!(records[0].matched);
        assert_eq!(records[0].found_value.as_deref(), Some("A"));
        assert!(!records[1].matched);
        assert_eq!(records[1].found_value, None);
    }
}
