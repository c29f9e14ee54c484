//! Propagation sampling across a panel of public resolvers
//!
//! The result is progress information for the operator. It never gates
//! issuance; only the primary resolver's verification does.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, trace, warn};

use wildcert_common::{canonical_name, ChallengeRecord, PropagationReport, ResolverSample};

use super::resolver::TxtLookup;

/// Samples a fixed resolver panel with bounded concurrency and one deadline
#[derive(Clone)]
pub struct PropagationChecker {
    panel: Vec<Arc<dyn TxtLookup>>,
    max_concurrent: usize,
    timeout: Duration,
}

impl PropagationChecker {
    pub fn new(panel: Vec<Arc<dyn TxtLookup>>, max_concurrent: usize, timeout: Duration) -> Self {
        Self {
            panel,
            max_concurrent: max_concurrent.max(1),
            timeout,
        }
    }

    pub fn panel_size(&self) -> usize {
        self.panel.len()
    }

    /// Ask every resolver whether it sees the full expected value set.
    ///
    /// Resolvers that fail or miss the deadline count as not propagated.
    pub async fn check(&self, domain: &str, records: &[ChallengeRecord]) -> PropagationReport {
        let deadline = Instant::now() + self.timeout;
        let expected: Vec<String> = records.iter().map(|r| r.value.clone()).collect();

        let mut names: Vec<String> = records.iter().map(|r| canonical_name(&r.name)).collect();
        names.sort();
        names.dedup();

        debug!(
            domain = %domain,
            resolvers = self.panel.len(),
            timeout_secs = self.timeout.as_secs(),
            "Sampling DNS propagation"
        );

        let ordered = self.sample_panel(&names, records, deadline).await;

        let propagated = ordered.iter().filter(|s| s.propagated).count();
        debug!(
            domain = %domain,
            propagated,
            total = ordered.len(),
            "Propagation sample complete"
        );

        PropagationReport {
            domain: domain.to_string(),
            expected,
            total: ordered.len(),
            propagated,
            samples: ordered,
        }
    }

    /// Raw TXT answers for `name` from every resolver in the panel
    pub async fn lookup(&self, name: &str) -> Vec<ResolverSample> {
        let deadline = Instant::now() + self.timeout;
        self.sample_panel(&[canonical_name(name)], &[], deadline)
            .await
    }

    async fn sample_panel(
        &self,
        names: &[String],
        records: &[ChallengeRecord],
        deadline: Instant,
    ) -> Vec<ResolverSample> {
        let samples: Vec<ResolverSample> = stream::iter(self.panel.iter().cloned())
            .map(|resolver| sample(resolver, names, records, deadline))
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        // Keep panel order regardless of completion order
        let mut ordered = Vec::with_capacity(samples.len());
        for resolver in &self.panel {
            let label = resolver.label();
            if let Some(sample) = samples.iter().find(|s| s.resolver == label) {
                ordered.push(sample.clone());
            }
        }
        ordered
    }
}

async fn sample(
    resolver: Arc<dyn TxtLookup>,
    names: &[String],
    records: &[ChallengeRecord],
    deadline: Instant,
) -> ResolverSample {
    let label = resolver.label();
    let mut answers: Vec<(String, Vec<String>)> = Vec::with_capacity(names.len());
    let mut error = None;

    for name in names {
        match timeout_at(deadline, resolver.lookup_txt(name)).await {
            Ok(Ok(values)) => answers.push((name.clone(), values)),
            Ok(Err(e)) => {
                trace!(resolver = %label, name = %name, error = %e, "Propagation lookup failed");
                error = Some(e.to_string());
                break;
            }
            Err(_) => {
                warn!(resolver = %label, name = %name, "Propagation lookup hit the deadline");
                error = Some("deadline exceeded".to_string());
                break;
            }
        }
    }

    let propagated = error.is_none()
        && !records.is_empty()
        && records.iter().all(|record| {
            let name = canonical_name(&record.name);
            answers
                .iter()
                .any(|(n, values)| *n == name && values.iter().any(|v| v == &record.value))
        });

    let mut found: Vec<String> = answers.into_iter().flat_map(|(_, v)| v).collect();
    found.dedup();

    ResolverSample {
        resolver: label,
        propagated,
        found,
        error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::resolver::StaticResolver;
    use crate::error::DnsLookupError;
    use async_trait::async_trait;

    const NAME: &str = "_acme-challenge.p2s.tech";

    struct SlowResolver;

    #[async_trait]
    impl TxtLookup for SlowResolver {
        fn label(&self) -> String {
            "slow".to_string()
        }

        async fn lookup_txt(&self, _name: &str) -> Result<Vec<String>, DnsLookupError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(vec!["A".to_string(), "B".to_string()])
        }
    }

    fn records() -> Vec<ChallengeRecord> {
        vec![
            ChallengeRecord::new(NAME, "A", 1),
            ChallengeRecord::new(NAME, "B", 2),
        ]
    }

    fn zone(label: &str, values: &[&str]) -> Arc<dyn TxtLookup> {
        let zone = StaticResolver::new(label);
        for v in values {
            zone.publish(NAME, *v);
        }
        Arc::new(zone)
    }

    #[tokio::test]
    async fn test_fraction_across_panel() {
        let panel = vec![
            zone("8.8.8.8", &["A", "B"]),
            zone("1.1.1.1", &["A"]),
            zone("9.9.9.9", &["B", "A"]),
            zone("208.67.222.222", &[]),
        ];
        let checker = PropagationChecker::new(panel, 2, Duration::from_secs(5));

        let report = checker.check("p2s.tech", &records()).await;
        assert_eq!(report.total, 4);
        assert_eq!(report.propagated, 2);
        assert!((report.fraction() - 0.5).abs() < f64::EPSILON);
        assert_eq!(report.samples[1].resolver, "1.1.1.1");
        assert!(!report.samples[1].propagated);
        assert_eq!(report.expected, vec!["A".to_string(), "B".to_string()]);
    }

    #[tokio::test]
    async fn test_failing_resolver_counts_as_not_propagated() {
        let failing = StaticResolver::new("broken");
        failing.fail_with(Some("SERVFAIL".to_string()));
        let panel = vec![zone("ok", &["A", "B"]), Arc::new(failing) as Arc<dyn TxtLookup>];
        let checker = PropagationChecker::new(panel, 4, Duration::from_secs(5));

        let report = checker.check("p2s.tech", &records()).await;
        assert_eq!(report.propagated, 1);
        assert!(report.samples[1].error.as_deref().unwrap().contains("SERVFAIL"));
    }

    #[tokio::test]
    async fn test_lookup_reports_raw_values() {
        let panel = vec![zone("8.8.8.8", &["A", "B"]), zone("1.1.1.1", &[])];
        let checker = PropagationChecker::new(panel, 2, Duration::from_secs(5));

        let samples = checker.lookup("_ACME-challenge.p2s.tech.").await;
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].found, vec!["A".to_string(), "B".to_string()]);
        assert!(samples[1].found.is_empty());
        assert!(samples.iter().all(|s| !s.propagated));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_bounds_slow_resolvers() {
        let panel = vec![zone("fast", &["A", "B"]), Arc::new(SlowResolver) as Arc<dyn TxtLookup>];
        let checker = PropagationChecker::new(panel, 2, Duration::from_secs(2));

        let report = checker.check("p2s.tech", &records()).await;
        assert_eq!(report.propagated, 1);
        assert_eq!(report.samples[1].error.as_deref(), Some("deadline exceeded"));
    }
}
