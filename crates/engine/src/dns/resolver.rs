//! TXT lookups against a single resolver

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::error::ResolveErrorKind;
use hickory_resolver::TokioAsyncResolver;
use parking_lot::RwLock;
use tracing::{debug, trace};

use wildcert_common::canonical_name;

use crate::error::DnsLookupError;

/// Source of TXT answers.
///
/// An absent name is an empty answer, not an error. Errors are reserved for
/// resolvers that could not answer at all.
#[async_trait]
pub trait TxtLookup: Send + Sync {
    /// Shown in reports, usually the resolver address
    fn label(&self) -> String;

    /// Every TXT value published under `name`
    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>, DnsLookupError>;
}

/// Uncached TXT lookups against one recursive resolver
pub struct HickoryTxtResolver {
    address: IpAddr,
    resolver: TokioAsyncResolver,
}

impl HickoryTxtResolver {
    /// Create a resolver that only talks to `address` on port 53
    pub fn new(address: IpAddr, timeout: Duration) -> Self {
        let group = NameServerConfigGroup::from_ips_clear(&[address], 53, true);
        let config = ResolverConfig::from_parts(None, vec![], group);

        let mut opts = ResolverOpts::default();
        opts.timeout = timeout;
        opts.attempts = 2;
        // Every pass must observe fresh data
        opts.cache_size = 0;
        opts.use_hosts_file = false;

        debug!(resolver = %address, timeout_ms = timeout.as_millis() as u64, "Created TXT resolver");

        Self {
            address,
            resolver: TokioAsyncResolver::tokio(config, opts),
        }
    }

    pub fn address(&self) -> IpAddr {
        self.address
    }
}

#[async_trait]
impl TxtLookup for HickoryTxtResolver {
    fn label(&self) -> String {
        self.address.to_string()
    }

    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>, DnsLookupError> {
        // Absolute name so no search domain is appended
        let fqdn = format!("{}.", canonical_name(name));

        match self.resolver.txt_lookup(fqdn.as_str()).await {
            Ok(lookup) => {
                let values: Vec<String> = lookup
                    .iter()
                    .map(|txt| {
                        txt.txt_data()
                            .iter()
                            .map(|data| String::from_utf8_lossy(data).into_owned())
                            .collect::<String>()
                    })
                    .collect();

                trace!(
                    resolver = %self.address,
                    name = %name,
                    count = values.len(),
                    "TXT lookup answered"
                );
                Ok(values)
            }
            Err(e) => match e.kind() {
                ResolveErrorKind::NoRecordsFound { .. } => {
                    trace!(resolver = %self.address, name = %name, "No TXT records");
                    Ok(Vec::new())
                }
                ResolveErrorKind::Timeout => Err(DnsLookupError::Timeout {
                    resolver: self.label(),
                    name: name.to_string(),
                }),
                _ => Err(DnsLookupError::Failed {
                    resolver: self.label(),
                    name: name.to_string(),
                    message: e.to_string(),
                }),
            },
        }
    }
}

/// In-memory zone for offline runs and tests.
///
/// Clones share the same records, so a test can keep a handle and publish
/// values while the engine holds another.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    label: String,
    records: Arc<RwLock<HashMap<String, Vec<String>>>>,
    failure: Arc<RwLock<Option<String>>>,
}

impl StaticResolver {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Default::default()
        }
    }

    /// Append a TXT value under `name`
    pub fn publish(&self, name: &str, value: impl Into<String>) {
        self.records
            .write()
            .entry(canonical_name(name))
            .or_default()
            .push(value.into());
    }

    /// Replace every TXT value under `name`
    pub fn set(&self, name: &str, values: Vec<String>) {
        self.records.write().insert(canonical_name(name), values);
    }

    pub fn clear(&self, name: &str) {
        self.records.write().remove(&canonical_name(name));
    }

    /// Make every lookup fail with `message`; `None` restores answers
    pub fn fail_with(&self, message: Option<String>) {
        *self.failure.write() = message;
    }
}

#[async_trait]
impl TxtLookup for StaticResolver {
    fn label(&self) -> String {
        self.label.clone()
    }

    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>, DnsLookupError> {
        if let Some(message) = self.failure.read().clone() {
            return Err(DnsLookupError::Failed {
                resolver: self.label.clone(),
                name: name.to_string(),
                message,
            });
        }

        Ok(self
            .records
            .read()
            .get(&canonical_name(name))
            .cloned()
            .unwrap_or_default())
    }
}
