//! Caller-facing result shapes.
//!
//! These are consumed by the CLI and web front ends, so they serialize to
//! plain JSON and carry enough detail (expected vs. observed values, exit
//! codes) to render guidance without re-querying DNS.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::types::Phase;

// ============================================================================
// Verification
// ============================================================================

/// Why a single record did not match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordIssue {
    /// No TXT values exist under the name yet
    RecordNotFound,
    /// TXT values exist but none equals the expected token
    ValueMismatch,
    /// The resolver could not answer
    LookupFailed { message: String },
}

/// Per-record verification detail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordCheck {
    pub ordinal: usize,
    pub name: String,
    pub expected: String,
    /// Every TXT value returned for `name`
    pub found: Vec<String>,
    pub matched: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue: Option<RecordIssue>,
}

/// Outcome of one verification pass over a session's records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub domain: String,
    /// Resolver the pass was made against
    pub resolver: String,
    pub checked_at: DateTime<Utc>,
    pub records: Vec<RecordCheck>,
    pub all_matched: bool,
}

impl VerificationReport {
    /// Records that still need attention
    pub fn failing(&self) -> impl Iterator<Item = &RecordCheck> {
        self.records.iter().filter(|r| !r.matched)
    }
}

// ============================================================================
// Propagation
// ============================================================================

/// What one resolver in the propagation panel reported
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverSample {
    pub resolver: String,
    /// Every expected value was present
    pub propagated: bool,
    pub found: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Propagation progress across the resolver panel (display only)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropagationReport {
    pub domain: String,
    pub expected: Vec<String>,
    pub samples: Vec<ResolverSample>,
    pub propagated: usize,
    pub total: usize,
}

impl PropagationReport {
    /// Share of resolvers that see the full expected value set
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.propagated as f64 / self.total as f64
        }
    }
}

// ============================================================================
// Installation and Edge Sync
// ============================================================================

/// Canonical store locations of an installed certificate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledPaths {
    pub directory: PathBuf,
    pub certificate: PathBuf,
    pub private_key: PathBuf,
    pub chain: PathBuf,
}

/// Facts read from an installed certificate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateSummary {
    /// DNS names the certificate covers
    pub names: Vec<String>,
    pub not_after: DateTime<Utc>,
    #[serde(default)]
    pub issuer: Option<String>,
}

/// Outcome of an edge config sync
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    /// Anything on disk changed
    pub updated: bool,
    pub fragment_path: PathBuf,
    /// The master config's import directive had to be added or deduplicated
    pub master_repaired: bool,
}

/// How a reload was attempted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReloadMethod {
    /// Local reload command
    Command,
    /// Control-plane HTTP endpoint
    ControlApi,
}

/// One reload attempt and what happened
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReloadAttempt {
    pub method: ReloadMethod,
    pub succeeded: bool,
    /// Exit status, HTTP status or error text
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReloadOutcome {
    /// Reload command succeeded
    Primary,
    /// Reload command failed, control API succeeded
    Fallback,
    /// Nothing changed, no reload attempted
    Skipped,
    /// Both paths failed; config is written but not live
    Failed,
}

/// Result of applying config to the running edge server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReloadResult {
    pub outcome: ReloadOutcome,
    pub attempts: Vec<ReloadAttempt>,
}

impl ReloadResult {
    pub fn skipped() -> Self {
        Self {
            outcome: ReloadOutcome::Skipped,
            attempts: Vec::new(),
        }
    }

    /// The running server has the current config
    pub fn succeeded(&self) -> bool {
        !matches!(self.outcome, ReloadOutcome::Failed)
    }
}

// ============================================================================
// Overall Results
// ============================================================================

/// Success response of a verify-and-issue run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueSummary {
    pub domain: String,
    pub installed: InstalledPaths,
    pub certificate: CertificateSummary,
    pub config_synced: bool,
    pub config_updated: bool,
    pub reload_succeeded: bool,
    pub reload: ReloadResult,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Failure response with everything needed to act on it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    /// Stable machine-readable code, e.g. `rate_limited`
    pub code: String,
    pub message: String,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    /// Per-record breakdown when verification was involved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<Vec<RecordCheck>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_propagation_fraction() {
        let report = PropagationReport {
            domain: "p2s.tech".to_string(),
            expected: vec!["A".to_string()],
            samples: Vec::new(),
            propagated: 3,
            total: 4,
        };
        assert!((report.fraction() - 0.75).abs() < f64::EPSILON);

        let empty = PropagationReport {
            total: 0,
            propagated: 0,
            ..report
        };
        assert_eq!(empty.fraction(), 0.0);
    }

    #[test]
    fn test_reload_result_succeeded() {
        assert!(ReloadResult::skipped().succeeded());
        let failed = ReloadResult {
            outcome: ReloadOutcome::Failed,
            attempts: Vec::new(),
        };
        assert!(!failed.succeeded());
    }

    #[test]
    fn test_record_issue_serialization() {
        let check = RecordCheck {
            ordinal: 2,
            name: "_acme-challenge.p2s.tech".to_string(),
            expected: "B".to_string(),
            found: vec!["A".to_string()],
            matched: false,
            issue: Some(RecordIssue::ValueMismatch),
        };
        let json = serde_json::to_value(&check).unwrap();
        assert_eq!(json["issue"]["kind"], "value_mismatch");
        assert_eq!(json["found"][0], "A");
    }
}
