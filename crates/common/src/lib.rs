//! Shared types for the wildcert certificate engine.
//!
//! - [`types`]: challenge records, lifecycle phases and sessions
//! - [`report`]: caller-facing result shapes (serde)
//! - [`domain`]: domain normalization and challenge record naming
//! - [`ids`]: session identifiers and extraction generations

pub mod domain;
pub mod ids;
pub mod report;
pub mod types;

pub use domain::{
    canonical_name, challenge_record_name, normalize_domain, validate_email, wildcard_of,
    DomainError, ACME_CHALLENGE_RECORD,
};
pub use ids::{Generation, SessionId};
pub use report::{
    CertificateSummary, FailureReport, InstalledPaths, IssueSummary, PropagationReport,
    RecordCheck, RecordIssue, ReloadAttempt, ReloadMethod, ReloadOutcome, ReloadResult,
    ResolverSample, SyncResult, VerificationReport,
};
pub use types::{CertificateScope, ChallengeRecord, ChallengeSession, Phase, PhaseError};
