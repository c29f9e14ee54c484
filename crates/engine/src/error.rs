//! Error types for every pipeline stage
//!
//! Verification problems are not errors: they are reported per record in a
//! [`VerificationReport`]. Everything here short-circuits the stage that
//! raised it.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use wildcert_common::{DomainError, FailureReport, Phase, PhaseError, VerificationReport};

/// Errors from running the external ACME client process
#[derive(Debug, Error)]
pub enum ClientError {
    /// Binary missing or not executable
    #[error("ACME client not found at {binary:?}")]
    NotInstalled { binary: PathBuf },

    #[error("failed to run ACME client: {0}")]
    Io(#[from] io::Error),

    #[error("ACME client did not finish within {0:?}")]
    TimedOut(Duration),

    #[error("ACME client run was cancelled")]
    Cancelled,
}

/// Errors from the declare (decline) invocation
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("ACME client is not installed at {binary:?}")]
    ClientNotInstalled { binary: PathBuf },

    /// The output matched no challenge pattern; usually a client format change
    #[error("no DNS challenge records found in ACME client output (exit code {exit_code:?}): {excerpt}")]
    NoRecordsParsed {
        exit_code: Option<i32>,
        excerpt: String,
    },

    #[error(transparent)]
    Client(ClientError),
}

impl From<ClientError> for ExtractionError {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::NotInstalled { binary } => ExtractionError::ClientNotInstalled { binary },
            other => ExtractionError::Client(other),
        }
    }
}

/// Errors from the proceed invocation
#[derive(Debug, Error)]
pub enum IssuanceError {
    #[error("issuance requires a verified session, session is {phase}")]
    NotVerified { phase: Phase },

    /// The client reported different tokens than the ones verified in DNS
    #[error("ACME client reported challenges {reported:?}, session verified {expected:?}")]
    ChallengeMismatch {
        expected: Vec<String>,
        reported: Vec<String>,
    },

    /// The CA rejected validation although the local DNS check passed
    #[error("certificate authority rejected DNS validation (exit code {exit_code:?}): {detail}")]
    RemoteValidationFailed {
        exit_code: Option<i32>,
        detail: String,
    },

    #[error("certificate authority rate limit reached: {detail}")]
    RateLimited { detail: String },

    #[error("ACME client failed with exit code {exit_code:?}: {detail}")]
    ClientFailed {
        exit_code: Option<i32>,
        detail: String,
    },

    #[error("issued artifacts missing from {directory:?}: {missing:?}")]
    ArtifactsMissing {
        directory: PathBuf,
        missing: Vec<PathBuf>,
    },

    #[error("issuance was cancelled")]
    Cancelled,

    #[error("issuance did not finish within {0:?}")]
    TimedOut(Duration),

    #[error(transparent)]
    Client(ClientError),
}

impl From<ClientError> for IssuanceError {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::Cancelled => IssuanceError::Cancelled,
            ClientError::TimedOut(d) => IssuanceError::TimedOut(d),
            other => IssuanceError::Client(other),
        }
    }
}

/// Errors specific to certificate storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// IO error during file operations
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Failed to serialize/deserialize data
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid storage structure
    #[error("Invalid storage structure: {0}")]
    InvalidStructure(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

/// Install-time checks; the issued artifact itself is suspect
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("certificate covers {found:?} but {required:?} are required")]
    CoverageMismatch {
        required: Vec<String>,
        found: Vec<String>,
    },

    #[error("private key {key:?} does not belong to certificate {certificate:?}")]
    KeyMismatch {
        certificate: PathBuf,
        key: PathBuf,
    },

    #[error("certificate expired at {not_after}")]
    Expired { not_after: DateTime<Utc> },

    #[error("unreadable certificate: {0}")]
    InvalidCertificate(String),

    #[error("unreadable private key: {0}")]
    InvalidKey(String),

    #[error("certificate store error: {0}")]
    Storage(#[from] StorageError),
}

impl From<io::Error> for InstallError {
    fn from(e: io::Error) -> Self {
        InstallError::Storage(StorageError::Io(e))
    }
}

/// Errors writing the edge config tree
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("failed to access {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid fragment name for domain '{0}'")]
    InvalidDomain(String),
}

/// DNS resolver errors that are not "record absent"
#[derive(Debug, Clone, Error)]
pub enum DnsLookupError {
    #[error("lookup of {name} via {resolver} failed: {message}")]
    Failed {
        resolver: String,
        name: String,
        message: String,
    },

    #[error("lookup of {name} via {resolver} timed out")]
    Timeout { resolver: String, name: String },
}

/// Session store errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no challenge session for '{domain}'; run extraction first")]
    NotFound { domain: String },

    #[error("another operation is in progress for '{domain}'")]
    Busy { domain: String },

    #[error("challenge session for '{domain}' expired after {age_secs}s; run extraction again")]
    Expired { domain: String, age_secs: i64 },

    /// The session was replaced while an operation was running
    #[error("challenge session for '{domain}' was replaced during the operation")]
    Stale { domain: String },

    #[error("session for '{domain}' failed earlier ({reason}); run extraction again")]
    Failed { domain: String, reason: String },

    #[error(transparent)]
    Phase(#[from] PhaseError),
}

/// Top-level error returned by the engine
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    InvalidInput(#[from] DomainError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("challenge extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    /// Some records are not visible yet; the report lists every one of them
    #[error("{} of {} challenge records not yet visible in DNS", .report.failing().count(), .report.records.len())]
    VerificationIncomplete { report: VerificationReport },

    #[error("certificate issuance failed: {0}")]
    Issuance(#[from] IssuanceError),

    #[error("certificate installation failed: {0}")]
    Install(#[from] InstallError),

    #[error("edge config sync failed: {0}")]
    Sync(#[from] SyncError),

    #[error("no installed certificate for '{domain}'")]
    NotInstalled { domain: String },

    #[error("certificate store error: {0}")]
    Store(#[from] StorageError),
}

impl EngineError {
    /// Stable machine-readable code for front ends
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::InvalidInput(_) => "invalid_input",
            EngineError::Session(e) => match e {
                SessionError::NotFound { .. } => "session_not_found",
                SessionError::Busy { .. } => "session_busy",
                SessionError::Expired { .. } => "session_expired",
                SessionError::Stale { .. } => "session_stale",
                SessionError::Failed { .. } => "session_failed",
                SessionError::Phase(_) => "invalid_phase",
            },
            EngineError::Extraction(e) => match e {
                ExtractionError::ClientNotInstalled { .. } => "client_not_installed",
                ExtractionError::NoRecordsParsed { .. } => "no_records_parsed",
                ExtractionError::Client(_) => "client_error",
            },
            EngineError::VerificationIncomplete { .. } => "verification_incomplete",
            EngineError::Issuance(e) => match e {
                IssuanceError::NotVerified { .. } => "not_verified",
                IssuanceError::ChallengeMismatch { .. } => "challenge_mismatch",
                IssuanceError::RemoteValidationFailed { .. } => "remote_validation_failed",
                IssuanceError::RateLimited { .. } => "rate_limited",
                IssuanceError::ClientFailed { .. } => "client_failed",
                IssuanceError::ArtifactsMissing { .. } => "artifacts_missing",
                IssuanceError::Cancelled => "cancelled",
                IssuanceError::TimedOut(_) => "timed_out",
                IssuanceError::Client(_) => "client_error",
            },
            EngineError::Install(e) => match e {
                InstallError::CoverageMismatch { .. } => "coverage_mismatch",
                InstallError::KeyMismatch { .. } => "key_mismatch",
                InstallError::Expired { .. } => "expired",
                InstallError::InvalidCertificate(_) => "invalid_certificate",
                InstallError::InvalidKey(_) => "invalid_key",
                InstallError::Storage(_) => "storage_error",
            },
            EngineError::Sync(_) => "sync_failed",
            EngineError::NotInstalled { .. } => "not_installed",
            EngineError::Store(_) => "storage_error",
        }
    }

    /// Whether retrying the same step later can succeed
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            EngineError::VerificationIncomplete { .. }
                | EngineError::Session(SessionError::Busy { .. })
                | EngineError::Issuance(
                    IssuanceError::RemoteValidationFailed { .. }
                        | IssuanceError::Cancelled
                        | IssuanceError::TimedOut(_)
                )
        )
    }

    /// Operator guidance for the failure
    pub fn hint(&self) -> Option<String> {
        match self {
            EngineError::Extraction(ExtractionError::ClientNotInstalled { binary }) => Some(format!(
                "install the ACME client or point acme-client.binary at it (looked for {:?})",
                binary
            )),
            EngineError::Extraction(ExtractionError::NoRecordsParsed { .. }) => Some(
                "the ACME client output format may have changed; run it manually to inspect"
                    .to_string(),
            ),
            EngineError::VerificationIncomplete { .. } => Some(
                "publish the missing TXT records exactly as shown and retry after the TTL passes"
                    .to_string(),
            ),
            EngineError::Issuance(IssuanceError::ChallengeMismatch { .. }) => {
                Some("the ACME client issued new tokens; run extraction again".to_string())
            }
            EngineError::Issuance(IssuanceError::RemoteValidationFailed { .. }) => Some(
                "DNS has probably not propagated to the CA yet; wait a few minutes and retry"
                    .to_string(),
            ),
            EngineError::Issuance(IssuanceError::RateLimited { .. }) => Some(
                "CA rate limit reached; retry later or use staging mode while testing".to_string(),
            ),
            EngineError::Session(SessionError::Busy { .. }) => {
                Some("wait for the running operation to finish".to_string())
            }
            EngineError::Session(
                SessionError::NotFound { .. }
                | SessionError::Expired { .. }
                | SessionError::Stale { .. }
                | SessionError::Failed { .. },
            ) => Some("run extraction again".to_string()),
            _ => None,
        }
    }

    /// Caller-facing failure shape
    pub fn to_failure_report(&self, phase: Option<Phase>) -> FailureReport {
        let verification = match self {
            EngineError::VerificationIncomplete { report } => Some(report.records.clone()),
            _ => None,
        };

        FailureReport {
            code: self.code().to_string(),
            message: self.to_string(),
            retryable: self.retryable(),
            hint: self.hint(),
            phase,
            verification,
        }
    }
}
