//! Core data model: challenge records, lifecycle phases and sessions.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::domain::wildcard_of;
use crate::ids::{Generation, SessionId};

// ============================================================================
// Challenge Records
// ============================================================================

/// One DNS-01 TXT record the operator must publish.
///
/// `name` and `value` never change after extraction. Only `matched` and
/// `found_value` are written, by the verifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeRecord {
    /// Record name, e.g. `_acme-challenge.example.com`
    pub name: String,
    /// Opaque, case-sensitive token
    pub value: String,
    /// 1-based position in the client's output
    pub ordinal: usize,
    /// Whether the exact value was seen in the last verification pass
    #[serde(default)]
    pub matched: bool,
    /// The value that matched, if any
    #[serde(default)]
    pub found_value: Option<String>,
}

impl ChallengeRecord {
    pub fn new(name: impl Into<String>, value: impl Into<String>, ordinal: usize) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            ordinal,
            matched: false,
            found_value: None,
        }
    }
}

/// Which names the requested certificate must cover
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CertificateScope {
    /// `domain` and `*.domain` (two challenges)
    #[default]
    Wildcard,
    /// `domain` only (one challenge)
    Apex,
}

impl CertificateScope {
    /// Names the certificate must carry for `domain`
    pub fn required_names(self, domain: &str) -> Vec<String> {
        match self {
            CertificateScope::Wildcard => vec![domain.to_string(), wildcard_of(domain)],
            CertificateScope::Apex => vec![domain.to_string()],
        }
    }

    /// Number of DNS challenges the CA issues for this scope
    pub fn expected_challenges(self) -> usize {
        match self {
            CertificateScope::Wildcard => 2,
            CertificateScope::Apex => 1,
        }
    }
}

// ============================================================================
// Lifecycle Phase
// ============================================================================

/// Lifecycle phase of a challenge session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Extracted,
    Verifying,
    Verified,
    Issuing,
    Issued,
    Installed,
    Synced,
    Failed,
}

impl Phase {
    /// Whether the session can no longer move (success or failure)
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Synced | Phase::Failed)
    }

    /// Allowed transitions.
    ///
    /// Forward-only, with two reverts: a failed verification pass returns
    /// to `Extracted`, and a cancelled issuance returns to `Verified`. A
    /// verified session may be verified again. `Failed` is reachable from
    /// every non-terminal phase.
    pub fn can_transition_to(self, next: Phase) -> bool {
        use Phase::*;

        if next == Failed {
            return !self.is_terminal();
        }

        matches!(
            (self, next),
            (Extracted, Verifying)
                | (Verifying, Verified)
                | (Verifying, Extracted)
                | (Verified, Verifying)
                | (Verified, Issuing)
                | (Issuing, Issued)
                | (Issuing, Verified)
                | (Issued, Installed)
                | (Installed, Synced)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Extracted => "EXTRACTED",
            Phase::Verifying => "VERIFYING",
            Phase::Verified => "VERIFIED",
            Phase::Issuing => "ISSUING",
            Phase::Issued => "ISSUED",
            Phase::Installed => "INSTALLED",
            Phase::Synced => "SYNCED",
            Phase::Failed => "FAILED",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected phase change
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid phase transition {from} -> {to}")]
pub struct PhaseError {
    pub from: Phase,
    pub to: Phase,
}

// ============================================================================
// Challenge Session
// ============================================================================

/// In-memory state of one domain's challenge/issuance attempt.
///
/// Sessions are ephemeral: they are replaced by re-extraction and dropped
/// after a successful sync or an explicit cancellation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeSession {
    pub id: SessionId,
    pub generation: Generation,
    pub domain: String,
    pub wildcard_domain: String,
    pub scope: CertificateScope,
    /// Extraction order; never reordered
    pub records: Vec<ChallengeRecord>,
    pub phase: Phase,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub email: String,
    pub staging: bool,
    /// Error that moved the session to `Failed`
    #[serde(default)]
    pub last_error: Option<String>,
}

impl ChallengeSession {
    /// Create a session in `Extracted`
    pub fn new(
        domain: &str,
        email: &str,
        staging: bool,
        scope: CertificateScope,
        records: Vec<ChallengeRecord>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            generation: Generation::next(),
            domain: domain.to_string(),
            wildcard_domain: wildcard_of(domain),
            scope,
            records,
            phase: Phase::Extracted,
            created_at: now,
            updated_at: now,
            email: email.to_string(),
            staging,
            last_error: None,
        }
    }

    /// Move to `next`, enforcing [`Phase::can_transition_to`]
    pub fn transition(&mut self, next: Phase) -> Result<(), PhaseError> {
        if !self.phase.can_transition_to(next) {
            return Err(PhaseError {
                from: self.phase,
                to: next,
            });
        }
        self.phase = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Move to `Failed`, keeping the triggering error
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), PhaseError> {
        self.transition(Phase::Failed)?;
        self.last_error = Some(error.into());
        Ok(())
    }

    /// True when every record matched in the last verification pass
    pub fn all_matched(&self) -> bool {
        !self.records.is_empty() && self.records.iter().all(|r| r.matched)
    }

    /// Challenge values in extraction order
    pub fn values(&self) -> Vec<&str> {
        self.records.iter().map(|r| r.value.as_str()).collect()
    }

    /// Whether the session outlived the interaction window
    pub fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        now - self.created_at > ttl
    }
}
