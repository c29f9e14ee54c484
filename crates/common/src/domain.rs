//! Domain name helpers shared by every stage of the pipeline.

use thiserror::Error;

/// Label prefix of every DNS-01 challenge record
pub const ACME_CHALLENGE_RECORD: &str = "_acme-challenge";

/// Errors produced when validating caller-supplied names
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("domain name is empty")]
    Empty,

    #[error("domain '{0}' must be given without the '*.' prefix")]
    WildcardGiven(String),

    #[error("domain '{domain}' has an invalid label '{label}'")]
    InvalidLabel { domain: String, label: String },

    #[error("domain '{0}' must contain at least two labels")]
    NotQualified(String),

    #[error("contact address '{0}' is not an email address")]
    InvalidEmail(String),
}

/// Normalize a caller-supplied base domain.
///
/// Lowercases, strips a single trailing dot and checks every label. The
/// wildcard form is derived by the engine, so a leading `*.` is rejected.
pub fn normalize_domain(input: &str) -> Result<String, DomainError> {
    let trimmed = input.trim().trim_end_matches('.');
    if trimmed.is_empty() {
        return Err(DomainError::Empty);
    }
    if trimmed.starts_with("*.") {
        return Err(DomainError::WildcardGiven(trimmed.to_string()));
    }

    let domain = trimmed.to_ascii_lowercase();
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 {
        return Err(DomainError::NotQualified(domain));
    }

    for label in &labels {
        let valid = !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-');
        if !valid {
            return Err(DomainError::InvalidLabel {
                domain: domain.clone(),
                label: label.to_string(),
            });
        }
    }

    Ok(domain)
}

/// Minimal contact address check; the CA performs the real validation.
pub fn validate_email(email: &str) -> Result<(), DomainError> {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, host)) if !local.is_empty() && host.contains('.') => Ok(()),
        _ => Err(DomainError::InvalidEmail(email.to_string())),
    }
}

/// `*.example.com` for `example.com`
pub fn wildcard_of(domain: &str) -> String {
    format!("*.{}", domain)
}

/// `_acme-challenge.example.com` for `example.com` or `*.example.com`
pub fn challenge_record_name(domain: &str) -> String {
    let base = domain.strip_prefix("*.").unwrap_or(domain);
    format!("{}.{}", ACME_CHALLENGE_RECORD, base)
}

/// Canonical form of a DNS name for comparisons: lowercase, no trailing dot.
///
/// Only names are case-insensitive; challenge values are compared verbatim.
pub fn canonical_name(name: &str) -> String {
    name.trim().trim_end_matches('.').to_ascii_lowercase()
}
