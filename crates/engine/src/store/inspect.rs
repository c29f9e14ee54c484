//! Certificate and private key inspection for install-time checks

use std::io::BufReader;

use chrono::{DateTime, Utc};
use rustls::crypto::aws_lc_rs::sign::any_supported_type;
use rustls::sign::SigningKey;
use x509_parser::der_parser::asn1_rs::FromDer;
use x509_parser::extensions::GeneralName;
use x509_parser::x509::SubjectPublicKeyInfo;

use wildcert_common::{canonical_name, CertificateSummary};

use crate::error::InstallError;

/// Facts about the leaf certificate of a chain
#[derive(Debug, Clone)]
pub struct CertificateInfo {
    /// DNS names from the SAN extension, or the subject CN if there is none
    pub names: Vec<String>,
    pub not_after: DateTime<Utc>,
    pub issuer: Option<String>,
    /// Contents of the subjectPublicKey bit string
    pub public_key: Vec<u8>,
}

impl CertificateInfo {
    pub fn summary(&self) -> CertificateSummary {
        CertificateSummary {
            names: self.names.clone(),
            not_after: self.not_after,
            issuer: self.issuer.clone(),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.not_after <= now
    }

    /// Fail unless every name in `required` is covered exactly
    pub fn check_coverage(&self, required: &[String]) -> Result<(), InstallError> {
        let missing = required
            .iter()
            .any(|name| !self.names.iter().any(|n| *n == canonical_name(name)));

        if missing {
            return Err(InstallError::CoverageMismatch {
                required: required.to_vec(),
                found: self.names.clone(),
            });
        }
        Ok(())
    }
}

/// Parse the first certificate of a PEM chain
pub fn inspect_certificate(pem: &[u8]) -> Result<CertificateInfo, InstallError> {
    let mut reader = BufReader::new(pem);
    let leaf = rustls_pemfile::certs(&mut reader)
        .next()
        .ok_or_else(|| InstallError::InvalidCertificate("no certificate in PEM data".to_string()))?
        .map_err(|e| InstallError::InvalidCertificate(e.to_string()))?;

    let (_, cert) = x509_parser::parse_x509_certificate(leaf.as_ref())
        .map_err(|e| InstallError::InvalidCertificate(e.to_string()))?;

    let mut names: Vec<String> = Vec::new();
    if let Ok(Some(san)) = cert.subject_alternative_name() {
        for name in &san.value.general_names {
            if let GeneralName::DNSName(dns) = name {
                let dns = canonical_name(dns);
                if !names.contains(&dns) {
                    names.push(dns);
                }
            }
        }
    }
    if names.is_empty() {
        if let Some(cn) = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
        {
            names.push(canonical_name(cn));
        }
    }

    let not_after = DateTime::from_timestamp(cert.validity().not_after.timestamp(), 0)
        .ok_or_else(|| InstallError::InvalidCertificate("invalid expiry timestamp".to_string()))?;

    let issuer = cert
        .issuer()
        .iter_organization()
        .chain(cert.issuer().iter_common_name())
        .find_map(|attr| attr.as_str().ok().map(str::to_string));

    let public_key = cert.public_key().subject_public_key.data.to_vec();

    Ok(CertificateInfo {
        names,
        not_after,
        issuer,
        public_key,
    })
}

/// Subject public key of the first private key in `pem`
///
/// Accepts PKCS#8, SEC1 (`EC PRIVATE KEY`) and PKCS#1 (`RSA PRIVATE KEY`).
pub fn private_key_public_bits(pem: &[u8]) -> Result<Vec<u8>, InstallError> {
    let mut reader = BufReader::new(pem);
    let key = rustls_pemfile::private_key(&mut reader)
        .map_err(|e| InstallError::InvalidKey(e.to_string()))?
        .ok_or_else(|| InstallError::InvalidKey("no private key in PEM data".to_string()))?;

    let signing_key =
        any_supported_type(&key).map_err(|e| InstallError::InvalidKey(e.to_string()))?;
    let spki = signing_key.public_key().ok_or_else(|| {
        InstallError::InvalidKey(format!(
            "cannot derive a public key from {:?} key",
            signing_key.algorithm()
        ))
    })?;

    let (_, parsed) = SubjectPublicKeyInfo::from_der(spki.as_ref())
        .map_err(|e| InstallError::InvalidKey(e.to_string()))?;
    Ok(parsed.subject_public_key.data.to_vec())
}

/// Whether `key_pem` holds the private key of `cert`
pub fn key_matches(cert: &CertificateInfo, key_pem: &[u8]) -> Result<bool, InstallError> {
    Ok(private_key_public_bits(key_pem)? == cert.public_key)
}
