//! Canonical certificate store
//!
//! # Directory Structure
//!
//! ```text
//! store/
//! ├── .staging-p2s.tech-<uuid>/   # in-progress install, never read
//! └── p2s.tech/
//!     ├── cert.pem      # Full chain (leaf first)
//!     ├── key.pem       # Private key (0600)
//!     ├── chain.pem     # Issuer chain
//!     └── meta.json     # Expiry, issue time, covered names
//! ```
//!
//! A domain directory is only ever replaced whole, by renaming a checked
//! staging directory over it.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use wildcert_common::InstalledPaths;

use crate::error::StorageError;

pub const CERT_FILE: &str = "cert.pem";
pub const KEY_FILE: &str = "key.pem";
pub const CHAIN_FILE: &str = "chain.pem";
pub const META_FILE: &str = "meta.json";

const STAGING_PREFIX: &str = ".staging-";
const BACKUP_PREFIX: &str = ".backup-";

/// Certificate metadata stored alongside the certificate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateMeta {
    /// When the certificate expires
    pub expires: DateTime<Utc>,
    /// When the certificate was installed
    pub issued: DateTime<Utc>,
    /// Names covered by this certificate
    pub domains: Vec<String>,
    #[serde(default)]
    pub issuer: Option<String>,
    /// Whether it came from a staging CA
    #[serde(default)]
    pub staging: bool,
}

/// Filesystem certificate store with restrictive permissions
#[derive(Debug)]
pub struct CertificateStorage {
    base_path: PathBuf,
}

impl CertificateStorage {
    /// Open the store at `base_path`, creating it (0700 on Unix) if needed
    pub fn new(base_path: &Path) -> Result<Self, StorageError> {
        fs::create_dir_all(base_path)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(base_path, fs::Permissions::from_mode(0o700))?;
        }

        info!(
            storage_path = %base_path.display(),
            "Initialized certificate store"
        );

        Ok(Self {
            base_path: base_path.to_path_buf(),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn domain_path(&self, domain: &str) -> PathBuf {
        self.base_path.join(domain)
    }

    /// Where `domain`'s files live once installed
    pub fn paths(&self, domain: &str) -> InstalledPaths {
        let directory = self.domain_path(domain);
        InstalledPaths {
            certificate: directory.join(CERT_FILE),
            private_key: directory.join(KEY_FILE),
            chain: directory.join(CHAIN_FILE),
            directory,
        }
    }

    /// Installed paths, if `domain` has a complete installation
    pub fn certificate_paths(&self, domain: &str) -> Option<InstalledPaths> {
        let paths = self.paths(domain);
        if paths.certificate.exists() && paths.private_key.exists() {
            Some(paths)
        } else {
            None
        }
    }

    /// Load stored metadata for a domain
    pub fn load_meta(&self, domain: &str) -> Result<Option<CertificateMeta>, StorageError> {
        let meta_path = self.domain_path(domain).join(META_FILE);

        if !meta_path.exists() {
            trace!(domain = %domain, "No stored certificate metadata");
            return Ok(None);
        }

        let content = fs::read_to_string(&meta_path)?;
        let meta: CertificateMeta = serde_json::from_str(&content)?;

        debug!(
            domain = %domain,
            expires = %meta.expires,
            "Loaded certificate metadata"
        );
        Ok(Some(meta))
    }

    /// List all installed domains
    pub fn list_domains(&self) -> Result<Vec<String>, StorageError> {
        if !self.base_path.exists() {
            return Ok(Vec::new());
        }

        let mut domains = Vec::new();
        for entry in fs::read_dir(&self.base_path)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') {
                    domains.push(name.to_string());
                }
            }
        }

        domains.sort();
        Ok(domains)
    }

    /// Delete the installed certificate for a domain
    pub fn remove(&self, domain: &str) -> Result<bool, StorageError> {
        let domain_path = self.domain_path(domain);

        if domain_path.exists() {
            fs::remove_dir_all(&domain_path)?;
            info!(domain = %domain, "Removed stored certificate");
            Ok(true)
        } else {
            warn!(domain = %domain, "Certificate to remove not found");
            Ok(false)
        }
    }

    // =========================================================================
    // Staged installs
    // =========================================================================

    /// Create an empty private staging directory for `domain`
    pub fn create_staging(&self, domain: &str) -> Result<PathBuf, StorageError> {
        let staging = self
            .base_path
            .join(format!("{}{}-{}", STAGING_PREFIX, domain, Uuid::new_v4()));
        fs::create_dir_all(&staging)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&staging, fs::Permissions::from_mode(0o700))?;
        }

        trace!(domain = %domain, staging = %staging.display(), "Created staging directory");
        Ok(staging)
    }

    /// Write `meta.json` into a staging directory
    pub fn write_meta(&self, staging: &Path, meta: &CertificateMeta) -> Result<(), StorageError> {
        let content = serde_json::to_string_pretty(meta)?;
        fs::write(staging.join(META_FILE), content)?;
        Ok(())
    }

    /// Replace `domain`'s directory with `staging`.
    ///
    /// The previous installation is moved aside first and restored if the
    /// final rename fails, so the domain directory is always either the old
    /// set or the new one.
    pub fn commit(&self, domain: &str, staging: &Path) -> Result<InstalledPaths, StorageError> {
        if !staging.starts_with(&self.base_path) {
            return Err(StorageError::InvalidStructure(format!(
                "staging directory {} is outside the store",
                staging.display()
            )));
        }

        let target = self.domain_path(domain);
        let backup = if target.exists() {
            let backup = self
                .base_path
                .join(format!("{}{}-{}", BACKUP_PREFIX, domain, Uuid::new_v4()));
            fs::rename(&target, &backup)?;
            Some(backup)
        } else {
            None
        };

        if let Err(e) = fs::rename(staging, &target) {
            if let Some(ref backup) = backup {
                if let Err(restore) = fs::rename(backup, &target) {
                    warn!(
                        domain = %domain,
                        backup = %backup.display(),
                        error = %restore,
                        "Failed to restore previous certificate"
                    );
                }
            }
            return Err(e.into());
        }

        if let Some(backup) = backup {
            if let Err(e) = fs::remove_dir_all(&backup) {
                warn!(domain = %domain, error = %e, "Failed to remove replaced certificate");
            }
        }

        info!(domain = %domain, path = %target.display(), "Committed certificate to store");
        Ok(self.paths(domain))
    }

    /// Throw away a staging directory
    pub fn discard(&self, staging: &Path) {
        if let Err(e) = fs::remove_dir_all(staging) {
            warn!(staging = %staging.display(), error = %e, "Failed to remove staging directory");
        } else {
            trace!(staging = %staging.display(), "Discarded staging directory");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_storage() -> (TempDir, CertificateStorage) {
        let temp_dir = TempDir::new().unwrap();
        let storage = CertificateStorage::new(&temp_dir.path().join("certs")).unwrap();
        (temp_dir, storage)
    }

    fn meta(domain: &str) -> CertificateMeta {
        CertificateMeta {
            expires: Utc::now() + chrono::Duration::days(90),
            issued: Utc::now(),
            domains: vec![domain.to_string(), format!("*.{}", domain)],
            issuer: Some("Test CA".to_string()),
            staging: false,
        }
    }

    fn stage(storage: &CertificateStorage, domain: &str, cert: &str) -> PathBuf {
        let staging = storage.create_staging(domain).unwrap();
        fs::write(staging.join(CERT_FILE), cert).unwrap();
        fs::write(staging.join(KEY_FILE), "key").unwrap();
        fs::write(staging.join(CHAIN_FILE), "chain").unwrap();
        storage.write_meta(&staging, &meta(domain)).unwrap();
        staging
    }

    #[test]
    fn test_storage_creation() {
        let (_temp_dir, storage) = setup_storage();
        assert!(storage.base_path().exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(storage.base_path()).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o700);
        }
    }

    #[test]
    fn test_commit_and_load_meta() {
        let (_temp_dir, storage) = setup_storage();
        let staging = stage(&storage, "p2s.tech", "cert-v1");

        let paths = storage.commit("p2s.tech", &staging).unwrap();
        assert!(!staging.exists());
        assert_eq!(fs::read_to_string(&paths.certificate).unwrap(), "cert-v1");
        assert_eq!(storage.certificate_paths("p2s.tech"), Some(paths));

        let loaded = storage.load_meta("p2s.tech").unwrap().unwrap();
        assert_eq!(loaded.domains, vec!["p2s.tech", "*.p2s.tech"]);
    }

    #[test]
    fn test_commit_replaces_previous_installation() {
        let (_temp_dir, storage) = setup_storage();
        storage
            .commit("p2s.tech", &stage(&storage, "p2s.tech", "cert-v1"))
            .unwrap();
        let paths = storage
            .commit("p2s.tech", &stage(&storage, "p2s.tech", "cert-v2"))
            .unwrap();

        assert_eq!(fs::read_to_string(&paths.certificate).unwrap(), "cert-v2");
        // No backup or staging leftovers
        assert_eq!(fs::read_dir(storage.base_path()).unwrap().count(), 1);
    }

    #[test]
    fn test_commit_rejects_foreign_staging_dir() {
        let (temp_dir, storage) = setup_storage();
        let foreign = temp_dir.path().join("elsewhere");
        fs::create_dir_all(&foreign).unwrap();

        let err = storage.commit("p2s.tech", &foreign).unwrap_err();
        assert!(matches!(err, StorageError::InvalidStructure(_)));
    }

    #[test]
    fn test_list_domains_skips_staging() {
        let (_temp_dir, storage) = setup_storage();
        storage.commit("b.com", &stage(&storage, "b.com", "c")).unwrap();
        storage.commit("a.com", &stage(&storage, "a.com", "c")).unwrap();
        let _pending = storage.create_staging("c.com").unwrap();

        assert_eq!(storage.list_domains().unwrap(), vec!["a.com", "b.com"]);
    }

    #[test]
    fn test_discard_and_remove() {
        let (_temp_dir, storage) = setup_storage();
        let staging = stage(&storage, "p2s.tech", "c");
        storage.discard(&staging);
        assert!(!staging.exists());
        assert!(storage.certificate_paths("p2s.tech").is_none());

        storage.commit("p2s.tech", &stage(&storage, "p2s.tech", "c")).unwrap();
        assert!(storage.remove("p2s.tech").unwrap());
        assert!(!storage.remove("p2s.tech").unwrap());
        assert!(storage.load_meta("p2s.tech").unwrap().is_none());
    }
}
