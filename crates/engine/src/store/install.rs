//! Artifact installation into the canonical store

use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use wildcert_common::{CertificateScope, CertificateSummary, InstalledPaths};

use super::inspect::{inspect_certificate, key_matches, CertificateInfo};
use super::storage::{CertificateMeta, CertificateStorage, CERT_FILE, CHAIN_FILE, KEY_FILE};
use crate::acme::IssuedArtifactSet;
use crate::error::InstallError;

/// Result of a successful install
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Installation {
    pub paths: InstalledPaths,
    pub certificate: CertificateSummary,
}

/// Copies issued artifacts into the store after checking them.
///
/// Checks run against the copies in a staging directory. The domain's
/// directory is only touched once every check has passed, so a rejected
/// certificate leaves the previous installation in place.
#[derive(Debug, Clone)]
pub struct ArtifactInstaller {
    storage: Arc<CertificateStorage>,
}

impl ArtifactInstaller {
    pub fn new(storage: Arc<CertificateStorage>) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &CertificateStorage {
        &self.storage
    }

    pub fn install(
        &self,
        artifacts: &IssuedArtifactSet,
        scope: CertificateScope,
        staging_ca: bool,
    ) -> Result<Installation, InstallError> {
        let domain = artifacts.domain.as_str();
        let staging = self.storage.create_staging(domain)?;

        let checked = self.stage_and_check(&staging, artifacts, scope, staging_ca);
        let info = match checked {
            Ok(info) => info,
            Err(e) => {
                warn!(domain = %domain, error = %e, "Rejected issued certificate");
                self.storage.discard(&staging);
                return Err(e);
            }
        };

        let paths = match self.storage.commit(domain, &staging) {
            Ok(paths) => paths,
            Err(e) => {
                self.storage.discard(&staging);
                return Err(e.into());
            }
        };

        info!(
            domain = %domain,
            names = ?info.names,
            expires = %info.not_after,
            path = %paths.directory.display(),
            "Installed certificate"
        );

        Ok(Installation {
            paths,
            certificate: info.summary(),
        })
    }

    fn stage_and_check(
        &self,
        staging: &Path,
        artifacts: &IssuedArtifactSet,
        scope: CertificateScope,
        staging_ca: bool,
    ) -> Result<CertificateInfo, InstallError> {
        let cert_path = staging.join(CERT_FILE);
        let key_path = staging.join(KEY_FILE);

        fs::copy(&artifacts.certificate, &cert_path)?;
        fs::copy(&artifacts.private_key, &key_path)?;
        fs::copy(&artifacts.chain, staging.join(CHAIN_FILE))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&key_path, fs::Permissions::from_mode(0o600))?;
        }

        let info = inspect_certificate(&fs::read(&cert_path)?)?;
        debug!(domain = %artifacts.domain, names = ?info.names, "Inspecting issued certificate");

        info.check_coverage(&scope.required_names(&artifacts.domain))?;

        if !key_matches(&info, &fs::read(&key_path)?)? {
            return Err(InstallError::KeyMismatch {
                certificate: artifacts.certificate.clone(),
                key: artifacts.private_key.clone(),
            });
        }

        let now = Utc::now();
        if info.is_expired(now) {
            return Err(InstallError::Expired {
                not_after: info.not_after,
            });
        }

        self.storage.write_meta(
            staging,
            &CertificateMeta {
                expires: info.not_after,
                issued: now,
                domains: info.names.clone(),
                issuer: info.issuer.clone(),
                staging: staging_ca,
            },
        )?;

        Ok(info)
    }
}
