//! Certificate issuance (proceed mode)

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use wildcert_common::ChallengeRecord;

use super::client::{AcmeClient, ClientMode, ClientOutput, ClientRequest};
use super::parser::parse_challenges;
use crate::error::IssuanceError;

/// Full chain written by the client
const FULLCHAIN_FILE: &str = "fullchain.cer";
/// Issuer chain written by the client
const CHAIN_FILE: &str = "ca.cer";

/// Markers of a CA rate-limit rejection
const RATE_LIMIT_MARKERS: &[&str] = &[
    "ratelimited",
    "rate limit",
    "too many certificates",
    "too many failed authorizations",
];

/// Markers of a CA-side validation failure
const VALIDATION_MARKERS: &[&str] = &[
    "verify error",
    "invalid status",
    "incorrect txt record",
    "no txt record found",
    "error:unauthorized",
    "dns problem",
];

/// Issued files as the client left them, before installation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedArtifactSet {
    pub domain: String,
    pub certificate: PathBuf,
    pub private_key: PathBuf,
    pub chain: PathBuf,
}

/// Confirms the order and collects the issued artifacts
#[derive(Clone)]
pub struct CertificateIssuer {
    client: Arc<dyn AcmeClient>,
}

impl CertificateIssuer {
    pub fn new(client: Arc<dyn AcmeClient>) -> Self {
        Self { client }
    }

    /// Proceed with an order whose challenges were verified as `verified`.
    ///
    /// Refuses with `ChallengeMismatch` when the client reports tokens other
    /// than the verified ones; those tokens were never published.
    pub async fn issue(
        &self,
        request: &ClientRequest,
        verified: &[ChallengeRecord],
        cancel: &CancellationToken,
    ) -> Result<IssuedArtifactSet, IssuanceError> {
        info!(domain = %request.domain, staging = request.staging, "Requesting certificate issuance");

        let output = self.client.run(request, ClientMode::Proceed, cancel).await?;

        check_reported_challenges(&output, verified)?;

        if !output.success() {
            let err = classify_failure(&output);
            error!(
                domain = %request.domain,
                exit_code = ?output.exit_code,
                error = %err,
                "ACME client failed to issue certificate"
            );
            return Err(err);
        }

        let artifacts = locate_artifacts(&request.domain, &self.client.artifact_dirs(&request.domain))?;
        info!(
            domain = %request.domain,
            certificate = %artifacts.certificate.display(),
            "Certificate issued"
        );
        Ok(artifacts)
    }
}

/// Compare the challenges the client printed while proceeding with the
/// session's, name and value, in the order they were printed
fn check_reported_challenges(
    output: &ClientOutput,
    verified: &[ChallengeRecord],
) -> Result<(), IssuanceError> {
    let reported = parse_challenges(&output.combined());
    if reported.is_empty() {
        return Ok(());
    }

    let reported: Vec<String> = reported.iter().map(describe).collect();
    let expected: Vec<String> = verified.iter().map(describe).collect();

    if reported != expected {
        warn!(
            reported = ?reported,
            expected = ?expected,
            "ACME client reported different challenges"
        );
        return Err(IssuanceError::ChallengeMismatch { expected, reported });
    }

    debug!("ACME client reported the verified challenges");
    Ok(())
}

fn describe(record: &ChallengeRecord) -> String {
    format!("{} {}", record.name, record.value)
}

fn classify_failure(output: &ClientOutput) -> IssuanceError {
    let text = output.combined().to_ascii_lowercase();
    let detail = output.excerpt();

    if RATE_LIMIT_MARKERS.iter().any(|m| text.contains(m)) {
        IssuanceError::RateLimited { detail }
    } else if VALIDATION_MARKERS.iter().any(|m| text.contains(m)) {
        IssuanceError::RemoteValidationFailed {
            exit_code: output.exit_code,
            detail,
        }
    } else {
        IssuanceError::ClientFailed {
            exit_code: output.exit_code,
            detail,
        }
    }
}

/// Find the first candidate directory holding a complete artifact set
fn locate_artifacts(domain: &str, dirs: &[PathBuf]) -> Result<IssuedArtifactSet, IssuanceError> {
    let key_file = format!("{}.key", domain);
    let mut missing = Vec::new();

    for dir in dirs {
        let certificate = dir.join(FULLCHAIN_FILE);
        let private_key = dir.join(&key_file);
        let chain = dir.join(CHAIN_FILE);

        let absent: Vec<PathBuf> = [&certificate, &private_key, &chain]
            .into_iter()
            .filter(|p| !p.is_file())
            .cloned()
            .collect();

        if absent.is_empty() {
            debug!(domain = %domain, directory = %dir.display(), "Located issued artifacts");
            return Ok(IssuedArtifactSet {
                domain: domain.to_string(),
                certificate,
                private_key,
                chain,
            });
        }

        if dir.is_dir() {
            missing = absent;
        }
    }

    let directory = dirs.first().cloned().unwrap_or_default();
    if missing.is_empty() {
        missing.push(directory.clone());
    }
    Err(IssuanceError::ArtifactsMissing { directory, missing })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::path::Path;
    use tempfile::TempDir;
    use wildcert_common::CertificateScope;

    struct ScriptedClient {
        output: ClientOutput,
        dirs: Vec<PathBuf>,
        modes: Mutex<Vec<ClientMode>>,
    }

    #[async_trait]
    impl AcmeClient for ScriptedClient {
        async fn run(
            &self,
            _request: &ClientRequest,
            mode: ClientMode,
            cancel: &CancellationToken,
        ) -> Result<ClientOutput, ClientError> {
            self.modes.lock().push(mode);
            if cancel.is_cancelled() {
                return Err(ClientError::Cancelled);
            }
            Ok(self.output.clone())
        }

        fn artifact_dirs(&self, _domain: &str) -> Vec<PathBuf> {
            self.dirs.clone()
        }
    }

    fn request() -> ClientRequest {
        ClientRequest {
            domain: "p2s.tech".to_string(),
            email: "admin@p2s.tech".to_string(),
            staging: false,
            scope: CertificateScope::Wildcard,
        }
    }

    fn verified() -> Vec<ChallengeRecord> {
        vec![
            ChallengeRecord::new("_acme-challenge.p2s.tech", "A", 1),
            ChallengeRecord::new("_acme-challenge.p2s.tech", "B", 2),
        ]
    }

    fn write_artifacts(dir: &Path) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join(FULLCHAIN_FILE), "cert").unwrap();
        std::fs::write(dir.join("p2s.tech.key"), "key").unwrap();
        std::fs::write(dir.join(CHAIN_FILE), "chain").unwrap();
    }

    fn issuer(exit_code: i32, stdout: &str, dirs: Vec<PathBuf>) -> CertificateIssuer {
        CertificateIssuer::new(Arc::new(ScriptedClient {
            output: ClientOutput {
                exit_code: Some(exit_code),
                stdout: stdout.to_string(),
                stderr: String::new(),
            },
            dirs,
            modes: Mutex::new(Vec::new()),
        }))
    }

    #[tokio::test]
    async fn test_successful_issuance_prefers_first_complete_dir() {
        let temp = TempDir::new().unwrap();
        let ecc = temp.path().join("p2s.tech_ecc");
        let rsa = temp.path().join("p2s.tech");
        write_artifacts(&rsa);
        write_artifacts(&ecc);

        let artifacts = issuer(0, "Cert success.", vec![ecc.clone(), rsa])
            .issue(&request(), &verified(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(artifacts.certificate, ecc.join(FULLCHAIN_FILE));
        assert_eq!(artifacts.private_key, ecc.join("p2s.tech.key"));
        assert_eq!(artifacts.chain, ecc.join(CHAIN_FILE));
    }

    #[tokio::test]
    async fn test_matching_reported_challenges_accepted() {
        let temp = TempDir::new().unwrap();
        write_artifacts(temp.path());
        let stdout = "Domain: '_acme-challenge.p2s.tech'\nTXT value: 'A'\nDomain: '_acme-challenge.p2s.tech'\nTXT value: 'B'\nCert success.";

        let result = issuer(0, stdout, vec![temp.path().to_path_buf()])
            .issue(&request(), &verified(), &CancellationToken::new())
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_challenge_mismatch_refused() {
        let temp = TempDir::new().unwrap();
        write_artifacts(temp.path());
        let stdout = "Domain: '_acme-challenge.p2s.tech'\nTXT value: 'A'\nDomain: '_acme-challenge.p2s.tech'\nTXT value: 'C'\n";

        let err = issuer(0, stdout, vec![temp.path().to_path_buf()])
            .issue(&request(), &verified(), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            IssuanceError::ChallengeMismatch { expected, reported } => {
                assert_eq!(
                    expected,
                    vec!["_acme-challenge.p2s.tech A", "_acme-challenge.p2s.tech B"]
                );
                assert_eq!(
                    reported,
                    vec!["_acme-challenge.p2s.tech A", "_acme-challenge.p2s.tech C"]
                );
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_reordered_or_renamed_challenges_refused() {
        let temp = TempDir::new().unwrap();
        write_artifacts(temp.path());
        let swapped = "Domain: '_acme-challenge.p2s.tech'\nTXT value: 'B'\nDomain: '_acme-challenge.p2s.tech'\nTXT value: 'A'\n";
        let renamed = "Domain: '_acme-challenge.p2s.tech'\nTXT value: 'A'\nDomain: '_acme-challenge.other.p2s.tech'\nTXT value: 'B'\n";

        for stdout in [swapped, renamed] {
            let err = issuer(0, stdout, vec![temp.path().to_path_buf()])
                .issue(&request(), &verified(), &CancellationToken::new())
                .await
                .unwrap_err();
            assert!(
                matches!(err, IssuanceError::ChallengeMismatch { .. }),
                "{stdout} gave {err:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_failure_classification() {
        let cases = [
            ("Error creating new order :: too many certificates already issued", "rate"),
            ("urn:ietf:params:acme:error:rateLimited", "rate"),
            ("p2s.tech:Verify error:DNS problem: NXDOMAIN looking up TXT", "validation"),
            ("curl: (6) Could not resolve host", "client"),
        ];

        for (stdout, kind) in cases {
            let err = issuer(1, stdout, Vec::new())
                .issue(&request(), &verified(), &CancellationToken::new())
                .await
                .unwrap_err();
            let ok = match kind {
                "rate" => matches!(err, IssuanceError::RateLimited { .. }),
                "validation" => matches!(err, IssuanceError::RemoteValidationFailed { exit_code: Some(1), .. }),
                _ => matches!(err, IssuanceError::ClientFailed { exit_code: Some(1), .. }),
            };
            assert!(ok, "{stdout} classified as {err:?}");
        }
    }

    #[tokio::test]
    async fn test_missing_artifacts() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("p2s.tech_ecc");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(FULLCHAIN_FILE), "cert").unwrap();

        let err = issuer(0, "Cert success.", vec![dir.clone()])
            .issue(&request(), &verified(), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            IssuanceError::ArtifactsMissing { directory, missing } => {
                assert_eq!(directory, dir);
                assert_eq!(missing.len(), 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_cancelled_before_run() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = issuer(0, "", Vec::new())
            .issue(&request(), &verified(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, IssuanceError::Cancelled));
    }
}
