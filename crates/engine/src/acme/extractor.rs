//! Challenge extraction (declare mode)

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use wildcert_common::ChallengeRecord;

use super::client::{AcmeClient, ClientMode, ClientRequest};
use super::parser::parse_challenges;
use crate::error::ExtractionError;

/// Runs the client without committing and parses the challenges it declares
#[derive(Clone)]
pub struct ChallengeExtractor {
    client: Arc<dyn AcmeClient>,
}

impl ChallengeExtractor {
    pub fn new(client: Arc<dyn AcmeClient>) -> Self {
        Self { client }
    }

    /// Declare the order and return its challenge records in emission order.
    ///
    /// The client's exit code is not meaningful here: declining the prompt
    /// usually ends in a non-zero exit. Only the parsed output counts.
    pub async fn extract(
        &self,
        request: &ClientRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<ChallengeRecord>, ExtractionError> {
        let output = self.client.run(request, ClientMode::Declare, cancel).await?;
        let records = parse_challenges(&output.combined());

        if records.is_empty() {
            warn!(
                domain = %request.domain,
                exit_code = ?output.exit_code,
                "ACME client output contained no challenge records"
            );
            return Err(ExtractionError::NoRecordsParsed {
                exit_code: output.exit_code,
                excerpt: output.excerpt(),
            });
        }

        let expected = request.scope.expected_challenges();
        if records.len() != expected {
            warn!(
                domain = %request.domain,
                parsed = records.len(),
                expected,
                "Unexpected number of challenge records"
            );
        }

        info!(
            domain = %request.domain,
            records = records.len(),
            "Extracted DNS challenge records"
        );

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acme::client::ClientOutput;
    use crate::error::ClientError;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use wildcert_common::CertificateScope;

    struct CannedClient(Result<ClientOutput, fn() -> ClientError>);

    #[async_trait]
    impl AcmeClient for CannedClient {
        async fn run(
            &self,
            _request: &ClientRequest,
            mode: ClientMode,
            _cancel: &CancellationToken,
        ) -> Result<ClientOutput, ClientError> {
            assert_eq!(mode, ClientMode::Declare);
            match &self.0 {
                Ok(output) => Ok(output.clone()),
                Err(make) => Err(make()),
            }
        }

        fn artifact_dirs(&self, _domain: &str) -> Vec<PathBuf> {
            Vec::new()
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

    fn extractor(result: Result<ClientOutput, fn() -> ClientError>) -> ChallengeExtractor {
        ChallengeExtractor::new(Arc::new(CannedClient(result)))
    }

    #[tokio::test]
    async fn test_extracts_from_stderr_too() {
        let output = ClientOutput {
            exit_code: Some(1),
            stdout: "Domain: '_acme-challenge.p2s.tech'\nTXT value: 'A'\n".to_string(),
            stderr: "Domain: '_acme-challenge.p2s.tech'\nTXT value: 'B'\n".to_string(),
        };
        let records = extractor(Ok(output))
            .extract(&request(), &CancellationToken::new())
            .await
            .unwrap();
        let values: Vec<&str> = records.iter().map(|r| r.value.as_str()).collect();
        assert_eq!(values, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_no_records_parsed() {
        let output = ClientOutput {
            exit_code: Some(1),
            stdout: "Error: unexpected response from CA".to_string(),
            stderr: String::new(),
        };
        let err = extractor(Ok(output))
            .extract(&request(), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            ExtractionError::NoRecordsParsed { exit_code, excerpt } => {
                assert_eq!(exit_code, Some(1));
                assert!(excerpt.contains("unexpected response"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_client_not_installed() {
        let err = extractor(Err(|| ClientError::NotInstalled {
            binary: "/missing/acme.sh".into(),
        }))
        .extract(&request(), &CancellationToken::new())
        .await
        .unwrap_err();
        assert!(matches!(err, ExtractionError::ClientNotInstalled { .. }));
    }
}
