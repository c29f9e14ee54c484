//! External ACME client invocation
//!
//! The client is driven in two modes that differ only in the answer written
//! to its confirmation prompt:
//!
//! - [`ClientMode::Declare`] declines, so the client prints the DNS challenges
//!   it would validate and stops
//! - [`ClientMode::Proceed`] confirms, so the client asks the CA to validate
//!   and writes the issued files to its per-domain output directory

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use wildcert_common::{wildcard_of, CertificateScope};
use wildcert_config::AcmeClientConfig;

use crate::error::ClientError;

/// How much trailing output is kept in error messages
const EXCERPT_CHARS: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientMode {
    Declare,
    Proceed,
}

/// One certificate request as the client sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRequest {
    pub domain: String,
    pub email: String,
    pub staging: bool,
    pub scope: CertificateScope,
}

impl ClientRequest {
    /// Names passed to the client with `-d`
    pub fn names(&self) -> Vec<String> {
        match self.scope {
            CertificateScope::Wildcard => vec![self.domain.clone(), wildcard_of(&self.domain)],
            CertificateScope::Apex => vec![self.domain.clone()],
        }
    }
}

/// Captured result of one client run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientOutput {
    /// `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ClientOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// stdout followed by stderr
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }

    /// Tail of the combined output, for error messages
    pub fn excerpt(&self) -> String {
        tail(&self.combined(), EXCERPT_CHARS)
    }
}

fn tail(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    let skip = count - max_chars;
    format!("...{}", text.chars().skip(skip).collect::<String>())
}

/// Seam over the external ACME client.
///
/// [`ProcessAcmeClient`] is the production implementation; tests script
/// their own.
#[async_trait]
pub trait AcmeClient: Send + Sync {
    /// Run the client once in `mode` and capture everything it printed
    async fn run(
        &self,
        request: &ClientRequest,
        mode: ClientMode,
        cancel: &CancellationToken,
    ) -> Result<ClientOutput, ClientError>;

    /// Directories the client may have written `domain`'s files to, most
    /// likely first
    fn artifact_dirs(&self, domain: &str) -> Vec<PathBuf>;
}

/// Runs the configured client binary as a subprocess
#[derive(Debug, Clone)]
pub struct ProcessAcmeClient {
    config: AcmeClientConfig,
}

impl ProcessAcmeClient {
    pub fn new(config: AcmeClientConfig) -> Self {
        Self { config }
    }

    fn args(&self, request: &ClientRequest) -> Vec<String> {
        let mut args = vec!["--issue".to_string(), "--dns".to_string()];
        for name in request.names() {
            args.push("-d".to_string());
            args.push(name);
        }
        args.push("--yes-I-know-dns-manual-mode-enough-go-ahead-please".to_string());
        args.push("--accountemail".to_string());
        args.push(request.email.clone());
        args.push("--home".to_string());
        args.push(self.config.home.display().to_string());
        args.push("--keylength".to_string());
        args.push(self.config.key_type.clone());

        if request.staging {
            args.push("--staging".to_string());
        } else if let Some(ref server) = self.config.server {
            args.push("--server".to_string());
            args.push(server.clone());
        }

        args.extend(self.config.extra_args.iter().cloned());
        args
    }

    fn answer(&self, mode: ClientMode) -> &str {
        match mode {
            ClientMode::Declare => &self.config.decline_answer,
            ClientMode::Proceed => &self.config.proceed_answer,
        }
    }
}

#[async_trait]
impl AcmeClient for ProcessAcmeClient {
    async fn run(
        &self,
        request: &ClientRequest,
        mode: ClientMode,
        cancel: &CancellationToken,
    ) -> Result<ClientOutput, ClientError> {
        let args = self.args(request);
        let timeout = self.config.timeout();

        debug!(
            binary = %self.config.binary.display(),
            domain = %request.domain,
            mode = ?mode,
            staging = request.staging,
            "Starting ACME client"
        );
        trace!(args = ?args, "ACME client arguments");

        let mut child = Command::new(&self.config.binary)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                    ClientError::NotInstalled {
                        binary: self.config.binary.clone(),
                    }
                }
                _ => ClientError::Io(e),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            let answer = format!("{}\n", self.answer(mode));
            // The client may exit before reading its prompt
            if let Err(e) = stdin.write_all(answer.as_bytes()).await {
                trace!(error = %e, "ACME client closed stdin early");
            }
        }

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(mut out) = stdout {
                let _ = out.read_to_end(&mut buf).await;
            }
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(mut err) = stderr {
                let _ = err.read_to_end(&mut buf).await;
            }
            buf
        });

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = cancel.cancelled() => {
                warn!(domain = %request.domain, "Cancelling ACME client run");
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Failed to kill ACME client");
                }
                return Err(ClientError::Cancelled);
            }
            _ = tokio::time::sleep(timeout) => {
                warn!(
                    domain = %request.domain,
                    timeout_secs = timeout.as_secs(),
                    "ACME client timed out, killing it"
                );
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Failed to kill ACME client");
                }
                return Err(ClientError::TimedOut(timeout));
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        let output = ClientOutput {
            exit_code: status.code(),
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        };

        info!(
            domain = %request.domain,
            mode = ?mode,
            exit_code = ?output.exit_code,
            stdout_bytes = output.stdout.len(),
            stderr_bytes = output.stderr.len(),
            "ACME client finished"
        );

        Ok(output)
    }

    fn artifact_dirs(&self, domain: &str) -> Vec<PathBuf> {
        vec![
            self.config.home.join(format!("{}_ecc", domain)),
            self.config.home.join(domain),
        ]
    }
}
