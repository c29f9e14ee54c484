//! Edge server reload
//!
//! The local reload command is tried first. If it is missing or fails, the
//! master config is pushed to the control-plane endpoint instead. A failed
//! reload never undoes installation or sync: the files on disk are correct
//! and will be picked up by the next successful reload.

use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info, warn};

use wildcert_common::{ReloadAttempt, ReloadMethod, ReloadOutcome, ReloadResult};
use wildcert_config::EdgeConfig;

/// Applies written config to the running edge server
#[derive(Debug, Clone)]
pub struct EdgeReloader {
    config: EdgeConfig,
    http: reqwest::Client,
}

impl EdgeReloader {
    pub fn new(config: EdgeConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Try the reload command, then the control endpoint.
    ///
    /// Every attempt is recorded, including a failed primary that was
    /// rescued by the fallback.
    pub async fn reload(&self) -> ReloadResult {
        let mut attempts = Vec::with_capacity(2);

        if !self.config.reload_command.is_empty() {
            let attempt = self.run_command().await;
            let succeeded = attempt.succeeded;
            attempts.push(attempt);
            if succeeded {
                info!("Edge server reloaded via reload command");
                return ReloadResult {
                    outcome: ReloadOutcome::Primary,
                    attempts,
                };
            }
        }

        if self.config.control_endpoint.is_some() {
            let attempt = self.post_config().await;
            let succeeded = attempt.succeeded;
            attempts.push(attempt);
            if succeeded {
                info!("Edge server reloaded via control endpoint");
                return ReloadResult {
                    outcome: ReloadOutcome::Fallback,
                    attempts,
                };
            }
        }

        warn!(
            attempts = attempts.len(),
            "Edge server reload failed; new config is on disk but not live"
        );
        ReloadResult {
            outcome: ReloadOutcome::Failed,
            attempts,
        }
    }

    async fn run_command(&self) -> ReloadAttempt {
        let (program, args) = match self.config.reload_command.split_first() {
            Some(split) => split,
            None => return failed(ReloadMethod::Command, "no reload command configured"),
        };
        let timeout = self.config.reload_timeout();

        debug!(command = ?self.config.reload_command, "Running edge reload command");

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                warn!(program = %program, error = %e, "Failed to start edge reload command");
                return failed(ReloadMethod::Command, format!("failed to start {}: {}", program, e));
            }
        };

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) if output.status.success() => ReloadAttempt {
                method: ReloadMethod::Command,
                succeeded: true,
                detail: output.status.to_string(),
            },
            Ok(Ok(output)) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                warn!(
                    exit_code = ?output.status.code(),
                    stderr = %stderr.trim(),
                    "Edge reload command failed"
                );
                failed(
                    ReloadMethod::Command,
                    format!("{}: {}", output.status, stderr.trim()),
                )
            }
            Ok(Err(e)) => failed(ReloadMethod::Command, e.to_string()),
            Err(_) => {
                warn!(timeout_secs = timeout.as_secs(), "Edge reload command timed out");
                failed(
                    ReloadMethod::Command,
                    format!("timed out after {}s", timeout.as_secs()),
                )
            }
        }
    }

    async fn post_config(&self) -> ReloadAttempt {
        let Some(ref endpoint) = self.config.control_endpoint else {
            return failed(ReloadMethod::ControlApi, "no control endpoint configured");
        };

        let body = match tokio::fs::read_to_string(&self.config.master_config).await {
            Ok(body) => body,
            Err(e) => {
                return failed(
                    ReloadMethod::ControlApi,
                    format!("failed to read {}: {}", self.config.master_config.display(), e),
                )
            }
        };

        debug!(endpoint = %endpoint, bytes = body.len(), "Posting config to edge control endpoint");

        let response = self
            .http
            .post(endpoint)
            .header(reqwest::header::CONTENT_TYPE, &self.config.control_content_type)
            .timeout(self.config.reload_timeout())
            .body(body)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => ReloadAttempt {
                method: ReloadMethod::ControlApi,
                succeeded: true,
                detail: format!("HTTP {}", resp.status().as_u16()),
            },
            Ok(resp) => {
                let status = resp.status();
                let text = resp.text().await.unwrap_or_default();
                warn!(endpoint = %endpoint, status = %status, "Edge control endpoint rejected config");
                failed(
                    ReloadMethod::ControlApi,
                    format!("HTTP {}: {}", status.as_u16(), text.trim()),
                )
            }
            Err(e) => {
                warn!(endpoint = %endpoint, error = %e, "Edge control endpoint unreachable");
                failed(ReloadMethod::ControlApi, e.to_string())
            }
        }
    }
}

fn failed(method: ReloadMethod, detail: impl Into<String>) -> ReloadAttempt {
    ReloadAttempt {
        method,
        succeeded: false,
        detail: detail.into(),
    }
}
