//! Shared fixtures for the lifecycle integration tests
//!
//! A scripted ACME client stands in for the real binary and an in-memory
//! resolver stands in for public DNS.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rcgen::{CertificateParams, KeyPair};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use wildcert_common::wildcard_of;
use wildcert_config::Config;
use wildcert_engine::acme::{AcmeClient, ClientMode, ClientOutput, ClientRequest};
use wildcert_engine::{CertificateEngine, ClientError, EngineParts, StaticResolver};

pub const DOMAIN: &str = "p2s.tech";
pub const RECORD: &str = "_acme-challenge.p2s.tech";
pub const EMAIL: &str = "admin@p2s.tech";

/// What the scripted client does when asked to proceed
#[derive(Debug, Clone)]
pub enum ProceedScript {
    /// Write a certificate covering the requested names and exit 0
    Issue,
    /// Print these challenge values, then issue
    ReportValues(Vec<String>),
    /// Exit non-zero with this output
    Fail { exit_code: i32, output: String },
}

/// ACME client double that prints challenges like the real client does
pub struct ScriptedAcmeClient {
    home: PathBuf,
    values: Vec<String>,
    proceed: ProceedScript,
    calls: Mutex<Vec<ClientMode>>,
}

impl ScriptedAcmeClient {
    pub fn new(home: &Path, values: &[&str], proceed: ProceedScript) -> Self {
        Self {
            home: home.to_path_buf(),
            values: values.iter().map(|v| v.to_string()).collect(),
            proceed,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<ClientMode> {
        self.calls.lock().clone()
    }

    fn challenge_output(&self, request: &ClientRequest, values: &[String]) -> String {
        let mut out = String::from("[Sat Oct 17 10:00:00 UTC 2026] Creating domain key\n");
        for (name, value) in request.names().iter().zip(values) {
            out.push_str(&format!(
                "[Sat Oct 17 10:00:01 UTC 2026] Add the following TXT record:\n\
                 [Sat Oct 17 10:00:01 UTC 2026] Domain: '_acme-challenge.{}'\n\
                 [Sat Oct 17 10:00:01 UTC 2026] TXT value: '{}'\n",
                name.trim_start_matches("*."),
                value
            ));
        }
        out.push_str("Please add the TXT records to the domains, and re-run with --renew.\n");
        out
    }

    fn write_artifacts(&self, request: &ClientRequest) {
        let dir = self.home.join(format!("{}_ecc", request.domain));
        fs::create_dir_all(&dir).unwrap();

        let key = KeyPair::generate().unwrap();
        let cert = CertificateParams::new(request.names())
            .unwrap()
            .self_signed(&key)
            .unwrap();

        fs::write(dir.join("fullchain.cer"), cert.pem()).unwrap();
        fs::write(dir.join(format!("{}.key", request.domain)), key.serialize_pem()).unwrap();
        fs::write(dir.join("ca.cer"), cert.pem()).unwrap();
    }
}

#[async_trait]
impl AcmeClient for ScriptedAcmeClient {
    async fn run(
        &self,
        request: &ClientRequest,
        mode: ClientMode,
        cancel: &CancellationToken,
    ) -> Result<ClientOutput, ClientError> {
        self.calls.lock().push(mode);
        if cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }

        match (mode, &self.proceed) {
            (ClientMode::Declare, _) => Ok(ClientOutput {
                exit_code: Some(1),
                stdout: self.challenge_output(request, &self.values),
                stderr: String::new(),
            }),
            (ClientMode::Proceed, ProceedScript::Issue) => {
                self.write_artifacts(request);
                Ok(ClientOutput {
                    exit_code: Some(0),
                    stdout: "Cert success.\n".to_string(),
                    stderr: String::new(),
                })
            }
            (ClientMode::Proceed, ProceedScript::ReportValues(values)) => {
                self.write_artifacts(request);
                Ok(ClientOutput {
                    exit_code: Some(0),
                    stdout: self.challenge_output(request, values),
                    stderr: String::new(),
                })
            }
            (ClientMode::Proceed, ProceedScript::Fail { exit_code, output }) => Ok(ClientOutput {
                exit_code: Some(*exit_code),
                stdout: String::new(),
                stderr: output.clone(),
            }),
        }
    }

    fn artifact_dirs(&self, domain: &str) -> Vec<PathBuf> {
        vec![
            self.home.join(format!("{}_ecc", domain)),
            self.home.join(domain),
        ]
    }
}

/// Engine wired to the scripted client and an in-memory resolver
pub struct Harness {
    pub temp: TempDir,
    pub config: Config,
    pub client: Arc<ScriptedAcmeClient>,
    pub dns: StaticResolver,
    pub engine: CertificateEngine,
}

impl Harness {
    pub fn new(proceed: ProceedScript) -> Self {
        Self::with_config(proceed, |_| {})
    }

    pub fn with_config(proceed: ProceedScript, adjust: impl FnOnce(&mut Config)) -> Self {
        let temp = TempDir::new().unwrap();

        let mut config = Config::default();
        config.acme_client.home = temp.path().join("acme");
        config.store.path = temp.path().join("store");
        config.edge.master_config = temp.path().join("edge").join("Caddyfile");
        config.edge.fragment_dir = temp.path().join("edge").join("sites");
        config.edge.reload_command = vec!["true".to_string()];
        config.edge.control_endpoint = None;
        config.edge.reload_timeout_secs = 5;
        adjust(&mut config);

        fs::create_dir_all(temp.path().join("edge")).unwrap();
        fs::write(
            &config.edge.master_config,
            "{\n\temail admin@p2s.tech\n}\n\nexample.org {\n\trespond \"hello\"\n}\n",
        )
        .unwrap();

        let client = Arc::new(ScriptedAcmeClient::new(
            &config.acme_client.home,
            &["A", "B"],
            proceed,
        ));
        let dns = StaticResolver::new("primary");

        let engine = CertificateEngine::with_parts(
            &config,
            EngineParts {
                client: client.clone(),
                primary_resolver: Arc::new(dns.clone()),
                propagation_panel: vec![Arc::new(dns.clone())],
            },
        )
        .unwrap();

        Self {
            temp,
            config,
            client,
            dns,
            engine,
        }
    }

    /// Publish every value under the challenge record
    pub fn seed(&self, values: &[&str]) {
        for v in values {
            self.dns.publish(RECORD, *v);
        }
    }

    pub fn master_config(&self) -> String {
        fs::read_to_string(&self.config.edge.master_config).unwrap()
    }

    pub fn fragment(&self) -> String {
        fs::read_to_string(self.config.edge.fragment_dir.join(format!("{}.caddy", DOMAIN)))
            .unwrap()
    }

    pub fn import_line(&self) -> String {
        format!("import {}/*", self.config.edge.fragment_dir.display())
    }
}

/// Both names a wildcard certificate for `DOMAIN` must carry
pub fn wildcard_names() -> Vec<String> {
    vec![DOMAIN.to_string(), wildcard_of(DOMAIN)]
}
