//! Certificate lifecycle orchestration
//!
//! [`CertificateEngine`] drives one domain through
//! extract → verify → issue → install → sync → reload, with the
//! [`SessionStore`] carrying state between the caller's interactions.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use wildcert_common::{
    normalize_domain, validate_email, CertificateScope, ChallengeSession, Generation,
    IssueSummary, Phase, PhaseError, PropagationReport, ReloadResult, SyncResult,
    VerificationReport,
};
use wildcert_config::Config;

use crate::acme::{
    AcmeClient, CertificateIssuer, ChallengeExtractor, ClientRequest, ProcessAcmeClient,
};
use crate::dns::{apply_report, DnsVerifier, HickoryTxtResolver, PropagationChecker, TxtLookup};
use crate::edge::{EdgeConfigSynchronizer, EdgeReloader};
use crate::error::{EngineError, IssuanceError, SessionError};
use crate::session::SessionStore;
use crate::store::{ArtifactInstaller, CertificateStorage};

/// Parameters of a new extraction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractRequest {
    pub domain: String,
    pub email: String,
    #[serde(default)]
    pub staging: bool,
    /// Also cover `*.domain`
    #[serde(default = "default_wildcard")]
    pub wildcard: bool,
}

fn default_wildcard() -> bool {
    true
}

impl ExtractRequest {
    pub fn new(domain: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            email: email.into(),
            staging: false,
            wildcard: true,
        }
    }

    pub fn staging(mut self, staging: bool) -> Self {
        self.staging = staging;
        self
    }

    pub fn wildcard(mut self, wildcard: bool) -> Self {
        self.wildcard = wildcard;
        self
    }
}

/// Result of re-syncing an installed certificate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResyncSummary {
    pub domain: String,
    pub sync: SyncResult,
    pub reload: ReloadResult,
}

/// External collaborators the engine talks to
pub struct EngineParts {
    pub client: Arc<dyn AcmeClient>,
    /// Resolver whose answer gates issuance
    pub primary_resolver: Arc<dyn TxtLookup>,
    /// Resolvers sampled for propagation display
    pub propagation_panel: Vec<Arc<dyn TxtLookup>>,
}

impl EngineParts {
    /// Real subprocess client and network resolvers from `config`
    pub fn from_config(config: &Config) -> Self {
        let timeout = config.dns.query_timeout();
        Self {
            client: Arc::new(ProcessAcmeClient::new(config.acme_client.clone())),
            primary_resolver: Arc::new(HickoryTxtResolver::new(config.dns.primary, timeout)),
            propagation_panel: config
                .dns
                .propagation_panel
                .iter()
                .map(|ip| Arc::new(HickoryTxtResolver::new(*ip, timeout)) as Arc<dyn TxtLookup>)
                .collect(),
        }
    }
}

/// Removes the in-flight cancellation handle when an operation ends
struct InFlight<'a> {
    map: &'a DashMap<String, CancellationToken>,
    domain: String,
}

impl<'a> InFlight<'a> {
    fn register(
        map: &'a DashMap<String, CancellationToken>,
        domain: &str,
        token: CancellationToken,
    ) -> Self {
        map.insert(domain.to_string(), token);
        Self {
            map,
            domain: domain.to_string(),
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.map.remove(&self.domain);
    }
}

/// Settles the session when a `verify` or `issue` future is dropped midway
struct Unfinished<'a> {
    engine: &'a CertificateEngine,
    domain: &'a str,
    generation: Generation,
    armed: bool,
}

impl<'a> Unfinished<'a> {
    fn new(engine: &'a CertificateEngine, domain: &'a str, generation: Generation) -> Self {
        Self {
            engine,
            domain,
            generation,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for Unfinished<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let domain = self.domain;
        self.engine.settle(domain, self.generation, |s| match s.phase {
            Phase::Verifying => {
                warn!(domain = %domain, "Verification interrupted, session back to extracted");
                s.transition(Phase::Extracted)
            }
            Phase::Issuing => {
                warn!(domain = %domain, "Issuance interrupted, session back to verified");
                s.transition(Phase::Verified)
            }
            Phase::Issued | Phase::Installed => {
                let phase = s.phase;
                warn!(domain = %domain, phase = %phase, "Deployment interrupted");
                s.fail(format!("interrupted in {} before the edge config was synced", phase))
            }
            _ => Ok(()),
        });
    }
}

/// The certificate lifecycle orchestrator
pub struct CertificateEngine {
    sessions: SessionStore,
    extractor: ChallengeExtractor,
    verifier: DnsVerifier,
    propagation: PropagationChecker,
    issuer: CertificateIssuer,
    installer: ArtifactInstaller,
    synchronizer: EdgeConfigSynchronizer,
    reloader: EdgeReloader,
    in_flight: DashMap<String, CancellationToken>,
}

impl CertificateEngine {
    /// Engine with the real ACME client and DNS resolvers
    pub fn from_config(config: &Config) -> Result<Self, EngineError> {
        Self::with_parts(config, EngineParts::from_config(config))
    }

    /// Engine with caller-supplied client and resolvers
    pub fn with_parts(config: &Config, parts: EngineParts) -> Result<Self, EngineError> {
        let storage = Arc::new(CertificateStorage::new(&config.store.path)?);

        info!(
            client = %config.acme_client.binary.display(),
            store = %config.store.path.display(),
            panel = parts.propagation_panel.len(),
            "Certificate engine ready"
        );

        Ok(Self {
            sessions: SessionStore::new(config.session.ttl()),
            extractor: ChallengeExtractor::new(Arc::clone(&parts.client)),
            verifier: DnsVerifier::new(parts.primary_resolver),
            propagation: PropagationChecker::new(
                parts.propagation_panel,
                config.dns.max_concurrent_queries,
                config.dns.propagation_timeout(),
            ),
            issuer: CertificateIssuer::new(parts.client),
            installer: ArtifactInstaller::new(storage),
            synchronizer: EdgeConfigSynchronizer::new(config.edge.clone()),
            reloader: EdgeReloader::new(config.edge.clone()),
            in_flight: DashMap::new(),
        })
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn storage(&self) -> &CertificateStorage {
        self.installer.storage()
    }

    /// Current session for `domain`, including failed ones
    pub fn session(&self, domain: &str) -> Option<ChallengeSession> {
        let domain = normalize_domain(domain).ok()?;
        self.sessions.snapshot(&domain)
    }

    // =========================================================================
    // Extraction
    // =========================================================================

    /// Declare a new order and start a session in `Extracted`.
    ///
    /// Replaces any idle session for the domain. Refused with `Busy` while
    /// another operation on the domain is running.
    pub async fn extract(&self, request: ExtractRequest) -> Result<ChallengeSession, EngineError> {
        let domain = normalize_domain(&request.domain)?;
        validate_email(&request.email)?;
        let _guard = self.sessions.lock(&domain)?;

        let scope = if request.wildcard {
            CertificateScope::Wildcard
        } else {
            CertificateScope::Apex
        };
        let client_request = ClientRequest {
            domain: domain.clone(),
            email: request.email.trim().to_string(),
            staging: request.staging,
            scope,
        };

        let token = CancellationToken::new();
        let records = {
            let _in_flight = InFlight::register(&self.in_flight, &domain, token.clone());
            self.extractor.extract(&client_request, &token).await?
        };

        let session = ChallengeSession::new(
            &domain,
            &client_request.email,
            request.staging,
            scope,
            records,
        );
        info!(
            domain = %domain,
            session_id = %session.id,
            generation = %session.generation,
            records = session.records.len(),
            "Challenge session created"
        );
        self.sessions.insert(session.clone());
        Ok(session)
    }

    // =========================================================================
    // Verification
    // =========================================================================

    /// Check every record against the primary resolver.
    ///
    /// Advances to `Verified` only when all records matched in this pass;
    /// otherwise the session returns to `Extracted` and the error carries
    /// the full per-record report. A `Verified` session is checked again the
    /// same way, so records that disappeared since revoke the verification.
    pub async fn verify(&self, domain: &str) -> Result<VerificationReport, EngineError> {
        let domain = normalize_domain(domain)?;
        let _guard = self.sessions.lock(&domain)?;
        let session = self.sessions.active(&domain)?;

        if !matches!(session.phase, Phase::Extracted | Phase::Verified) {
            return Err(SessionError::Phase(PhaseError {
                from: session.phase,
                to: Phase::Verifying,
            })
            .into());
        }

        let generation = session.generation;
        self.sessions
            .transition(&domain, generation, Phase::Verifying)?;
        let unfinished = Unfinished::new(self, &domain, generation);

        let report = self.verifier.verify(&domain, &session.records).await;

        let next = if report.all_matched {
            Phase::Verified
        } else {
            Phase::Extracted
        };
        self.sessions.update(&domain, generation, |s| {
            apply_report(&mut s.records, &report);
        })?;
        self.sessions.transition(&domain, generation, next)?;
        unfinished.disarm();

        if report.all_matched {
            info!(domain = %domain, generation = %generation, "All challenge records verified");
            Ok(report)
        } else {
            info!(
                domain = %domain,
                failing = report.failing().count(),
                total = report.records.len(),
                "Challenge records not yet visible"
            );
            Err(EngineError::VerificationIncomplete { report })
        }
    }

    /// Sample the propagation panel; never changes the session
    pub async fn check_propagation(&self, domain: &str) -> Result<PropagationReport, EngineError> {
        let domain = normalize_domain(domain)?;
        let session = self.sessions.active(&domain)?;
        Ok(self.propagation.check(&domain, &session.records).await)
    }

    // =========================================================================
    // Issuance through reload
    // =========================================================================

    /// Issue, install, sync and reload for a verified session.
    ///
    /// Cancelling `cancel` (or [`CertificateEngine::cancel`]) terminates the
    /// client and returns the session to `Verified`, as does dropping the
    /// returned future while the client runs. Any later failure moves it to
    /// `Failed`. A failed reload is a warning in the summary, never an
    /// error.
    pub async fn issue(
        &self,
        domain: &str,
        cancel: &CancellationToken,
    ) -> Result<IssueSummary, EngineError> {
        let domain = normalize_domain(domain)?;
        let _guard = self.sessions.lock(&domain)?;
        let session = self.sessions.active(&domain)?;

        if session.phase != Phase::Verified || !session.all_matched() {
            return Err(IssuanceError::NotVerified {
                phase: session.phase,
            }
            .into());
        }

        let generation = session.generation;
        self.sessions
            .transition(&domain, generation, Phase::Issuing)?;
        let unfinished = Unfinished::new(self, &domain, generation);

        let request = ClientRequest {
            domain: domain.clone(),
            email: session.email.clone(),
            staging: session.staging,
            scope: session.scope,
        };

        let token = cancel.child_token();
        let issued = {
            let _in_flight = InFlight::register(&self.in_flight, &domain, token.clone());
            self.issuer.issue(&request, &session.records, &token).await
        };

        let artifacts = match issued {
            Ok(artifacts) => artifacts,
            Err(e @ (IssuanceError::Cancelled | IssuanceError::TimedOut(_))) => {
                warn!(domain = %domain, error = %e, "Issuance interrupted, session back to verified");
                self.settle(&domain, generation, |s| s.transition(Phase::Verified));
                return Err(e.into());
            }
            Err(e) => return Err(self.fail(&domain, generation, e.into())),
        };
        self.sessions
            .transition(&domain, generation, Phase::Issued)?;

        let installation = match self
            .installer
            .install(&artifacts, session.scope, session.staging)
        {
            Ok(installation) => installation,
            Err(e) => return Err(self.fail(&domain, generation, e.into())),
        };
        self.sessions
            .transition(&domain, generation, Phase::Installed)?;

        let names = session.scope.required_names(&domain);
        let sync = match self
            .synchronizer
            .sync(&domain, &names, &installation.paths)
            .await
        {
            Ok(sync) => sync,
            Err(e) => return Err(self.fail(&domain, generation, e.into())),
        };

        let reload = self.reloader.reload().await;

        let mut warnings = Vec::new();
        if !reload.succeeded() {
            warnings.push(
                "edge server reload failed; the new certificate is installed and configured \
                 but not live until the next successful reload"
                    .to_string(),
            );
        }
        if session.staging {
            warnings.push("certificate was issued by the staging CA and is not publicly trusted".to_string());
        }

        self.sessions
            .transition(&domain, generation, Phase::Synced)?;
        self.sessions.remove(&domain);
        unfinished.disarm();

        info!(
            domain = %domain,
            expires = %installation.certificate.not_after,
            config_updated = sync.updated,
            reload = ?reload.outcome,
            "Certificate deployed"
        );

        Ok(IssueSummary {
            domain,
            installed: installation.paths,
            certificate: installation.certificate,
            config_synced: true,
            config_updated: sync.updated,
            reload_succeeded: reload.succeeded(),
            reload,
            warnings,
        })
    }

    /// Regenerate the edge config for an installed certificate.
    ///
    /// Reloads only when the sync changed something on disk.
    pub async fn resync(&self, domain: &str) -> Result<ResyncSummary, EngineError> {
        let domain = normalize_domain(domain)?;
        let _guard = self.sessions.lock(&domain)?;

        let storage = self.installer.storage();
        let paths = storage
            .certificate_paths(&domain)
            .ok_or_else(|| EngineError::NotInstalled {
                domain: domain.clone(),
            })?;
        let names = match storage.load_meta(&domain)? {
            Some(meta) => meta.domains,
            None => CertificateScope::Wildcard.required_names(&domain),
        };

        let sync = self.synchronizer.sync(&domain, &names, &paths).await?;
        let reload = if sync.updated {
            self.reloader.reload().await
        } else {
            debug!(domain = %domain, "Edge config unchanged, skipping reload");
            ReloadResult::skipped()
        };

        Ok(ResyncSummary {
            domain,
            sync,
            reload,
        })
    }

    /// Abandon the domain's session, terminating any running client.
    ///
    /// Returns whether there was anything to cancel.
    pub fn cancel(&self, domain: &str) -> bool {
        let Ok(domain) = normalize_domain(domain) else {
            return false;
        };

        let running = match self.in_flight.get(&domain) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        };
        let removed = self.sessions.remove(&domain).is_some();

        if running || removed {
            info!(domain = %domain, running = running, "Challenge session cancelled");
        }
        running || removed
    }

    /// Record `err` on the session and hand it back
    fn fail(
        &self,
        domain: &str,
        generation: Generation,
        err: EngineError,
    ) -> EngineError {
        error!(domain = %domain, code = err.code(), error = %err, "Certificate run failed");
        let message = err.to_string();
        self.settle(domain, generation, |s| s.fail(message));
        err
    }

    /// Best-effort session update after the session may have been cancelled
    fn settle(
        &self,
        domain: &str,
        generation: Generation,
        f: impl FnOnce(&mut ChallengeSession) -> Result<(), PhaseError>,
    ) {
        match self.sessions.update(domain, generation, f) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(domain = %domain, error = %e, "Session phase not updated"),
            Err(e) => debug!(domain = %domain, error = %e, "Session gone before it could be updated"),
        }
    }
}
