//! Wildcert Certificate Engine
//!
//! Orchestrates wildcard TLS certificate issuance over manual DNS-01
//! challenges and deploys the result to a running edge server.
//!
//! The pipeline, leaf-first:
//!
//! - **Extraction**: run the external ACME client without committing and
//!   parse the TXT records it asks for
//! - **Verification**: confirm those records in DNS, with propagation
//!   sampling across public resolvers
//! - **Issuance**: run the client again to finalize the order
//! - **Installation**: check and atomically install the artifacts
//! - **Edge sync and reload**: write the site fragment, keep the master
//!   import directive intact, and reload the edge server
//!
//! # Example
//!
//! ```ignore
//! use wildcert_config::Config;
//! use wildcert_engine::{CertificateEngine, ExtractRequest};
//! use tokio_util::sync::CancellationToken;
//!
//! let engine = CertificateEngine::from_config(&Config::default())?;
//! let session = engine
//!     .extract(ExtractRequest::new("p2s.tech", "admin@p2s.tech"))
//!     .await?;
//! // ... operator publishes session.records ...
//! engine.verify("p2s.tech").await?;
//! let summary = engine.issue("p2s.tech", &CancellationToken::new()).await?;
//! ```

// ============================================================================
// Module Declarations
// ============================================================================

pub mod acme;
pub mod dns;
pub mod edge;
pub mod engine;
pub mod error;
pub mod session;
pub mod store;

// ============================================================================
// Public API Re-exports
// ============================================================================

// Orchestration
pub use engine::{CertificateEngine, EngineParts, ExtractRequest, ResyncSummary};
pub use session::{DomainGuard, SessionStore};

// Errors
pub use error::{
    ClientError, DnsLookupError, EngineError, ExtractionError, InstallError, IssuanceError,
    SessionError, StorageError, SyncError,
};

// Pipeline stages
pub use acme::{AcmeClient, CertificateIssuer, ChallengeExtractor, ProcessAcmeClient};
pub use dns::{DnsVerifier, HickoryTxtResolver, PropagationChecker, StaticResolver, TxtLookup};
pub use edge::{EdgeConfigSynchronizer, EdgeReloader};
pub use store::{ArtifactInstaller, CertificateStorage};
