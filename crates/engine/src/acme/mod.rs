//! External ACME client orchestration
//!
//! The client is a stateful command-line tool driven in two invocations:
//!
//! 1. [`ChallengeExtractor`] runs it in declare mode and parses the DNS
//!    challenges it prints ([`parse_challenges`])
//! 2. [`CertificateIssuer`] runs it again in proceed mode once the records
//!    are visible, then collects the issued files
//!
//! [`AcmeClient`] is the process seam; [`ProcessAcmeClient`] spawns the
//! configured binary.

mod client;
mod extractor;
mod issuer;
mod parser;

pub use client::{AcmeClient, ClientMode, ClientOutput, ClientRequest, ProcessAcmeClient};
pub use extractor::ChallengeExtractor;
pub use issuer::{CertificateIssuer, IssuedArtifactSet};
pub use parser::parse_challenges;
