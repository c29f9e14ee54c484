//! Certificate store and artifact installation

mod inspect;
mod install;
mod storage;

pub use inspect::{inspect_certificate, key_matches, private_key_public_bits, CertificateInfo};
pub use install::{ArtifactInstaller, Installation};
pub use storage::{CertificateMeta, CertificateStorage};
