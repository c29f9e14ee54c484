//! DNS side of the DNS-01 flow
//!
//! - [`DnsVerifier`] gates issuance on the primary resolver
//! - [`PropagationChecker`] samples a resolver panel for progress display
//! - [`TxtLookup`] is the resolver seam; [`StaticResolver`] answers from memory

mod propagation;
mod resolver;
mod verifier;

pub use propagation::PropagationChecker;
pub use resolver::{HickoryTxtResolver, StaticResolver, TxtLookup};
pub use verifier::{apply_report, DnsVerifier};
