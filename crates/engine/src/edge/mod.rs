//! Edge server integration
//!
//! [`EdgeConfigSynchronizer`] points the edge server at installed
//! certificates; [`EdgeReloader`] makes the running server pick them up.

mod reload;
mod sync;

pub use reload::EdgeReloader;
pub use sync::EdgeConfigSynchronizer;
