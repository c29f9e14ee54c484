//! KDL configuration parsing.
//!
//! - `helpers`: Common parsing utility functions
//! - `sections`: One parser per top-level block

mod helpers;
mod sections;

pub use helpers::offset_to_line_col;
pub use sections::{parse_acme_client, parse_dns, parse_edge, parse_session, parse_store};

use anyhow::Result;
use tracing::warn;

use crate::Config;

/// Convert a parsed KDL document to Config
///
/// Missing blocks keep their defaults. Unknown top-level nodes are logged
/// and ignored so that newer files still load on older binaries.
pub fn parse_kdl_document(doc: kdl::KdlDocument) -> Result<Config> {
    let mut config = Config::default();

    for node in doc.nodes() {
        match node.name().value() {
            "acme-client" => {
                config.acme_client = parse_acme_client(node)?;
            }
            "dns" => {
                config.dns = parse_dns(node)?;
            }
            "store" => {
                config.store = parse_store(node)?;
            }
            "edge" => {
                config.edge = parse_edge(node)?;
            }
            "session" => {
                config.session = parse_session(node)?;
            }
            other => {
                warn!(node = %other, "Ignoring unknown top-level configuration block");
            }
        }
    }

    Ok(config)
}
