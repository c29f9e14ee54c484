//! Configuration for the wildcert certificate engine
//!
//! Configuration is written in KDL (JSON is accepted too). Every field has a
//! default, so an empty file is a valid configuration.
//!
//! ```kdl
//! acme-client {
//!     binary "/root/.acme.sh/acme.sh"
//!     home "/root/.acme.sh"
//!     timeout-secs 300
//! }
//! dns {
//!     primary "8.8.8.8"
//!     propagation-panel "8.8.8.8" "1.1.1.1" "9.9.9.9"
//! }
//! store { path "/var/lib/wildcert/certs" }
//! edge {
//!     master-config "/etc/caddy/Caddyfile"
//!     fragment-dir "/etc/caddy/sites"
//!     reload-command "caddy" "reload" "--config" "/etc/caddy/Caddyfile"
//!     control-endpoint "http://localhost:2019/load"
//! }
//! session { ttl-secs 3600 }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

pub mod kdl;
pub mod sections;
pub mod validate;

pub use sections::{AcmeClientConfig, DnsConfig, EdgeConfig, SessionConfig, StoreConfig};
pub use validate::{ValidationError, ValidationOpts, ValidationResult, ValidationWarning};

/// Configuration shipped with the binary, used when no file is given
pub const DEFAULT_CONFIG_KDL: &str = r#"
acme-client {
    binary "/root/.acme.sh/acme.sh"
    home "/root/.acme.sh"
    server "letsencrypt"
    key-type "ec-256"
    timeout-secs 300
}

dns {
    primary "8.8.8.8"
    propagation-panel "8.8.8.8" "1.1.1.1" "9.9.9.9" "208.67.222.222"
    query-timeout-secs 5
    propagation-timeout-secs 15
    max-concurrent-queries 4
}

store {
    path "/var/lib/wildcert/certs"
}

edge {
    master-config "/etc/caddy/Caddyfile"
    fragment-dir "/etc/caddy/sites"
    reload-command "caddy" "reload" "--config" "/etc/caddy/Caddyfile"
    control-endpoint "http://localhost:2019/load"
    reload-timeout-secs 30
}

session {
    ttl-secs 3600
}
"#;

/// Configuration validation failure
#[derive(Debug, Error)]
#[error("invalid configuration: {}", .errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; "))]
pub struct ConfigError {
    pub errors: Vec<ValidationError>,
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub acme_client: AcmeClientConfig,
    #[serde(default)]
    pub dns: DnsConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub edge: EdgeConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("kdl");

        match extension {
            "kdl" => Self::from_kdl(&content),
            "json" => Self::from_json(&content),
            _ => Err(anyhow::anyhow!("Unsupported config format: {}", extension)),
        }
    }

    /// Load the embedded default configuration
    pub fn default_embedded() -> Result<Self> {
        Self::from_kdl(DEFAULT_CONFIG_KDL)
    }

    /// Parse configuration from KDL format
    pub fn from_kdl(content: &str) -> Result<Self> {
        let doc: ::kdl::KdlDocument = content
            .parse()
            .map_err(|e: ::kdl::KdlError| anyhow::anyhow!("{}", render_kdl_error(content, &e)))?;

        kdl::parse_kdl_document(doc)
    }

    /// Parse configuration from JSON format
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("Failed to parse JSON configuration")
    }

    /// Validate the configuration
    ///
    /// Returns the warnings on success so callers can surface them.
    pub fn validate(&self, opts: &ValidationOpts) -> std::result::Result<Vec<ValidationWarning>, ConfigError> {
        let result = validate::validate_config(self, opts);
        if result.is_valid() {
            Ok(result.warnings)
        } else {
            Err(ConfigError {
                errors: result.errors,
            })
        }
    }
}

/// Render a KDL parse error with line/column context
fn render_kdl_error(content: &str, e: &::kdl::KdlError) -> String {
    use miette::Diagnostic;

    let mut error_msg = String::from("KDL configuration parse error:\n\n");
    let lines: Vec<&str> = content.lines().collect();
    let mut found_details = false;

    if let Some(related) = e.related() {
        for diagnostic in related {
            error_msg.push_str(&format!("  {}\n", diagnostic));
            found_details = true;

            if let Some(labels) = diagnostic.labels() {
                for label in labels {
                    let (line, col) = kdl::offset_to_line_col(content, label.offset());
                    error_msg.push_str(&format!("\n  --> at line {}, column {}\n", line, col));

                    if let Some(line_content) = lines.get(line.saturating_sub(1)) {
                        error_msg.push_str(&format!("{:>4} | {}\n", line, line_content));
                        error_msg.push_str(&format!(
                            "     | {}^",
                            " ".repeat(col.saturating_sub(1))
                        ));
                        if let Some(label_msg) = label.label() {
                            error_msg.push_str(&format!(" {}", label_msg));
                        }
                        error_msg.push('\n');
                    }
                }
            }

            if let Some(help) = diagnostic.help() {
                error_msg.push_str(&format!("\n  Help: {}\n", help));
            }
        }
    }

    if !found_details {
        error_msg.push_str(&format!("  {}\n", e));
    }

    error_msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use std::path::PathBuf;

    #[test]
    fn test_embedded_default_matches_programmatic_default() {
        let embedded = Config::default_embedded().unwrap();
        assert_eq!(embedded, Config::default());
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = Config::from_kdl("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_parse_full_document() {
        let config = Config::from_kdl(
            r#"
            acme-client {
                binary "/opt/acme/acme.sh"
                home "/opt/acme"
                server "none"
                timeout-secs 120
                extra-args "--debug" "2"
            }
            dns {
                primary "1.1.1.1"
                propagation-panel "1.1.1.1" "9.9.9.9"
                max-concurrent-queries 2
            }
            store { path "/srv/certs" }
            edge {
                master-config "/srv/edge/Caddyfile"
                fragment-dir "/srv/edge/sites"
                reload-command "systemctl" "reload" "caddy"
                control-endpoint "none"
            }
            session { ttl-secs 600 }
            "#,
        )
        .unwrap();

        assert_eq!(config.acme_client.binary, PathBuf::from("/opt/acme/acme.sh"));
        assert_eq!(config.acme_client.server, None);
        assert_eq!(config.acme_client.timeout_secs, 120);
        assert_eq!(config.acme_client.extra_args, vec!["--debug", "2"]);
        assert_eq!(config.dns.primary, IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1)));
        assert_eq!(config.dns.propagation_panel.len(), 2);
        assert_eq!(config.dns.max_concurrent_queries, 2);
        assert_eq!(config.store.path, PathBuf::from("/srv/certs"));
        assert_eq!(config.edge.reload_command, vec!["systemctl", "reload", "caddy"]);
        assert_eq!(config.edge.control_endpoint, None);
        assert_eq!(config.session.ttl_secs, 600);
    }

    #[test]
    fn test_invalid_resolver_rejected() {
        let err = Config::from_kdl(r#"dns { primary "not-an-ip" }"#).unwrap_err();
        assert!(err.to_string().contains("must be an IP address"));
    }

    #[test]
    fn test_negative_integer_rejected() {
        let err = Config::from_kdl("session { ttl-secs -5 }").unwrap_err();
        assert!(err.to_string().contains("non-negative"));
    }

    #[test]
    fn test_syntax_error_is_rendered() {
        let err = Config::from_kdl("store { path \"/srv\" ").unwrap_err();
        assert!(err.to_string().contains("KDL configuration parse error"));
    }

    #[test]
    fn test_from_json() {
        let config = Config::from_json(r#"{"store": {"path": "/srv/certs"}}"#).unwrap();
        assert_eq!(config.store.path, PathBuf::from("/srv/certs"));
        assert_eq!(config.dns, DnsConfig::default());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("wildcert.kdl");
        std::fs::write(&path, "session { ttl-secs 60 }").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.session.ttl_secs, 60);

        let bad = dir.path().join("wildcert.yaml");
        std::fs::write(&bad, "").unwrap();
        assert!(Config::from_file(&bad).is_err());
    }

    #[test]
    fn test_validate_reports_errors() {
        let mut config = Config::default();
        config.dns.propagation_panel.clear();
        let opts = ValidationOpts { skip_paths: true };

        let err = config.validate(&opts).unwrap_err();
        assert_eq!(err.errors.len(), 1);
        assert!(err.to_string().contains("propagation-panel"));

        assert!(Config::default().validate(&opts).is_ok());
    }
}
