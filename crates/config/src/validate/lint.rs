//! Configuration linting for best practices

use super::{ValidationResult, ValidationWarning};
use crate::Config;

/// Lint configuration for best practices
pub fn lint_config(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    // A single resolver cannot tell propagation from a local cache hit
    if config.dns.propagation_panel.len() == 1 {
        result.add_warning(ValidationWarning::new(
            "Propagation panel has a single resolver (progress will be all-or-nothing)",
        ));
    }

    if config.edge.reload_command.is_empty() && config.edge.control_endpoint.is_none() {
        result.add_warning(ValidationWarning::new(
            "No reload path configured; certificates will only go live on manual reload",
        ));
    }

    if let Some(ref endpoint) = config.edge.control_endpoint {
        if let Ok(url) = url::Url::parse(endpoint) {
            let local = matches!(
                url.host_str(),
                Some("localhost") | Some("127.0.0.1") | Some("[::1]") | Some("::1")
            );
            if !local {
                result.add_warning(ValidationWarning::new(format!(
                    "Control endpoint {} is not a loopback address",
                    endpoint
                )));
            }
        }
    }

    if config.acme_client.timeout_secs < 60 {
        result.add_warning(ValidationWarning::new(format!(
            "ACME client timeout of {}s is shorter than a typical CA round-trip",
            config.acme_client.timeout_secs
        )));
    }

    result
}
