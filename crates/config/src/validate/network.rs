//! Resolver and control endpoint validation

use super::{ErrorCategory, ValidationError, ValidationResult};
use crate::Config;

/// Validate resolver settings and the control-plane endpoint
pub fn validate_network(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();
    let dns = &config.dns;

    if dns.propagation_panel.is_empty() {
        result.add_error(ValidationError::new(
            ErrorCategory::Network,
            "dns.propagation-panel must list at least one resolver",
        ));
    }

    if dns.max_concurrent_queries == 0 {
        result.add_error(ValidationError::new(
            ErrorCategory::Network,
            "dns.max-concurrent-queries must be at least 1",
        ));
    }

    if dns.query_timeout_secs == 0 || dns.propagation_timeout_secs == 0 {
        result.add_error(ValidationError::new(
            ErrorCategory::Network,
            "dns timeouts must be greater than zero",
        ));
    }

    if let Some(ref endpoint) = config.edge.control_endpoint {
        match url::Url::parse(endpoint) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => {
                result.add_error(ValidationError::new(
                    ErrorCategory::Network,
                    format!(
                        "edge.control-endpoint must use http or https, got '{}'",
                        url.scheme()
                    ),
                ));
            }
            Err(e) => {
                result.add_error(ValidationError::new(
                    ErrorCategory::Network,
                    format!("edge.control-endpoint '{}' is not a URL: {}", endpoint, e),
                ));
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_network_is_valid() {
        let result = validate_network(&Config::default());
        assert!(result.is_valid(), "{:?}", result.errors);
    }

    #[test]
    fn test_empty_panel_and_zero_workers() {
        let mut config = Config::default();
        config.dns.propagation_panel.clear();
        config.dns.max_concurrent_queries = 0;

        let result = validate_network(&config);
        assert_eq!(result.errors.len(), 2);
    }

    #[test]
    fn test_bad_control_endpoint() {
        let mut config = Config::default();
        config.edge.control_endpoint = Some("ftp://localhost/load".to_string());
        let result = validate_network(&config);
        assert!(result.errors[0].message.contains("http or https"));

        config.edge.control_endpoint = Some("not a url".to_string());
        let result = validate_network(&config);
        assert!(result.errors[0].message.contains("is not a URL"));
    }
}
