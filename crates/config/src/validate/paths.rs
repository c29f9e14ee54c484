//! Filesystem layout validation
//!
//! Checks that the client binary, master config and store locations are
//! usable before any interaction starts.

use std::path::Path;

use super::{ErrorCategory, ValidationError, ValidationResult, ValidationWarning};
use crate::Config;

/// Validate filesystem paths referenced by the configuration
pub fn validate_paths(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    let binary = &config.acme_client.binary;
    // Bare names are resolved through PATH at spawn time
    if binary.components().count() > 1 && !binary.exists() {
        result.add_error(ValidationError::new(
            ErrorCategory::Filesystem,
            format!("ACME client not found: {:?}", binary),
        ));
    }

    if !config.edge.master_config.exists() {
        result.add_error(ValidationError::new(
            ErrorCategory::Filesystem,
            format!("Edge master config not found: {:?}", config.edge.master_config),
        ));
    }

    if !has_existing_ancestor(&config.store.path) {
        result.add_error(ValidationError::new(
            ErrorCategory::Filesystem,
            format!("Certificate store cannot be created: {:?}", config.store.path),
        ));
    }

    if !config.edge.fragment_dir.exists() {
        result.add_warning(ValidationWarning::new(format!(
            "Fragment directory {:?} does not exist yet; it will be created on first sync",
            config.edge.fragment_dir
        )));
    }

    result
}

fn has_existing_ancestor(path: &Path) -> bool {
    path.ancestors().any(|p| !p.as_os_str().is_empty() && p.is_dir())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_validate_missing_files() {
        let mut config = Config::default();
        config.acme_client.binary = "/nonexistent/acme.sh".into();
        config.edge.master_config = "/nonexistent/Caddyfile".into();

        let result = validate_paths(&config);

        assert!(result
            .errors
            .iter()
            .any(|e| e.message.contains("ACME client not found")));
        assert!(result
            .errors
            .iter()
            .any(|e| e.message.contains("master config not found")));
    }

    #[test]
    fn test_validate_existing_layout() {
        let dir = TempDir::new().unwrap();
        let master = dir.path().join("Caddyfile");
        std::fs::write(&master, "").unwrap();

        let mut config = Config::default();
        config.acme_client.binary = "acme.sh".into();
        config.edge.master_config = master;
        config.edge.fragment_dir = dir.path().join("sites");
        config.store.path = dir.path().join("store");

        let result = validate_paths(&config);
        assert!(result.is_valid(), "{:?}", result.errors);
        assert_eq!(result.warnings.len(), 1);
    }
}
