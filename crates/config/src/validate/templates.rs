//! Fragment template and import directive validation

use super::{ErrorCategory, ValidationError, ValidationResult};
use crate::Config;

/// Placeholders a fragment must use to be useful
const REQUIRED_PLACEHOLDERS: &[&str] = &["{cert}", "{key}"];

/// Validate the edge fragment template and import directive
pub fn validate_templates(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();
    let edge = &config.edge;

    for placeholder in REQUIRED_PLACEHOLDERS {
        if !edge.fragment_template.contains(placeholder) {
            result.add_error(ValidationError::new(
                ErrorCategory::Template,
                format!("edge.fragment-template must contain {}", placeholder),
            ));
        }
    }

    if !edge.import_directive.contains("{dir}") {
        result.add_error(ValidationError::new(
            ErrorCategory::Template,
            "edge.import-directive must contain {dir}",
        ));
    }

    if edge.import_directive.contains('\n') {
        result.add_error(ValidationError::new(
            ErrorCategory::Template,
            "edge.import-directive must be a single line",
        ));
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_templates_are_valid() {
        assert!(validate_templates(&Config::default()).is_valid());
    }

    #[test]
    fn test_missing_placeholders() {
        let mut config = Config::default();
        config.edge.fragment_template = "{domain} { tls {cert} }".to_string();
        config.edge.import_directive = "import sites/*".to_string();

        let result = validate_templates(&config);
        assert_eq!(result.errors.len(), 2);
        assert!(result.errors.iter().any(|e| e.message.contains("{key}")));
        assert!(result.errors.iter().any(|e| e.message.contains("{dir}")));
    }
}
