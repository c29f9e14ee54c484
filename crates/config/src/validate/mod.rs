//! Configuration validation
//!
//! Semantic checks that go beyond parsing: resolver panel, control endpoint,
//! template placeholders, filesystem layout and best-practice linting.

pub mod lint;
pub mod network;
pub mod paths;
pub mod templates;

use std::fmt;

use crate::Config;

/// Validation error category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Resolver or endpoint issue
    Network,
    /// Missing or unusable file or directory
    Filesystem,
    /// Fragment template or import directive issue
    Template,
    /// Values that are individually valid but unusable together
    Logic,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Network => write!(f, "Network"),
            ErrorCategory::Filesystem => write!(f, "Filesystem"),
            ErrorCategory::Template => write!(f, "Template"),
            ErrorCategory::Logic => write!(f, "Logic"),
        }
    }
}

/// Validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub category: ErrorCategory,
    pub message: String,
}

impl ValidationError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.category, self.message)
    }
}

/// Validation warning
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub message: String,
}

impl ValidationWarning {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Validation result containing errors and warnings
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    /// Create a new empty validation result
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an error
    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    /// Add a warning
    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    /// Merge another validation result into this one
    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    /// Check if validation passed (no errors)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Validation options
#[derive(Debug, Clone, Default)]
pub struct ValidationOpts {
    /// Skip checks that touch the filesystem
    pub skip_paths: bool,
}

/// Run every validator
pub fn validate_config(config: &Config, opts: &ValidationOpts) -> ValidationResult {
    let mut result = ValidationResult::new();

    result.merge(network::validate_network(config));
    result.merge(templates::validate_templates(config));
    if !opts.skip_paths {
        result.merge(paths::validate_paths(config));
    }
    result.merge(lint::lint_config(config));

    result
}
