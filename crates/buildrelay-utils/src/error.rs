//! Error taxonomy shared across crates.
//!
//! Each crate owns its own `thiserror` enum for its failure modes; this module
//! holds the pieces that cross crate boundaries: configuration errors and the
//! [`UserFriendlyError`] trait the CLI uses to render any of them.

use std::fmt;
use thiserror::Error;

/// Trait for providing user-friendly error reporting with context and suggestions
pub trait UserFriendlyError {
    /// Get a user-friendly error message
    fn user_message(&self) -> String;

    /// Get contextual information about the error
    fn context(&self) -> Option<String>;

    /// Get suggested actions to resolve the error
    fn suggestions(&self) -> Vec<String>;

    /// Get the error category for grouping similar errors
    fn category(&self) -> ErrorCategory;
}

/// Categories of errors for grouping in CLI output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Admission,
    Provider,
    Delivery,
    Storage,
    Validation,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "Configuration"),
            Self::Admission => write!(f, "Admission"),
            Self::Provider => write!(f, "LLM Provider"),
            Self::Delivery => write!(f, "Delivery"),
            Self::Storage => write!(f, "Storage"),
            Self::Validation => write!(f, "Validation"),
        }
    }
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration file: {0}")]
    InvalidFile(String),

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Configuration file not found at {path}")]
    NotFound { path: String },

    #[error("Configuration validation failed: {} errors", errors.len())]
    ValidationFailed { errors: Vec<String> },
}

impl UserFriendlyError for ConfigError {
    fn user_message(&self) -> String {
        match self {
            Self::InvalidFile(reason) => {
                format!("Configuration file has invalid format: {reason}")
            }
            Self::MissingRequired(key) => {
                format!("Required configuration '{key}' is missing")
            }
            Self::InvalidValue { key, value } => {
                format!("Configuration '{key}' has invalid value: {value}")
            }
            Self::NotFound { path } => format!("Configuration file not found: {path}"),
            Self::ValidationFailed { errors } => format!(
                "Configuration validation failed with {} errors: {}",
                errors.len(),
                errors.join(", ")
            ),
        }
    }

    fn context(&self) -> Option<String> {
        match self {
            Self::InvalidFile(_) => Some(
                "Configuration files are TOML with [pipeline], [providers], [github], [notify] and [store] sections."
                    .to_string(),
            ),
            Self::MissingRequired(_) => {
                Some("Publishing needs a GitHub owner and token before tasks can run.".to_string())
            }
            Self::InvalidValue { key, .. } => {
                Some(format!("The '{key}' option has bounded or enumerated values."))
            }
            Self::NotFound { .. } => None,
            Self::ValidationFailed { .. } => {
                Some("Every listed problem must be fixed before buildrelay can start.".to_string())
            }
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::InvalidFile(_) => vec![
                "Check the TOML syntax of .buildrelay/config.toml".to_string(),
                "Run 'buildrelay config' to see the effective configuration".to_string(),
            ],
            Self::MissingRequired(key) => vec![format!("Set '{key}' in .buildrelay/config.toml")],
            Self::InvalidValue { key, .. } => {
                vec![format!("Correct the value of '{key}' or remove it to use the default")]
            }
            Self::NotFound { path } => vec![
                format!("Create the file at {path}"),
                "Omit --config to use discovery and defaults".to_string(),
            ],
            Self::ValidationFailed { .. } => {
                vec!["Run 'buildrelay config' to see where each value comes from".to_string()]
            }
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::ValidationFailed { .. } | Self::InvalidValue { .. } => ErrorCategory::Validation,
            _ => ErrorCategory::Configuration,
        }
    }
}

/// Render any [`UserFriendlyError`] as the multi-line block the CLI prints.
#[must_use]
pub fn render_user_error(error: &dyn UserFriendlyError) -> String {
    let mut out = format!("[{}] {}", error.category(), error.user_message());
    if let Some(context) = error.context() {
        out.push_str("\n  ");
        out.push_str(&context);
    }
    for suggestion in error.suggestions() {
        out.push_str("\n  - ");
        out.push_str(&suggestion);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_failure_counts_errors() {
        let err = ConfigError::ValidationFailed {
            errors: vec!["a".into(), "b".into()],
        };
        assert_eq!(err.to_string(), "Configuration validation failed: 2 errors");
        assert_eq!(err.category(), ErrorCategory::Validation);
    }

    #[test]
    fn rendered_error_includes_suggestions() {
        let err = ConfigError::MissingRequired("github.owner".into());
        let rendered = render_user_error(&err);
        assert!(rendered.starts_with("[Configuration] Required configuration 'github.owner'"));
        assert!(rendered.contains("- Set 'github.owner'"));
    }
}
