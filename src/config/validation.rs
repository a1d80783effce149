use url::Url;

use crate::config::models::ConsulSourceConfig;

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Source option validator
pub struct SourceConfigValidator;

impl SourceConfigValidator {
    /// Validate the entire source configuration, reporting every problem at once
    pub fn validate(config: &ConsulSourceConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_key(&config.key) {
            errors.push(e);
        }

        if let Err(e) = Self::validate_address(&config.address) {
            errors.push(e);
        }

        if config.poll_wait_secs == 0 {
            errors.push(ValidationError::InvalidField {
                field: "poll_wait_secs".to_string(),
                message: "Poll wait time must be greater than zero".to_string(),
            });
        }

        if config.request_timeout_secs == 0 {
            errors.push(ValidationError::InvalidField {
                field: "request_timeout_secs".to_string(),
                message: "Request timeout must be greater than zero".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    /// The key must name something; blank keys would read the whole store
    pub fn validate_key(key: &str) -> ValidationResult<()> {
        if key.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "key".to_string(),
            });
        }
        Ok(())
    }

    fn validate_address(address: &str) -> ValidationResult<()> {
        match Url::parse(address) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
            Ok(url) => Err(ValidationError::InvalidField {
                field: "address".to_string(),
                message: format!("Unsupported scheme '{}', expected http or https", url.scheme()),
            }),
            Err(e) => Err(ValidationError::InvalidField {
                field: "address".to_string(),
                message: format!("Invalid URL '{address}': {e}"),
            }),
        }
    }

    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}
