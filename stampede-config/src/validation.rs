//! Configuration validation trait and helpers.

use crate::error::{ConfigError, ConfigResult};
use std::time::Duration;

/// Trait for validatable configuration domains.
pub trait Validatable {
    fn validate(&self) -> ConfigResult<()>;

    /// Domain name used in error reporting.
    fn domain_name(&self) -> &'static str;

    fn validation_error(&self, message: impl Into<String>) -> ConfigError {
        ConfigError::Domain {
            domain: self.domain_name().to_string(),
            message: message.into(),
        }
    }
}

/// Validate a required string field.
pub fn validate_required_string(value: &str, field: &str, domain: &str) -> ConfigResult<()> {
    if value.is_empty() {
        return Err(ConfigError::Domain {
            domain: domain.to_string(),
            message: format!("{field} cannot be empty"),
        });
    }
    Ok(())
}

/// Validate a positive integer field.
pub fn validate_positive(value: u64, field: &str, domain: &str) -> ConfigResult<()> {
    if value == 0 {
        return Err(ConfigError::Domain {
            domain: domain.to_string(),
            message: format!("{field} must be greater than 0"),
        });
    }
    Ok(())
}

/// Validate a non-zero duration field.
pub fn validate_duration(value: Duration, field: &str, domain: &str) -> ConfigResult<()> {
    if value.is_zero() {
        return Err(ConfigError::Domain {
            domain: domain.to_string(),
            message: format!("{field} must be a non-zero duration"),
        });
    }
    Ok(())
}
