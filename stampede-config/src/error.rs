//! Configuration error types.

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("environment variable error: {0}")]
    Env(String),

    #[error("validation error in {domain}: {message}")]
    Domain { domain: String, message: String },
}
