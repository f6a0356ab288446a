//! Configuration loading and environment variable handling.

use crate::domains::StampedeConfig;
use crate::error::{ConfigError, ConfigResult};
use std::path::Path;
use std::time::Duration;

/// Configuration loader with environment variable support.
pub struct ConfigLoader {
    prefix: String,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            prefix: "STAMPEDE".to_string(),
        }
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Load configuration from a YAML file with environment overrides.
    pub fn from_file(&self, path: impl AsRef<Path>) -> ConfigResult<StampedeConfig> {
        let content = std::fs::read_to_string(path)?;
        let mut config: StampedeConfig = serde_yaml::from_str(&content)?;
        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;
        Ok(config)
    }

    /// Load configuration from environment variables only.
    pub fn from_env(&self) -> ConfigResult<StampedeConfig> {
        let mut config = StampedeConfig::default();
        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;
        Ok(config)
    }

    /// Load with a fallback chain: file when given, else environment.
    pub fn load(&self, config_path: Option<impl AsRef<Path>>) -> ConfigResult<StampedeConfig> {
        match config_path {
            Some(path) => self.from_file(path),
            None => self.from_env(),
        }
    }

    fn apply_env_overrides(&self, config: &mut StampedeConfig) -> ConfigResult<()> {
        if let Ok(hostname) = self.get_env_var("HOSTNAME") {
            config.engine.hostname = hostname;
        }

        if let Ok(secs) = self.get_env_var("POLL_INTERVAL_SECONDS") {
            config.engine.poll_interval = Duration::from_secs(parse_env("POLL_INTERVAL_SECONDS", &secs)?);
        }

        if let Ok(count) = self.get_env_var("WORKER_COUNT") {
            config.engine.worker_count = parse_env("WORKER_COUNT", &count)?;
        }

        if let Ok(shared) = self.get_env_var("SHARED_HOST_POOL") {
            config.engine.shared_host_pool = parse_env("SHARED_HOST_POOL", &shared)?;
        }

        if let Ok(secs) = self.get_env_var("AGENT_CALL_TIMEOUT_SECONDS") {
            config.agent.call_timeout =
                Duration::from_secs(parse_env("AGENT_CALL_TIMEOUT_SECONDS", &secs)?);
        }

        if let Ok(tag) = self.get_env_var("DEFAULT_TAG") {
            config.agent.default_tag = tag;
        }

        if let Ok(level) = self.get_env_var("LOG_LEVEL") {
            config.logging.level = level;
        }

        Ok(())
    }

    fn get_env_var(&self, name: &str) -> Result<String, std::env::VarError> {
        std::env::var(format!("{}_{}", self.prefix, name))
    }
}

fn parse_env<T>(name: &str, value: &str) -> ConfigResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| ConfigError::Env(format!("invalid {name}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_yaml_with_defaults_for_missing_domains() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "engine:\n  worker_count: 5\n  poll_interval: 2s\nagent:\n  default_tag: perf\n"
        )
        .unwrap();

        let config = ConfigLoader::with_prefix("STAMPEDE_TEST_NONE")
            .from_file(file.path())
            .unwrap();
        assert_eq!(config.engine.worker_count, 5);
        assert_eq!(config.engine.poll_interval, Duration::from_secs(2));
        assert_eq!(config.agent.default_tag, "perf");
        // Untouched domains keep defaults.
        assert_eq!(config.engine.dispatch_capacity, 16);
        assert_eq!(config.agent.call_timeout, Duration::from_secs(11));
    }

    #[test]
    fn env_override_wins_over_default() {
        std::env::set_var("STAMPEDE_UT_WORKER_COUNT", "9");
        let config = ConfigLoader::with_prefix("STAMPEDE_UT").from_env().unwrap();
        std::env::remove_var("STAMPEDE_UT_WORKER_COUNT");
        assert_eq!(config.engine.worker_count, 9);
    }

    #[test]
    fn invalid_yaml_field_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "engine:\n  worker_count: 0\n").unwrap();
        assert!(ConfigLoader::new().from_file(file.path()).is_err());
    }
}
