//! Domain-specific configuration modules.

pub mod agent;
pub mod engine;
pub mod logging;

use crate::error::ConfigResult;
use crate::validation::Validatable;
use serde::{Deserialize, Serialize};

/// Main stampede configuration combining all domains.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StampedeConfig {
    /// Command queue / processor configuration.
    #[serde(default)]
    pub engine: engine::EngineConfig,

    /// Agent fleet configuration.
    #[serde(default)]
    pub agent: agent::AgentConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: logging::LoggingConfig,
}

impl StampedeConfig {
    /// Validate all domain configurations.
    pub fn validate_all(&self) -> ConfigResult<()> {
        self.engine.validate()?;
        self.agent.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}
