//! Agent fleet configuration.

use crate::error::ConfigResult;
use crate::validation::{validate_duration, validate_positive, validate_required_string, Validatable};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Upper bound on any single control-plane call to an agent.
    #[serde(with = "humantime_serde")]
    pub call_timeout: Duration,

    /// Health tracker sweep cadence.
    #[serde(with = "humantime_serde")]
    pub tracking_interval: Duration,

    /// Statistics collector cadence.
    #[serde(with = "humantime_serde")]
    pub stats_interval: Duration,

    /// Fallback tag when a script's tag matches no enabled agent.
    pub default_tag: String,

    /// Health tracker retry attempts before an agent is disabled.
    pub retry_attempts: u32,

    /// Base delay of the linear health-tracker backoff.
    #[serde(with = "humantime_serde")]
    pub retry_base_delay: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            call_timeout: default_call_timeout(),
            tracking_interval: default_tracking_interval(),
            stats_interval: default_stats_interval(),
            default_tag: default_tag(),
            retry_attempts: default_retry_attempts(),
            retry_base_delay: default_retry_base_delay(),
        }
    }
}

fn default_call_timeout() -> Duration {
    Duration::from_secs(11)
}

fn default_tracking_interval() -> Duration {
    Duration::from_secs(15)
}

fn default_stats_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_tag() -> String {
    "public".to_string()
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_base_delay() -> Duration {
    Duration::from_secs(2)
}

impl Validatable for AgentConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_duration(self.call_timeout, "call_timeout", self.domain_name())?;
        validate_duration(self.tracking_interval, "tracking_interval", self.domain_name())?;
        validate_duration(self.stats_interval, "stats_interval", self.domain_name())?;
        validate_required_string(&self.default_tag, "default_tag", self.domain_name())?;
        validate_positive(self.retry_attempts as u64, "retry_attempts", self.domain_name())?;
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "agent"
    }
}
