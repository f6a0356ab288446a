//! Orchestration engine configuration.

use crate::error::ConfigResult;
use crate::validation::{validate_duration, validate_positive, Validatable};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Command provider / processor pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Processor replica identity. Empty means "resolve from the OS
    /// hostname at startup".
    pub hostname: String,

    /// Command provider polling cadence.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Number of parallel dispatcher workers.
    pub worker_count: usize,

    /// Capacity of the bounded dispatch queue; the provider blocks when
    /// it is full.
    pub dispatch_capacity: usize,

    /// Treat all hosts as one pool when leasing (single-replica
    /// deployments).
    pub shared_host_pool: bool,

    /// Metrics-cardinality ceiling per script run; exceeding it
    /// force-stops the run.
    pub max_series_per_script: i64,

    /// Length cap of a run's free-text info log.
    pub run_info_limit: usize,

    /// Base URL used when building run links for annotations.
    pub ui_base_url: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            hostname: String::new(),
            poll_interval: default_poll_interval(),
            worker_count: default_worker_count(),
            dispatch_capacity: default_dispatch_capacity(),
            shared_host_pool: false,
            max_series_per_script: default_max_series(),
            run_info_limit: default_run_info_limit(),
            ui_base_url: default_ui_base_url(),
        }
    }
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_worker_count() -> usize {
    2
}

fn default_dispatch_capacity() -> usize {
    16
}

fn default_max_series() -> i64 {
    100
}

fn default_run_info_limit() -> usize {
    4000
}

fn default_ui_base_url() -> String {
    "http://localhost:8080".to_string()
}

impl Validatable for EngineConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_duration(self.poll_interval, "poll_interval", self.domain_name())?;
        validate_positive(self.worker_count as u64, "worker_count", self.domain_name())?;
        validate_positive(
            self.dispatch_capacity as u64,
            "dispatch_capacity",
            self.domain_name(),
        )?;
        if self.max_series_per_script <= 0 {
            return Err(self.validation_error("max_series_per_script must be greater than 0"));
        }
        validate_positive(
            self.run_info_limit as u64,
            "run_info_limit",
            self.domain_name(),
        )?;
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "engine"
    }
}
