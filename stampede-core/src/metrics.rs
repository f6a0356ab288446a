//! Live metrics reported by agents for one script run.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::command::ParseEnumError;

/// Agent-side execution state of a script-run process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    #[default]
    Created,
    Ended,
    /// The run was force-stopped (cardinality breaker, failed stop call).
    Interrupted,
    Teardown,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Created => "Created",
            ExecutionStatus::Ended => "Ended",
            ExecutionStatus::Interrupted => "Interrupted",
            ExecutionStatus::Teardown => "Teardown",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Created" => Ok(ExecutionStatus::Created),
            "Ended" => Ok(ExecutionStatus::Ended),
            "Interrupted" => Ok(ExecutionStatus::Interrupted),
            "Teardown" => Ok(ExecutionStatus::Teardown),
            other => Err(ParseEnumError {
                kind: "execution status",
                value: other.to_string(),
            }),
        }
    }
}

/// One status sample as returned by an agent, already numeric.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSample {
    pub rps: i64,
    pub rt90p: i64,
    pub rt95p: i64,
    pub rt99p: i64,
    pub rt_max: i64,
    pub failed: i64,
    pub vus: i64,
    pub sent: i64,
    pub received: i64,
    /// Number of distinct time series the agent reports for this run.
    pub variety_ts: i64,
}

/// Accumulated metrics of one script run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metrics {
    pub rps: i64,
    pub rt90p: i64,
    pub rt95p: i64,
    pub rt99p: i64,
    pub rt_max: i64,
    pub failed: i64,
    pub vus: i64,
    pub sent: i64,
    pub received: i64,
    pub variety_ts: i64,
    pub execution_status: ExecutionStatus,
}

impl Metrics {
    /// Merge a fresh agent sample: latency percentiles keep the maximum
    /// seen, throughput counters accumulate.
    pub fn merge_sample(&mut self, sample: &MetricsSample) {
        self.rps += sample.rps;
        self.vus += sample.vus;
        self.sent += sample.sent;
        self.received += sample.received;
        self.failed += sample.failed;
        self.rt90p = self.rt90p.max(sample.rt90p);
        self.rt95p = self.rt95p.max(sample.rt95p);
        self.rt99p = self.rt99p.max(sample.rt99p);
        self.rt_max = self.rt_max.max(sample.rt_max);
        self.variety_ts = sample.variety_ts;
    }

    /// Interrupted is sticky; anything else may become `status`.
    pub fn settle_execution_status(&mut self, status: ExecutionStatus) {
        if self.execution_status != ExecutionStatus::Interrupted {
            self.execution_status = status;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(rps: i64, rt95p: i64) -> MetricsSample {
        MetricsSample {
            rps,
            rt95p,
            vus: 2,
            sent: 10,
            received: 20,
            ..MetricsSample::default()
        }
    }

    #[test]
    fn merge_accumulates_counters_and_maxes_percentiles() {
        let mut m = Metrics::default();
        m.merge_sample(&sample(50, 120));
        m.merge_sample(&sample(30, 90));
        assert_eq!(m.rps, 80);
        assert_eq!(m.vus, 4);
        assert_eq!(m.sent, 20);
        assert_eq!(m.received, 40);
        assert_eq!(m.rt95p, 120);
    }

    #[test]
    fn interrupted_status_is_sticky() {
        let mut m = Metrics::default();
        m.settle_execution_status(ExecutionStatus::Interrupted);
        m.settle_execution_status(ExecutionStatus::Ended);
        assert_eq!(m.execution_status, ExecutionStatus::Interrupted);
    }
}
