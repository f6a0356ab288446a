//! Wire types of the agent control-plane API (JSON bodies).

use serde::{Deserialize, Serialize};
use stampede_core::MetricsSample;
use std::collections::HashMap;

pub const STATUS_SUCCESS: &str = "Success";
pub const STATUS_ERROR: &str = "Error";

/// Error-body marker meaning the pid is gone: treated as
/// already-stopped, not as a failure.
pub const NO_SUCH_TEST_RUN: &str = "no such test run";
pub const NO_SUCH_TASK: &str = "there is no such task";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    pub scenario_title: String,
    pub script_title: String,
    #[serde(rename = "scriptURL")]
    pub script_url: String,
    #[serde(rename = "ammoURL")]
    pub ammo_url: String,
    pub params: Vec<String>,
}

/// Agent-side task descriptor returned by start/getStatus/getAllTasks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskInfo {
    pub pid: i64,
    pub scenario_title: String,
    pub script_title: String,
    pub log_file_name: String,
    pub k6_api_port: String,
    pub port_prometheus: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StartResponse {
    pub status: String,
    pub error: String,
    pub pid: i64,
    pub task: Option<TaskInfo>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PidRequest {
    pub pid: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StopResponse {
    pub status: String,
    pub error: String,
}

/// Metrics come over the wire as decimal strings; parse failures count
/// as zero, matching the backend this replaces.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WireMetrics {
    pub rps: String,
    pub rt90p: String,
    pub rt95p: String,
    pub rt99p: String,
    pub rt_max: String,
    pub failed: String,
    pub vus: String,
    pub sent: String,
    pub received: String,
    pub variety_ts: String,
}

impl WireMetrics {
    pub fn to_sample(&self) -> MetricsSample {
        MetricsSample {
            rps: parse_metric(&self.rps),
            rt90p: parse_metric(&self.rt90p),
            rt95p: parse_metric(&self.rt95p),
            rt99p: parse_metric(&self.rt99p),
            rt_max: parse_metric(&self.rt_max),
            failed: parse_metric(&self.failed),
            vus: parse_metric(&self.vus),
            sent: parse_metric(&self.sent),
            received: parse_metric(&self.received),
            variety_ts: parse_metric(&self.variety_ts),
        }
    }
}

fn parse_metric(raw: &str) -> i64 {
    raw.trim().parse().unwrap_or(0)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusResponse {
    pub status: String,
    pub error: String,
    pub task: Option<TaskInfo>,
    pub metrics: Option<WireMetrics>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AllTasksResponse {
    pub status: String,
    pub error: String,
    pub tasks: HashMap<i64, TaskInfo>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Utilization {
    pub cpu_used: i32,
    pub mem_used: i32,
    pub ports_used: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UtilizationResponse {
    pub status: String,
    pub error: String,
    pub agent_utilization: Utilization,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_request_uses_upstream_field_names() {
        let rq = StartRequest {
            scenario_title: "checkout".into(),
            script_title: "cart".into(),
            script_url: "http://files/cart.js".into(),
            ammo_url: "http://files/ammo.json".into(),
            params: vec!["-e".into(), "RPS=10".into()],
        };
        let json = serde_json::to_value(&rq).unwrap();
        assert!(json.get("scenarioTitle").is_some());
        assert!(json.get("scriptURL").is_some());
        assert!(json.get("ammoURL").is_some());
    }

    #[test]
    fn wire_metrics_parse_with_zero_fallback() {
        let metrics = WireMetrics {
            rps: "120".into(),
            rt95p: "350".into(),
            failed: "not-a-number".into(),
            ..WireMetrics::default()
        };
        let sample = metrics.to_sample();
        assert_eq!(sample.rps, 120);
        assert_eq!(sample.rt95p, 350);
        assert_eq!(sample.failed, 0);
    }

    #[test]
    fn all_tasks_accepts_pid_keyed_map() {
        let body = r#"{"status":"Success","error":"","tasks":{"4711":{"pid":4711,"logFileName":"run.log"}}}"#;
        let rs: AllTasksResponse = serde_json::from_str(body).unwrap();
        assert_eq!(rs.tasks.len(), 1);
        assert_eq!(rs.tasks[&4711].log_file_name, "run.log");
    }
}
