//! Runs and script runs: one execution of a scenario and its live
//! per-agent script instances.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::agent::Agent;
use crate::command::ParseEnumError;
use crate::metrics::Metrics;

/// Lifecycle of a run. Failed is not strictly terminal: observation of
/// the remaining script runs may continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Prepared,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Prepared => "prepared",
            RunStatus::Running => "running",
            RunStatus::Stopping => "stopping",
            RunStatus::Stopped => "stopped",
            RunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prepared" => Ok(RunStatus::Prepared),
            "running" => Ok(RunStatus::Running),
            "stopping" => Ok(RunStatus::Stopping),
            "stopped" => Ok(RunStatus::Stopped),
            "failed" => Ok(RunStatus::Failed),
            other => Err(ParseEnumError {
                kind: "run status",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptRunStatus {
    #[default]
    Stopped,
    Running,
    Stopping,
    Failed,
}

impl ScriptRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptRunStatus::Stopped => "stopped",
            ScriptRunStatus::Running => "running",
            ScriptRunStatus::Stopping => "stopping",
            ScriptRunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ScriptRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution options of an extended script.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptOptions {
    /// Requests per second at 100% load.
    pub rps: i64,
    pub steps: i64,
    pub duration: String,
    #[serde(default)]
    pub additional_env: Vec<String>,
}

/// A scripted (extended) load-test definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub id: i64,
    pub scenario_id: i64,
    pub project_id: i64,
    pub name: String,
    pub tag: String,
    /// URL of the script file the agent downloads and executes.
    pub script_file: String,
    pub base_url: String,
    pub ammo_url: String,
    pub enabled: bool,
    pub options: ScriptOptions,
}

/// A declarative single-request load-test definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimpleScript {
    pub id: i64,
    pub scenario_id: i64,
    pub project_id: i64,
    pub name: String,
    pub tag: String,
    pub rps: i64,
    pub steps: i64,
    pub duration: String,
    pub scheme: String,
    pub path: String,
    pub ammo_url: String,
    pub script_file_url: String,
    pub enabled: bool,
    #[serde(default)]
    pub additional_env: Vec<String>,
}

/// The two kinds of load-test definition a script run can execute.
/// Switched exhaustively wherever their shapes differ.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScriptKind {
    Extended(Script),
    Simple(SimpleScript),
}

impl ScriptKind {
    pub fn id(&self) -> i64 {
        match self {
            ScriptKind::Extended(s) => s.id,
            ScriptKind::Simple(s) => s.id,
        }
    }

    pub fn scenario_id(&self) -> i64 {
        match self {
            ScriptKind::Extended(s) => s.scenario_id,
            ScriptKind::Simple(s) => s.scenario_id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ScriptKind::Extended(s) => &s.name,
            ScriptKind::Simple(s) => &s.name,
        }
    }

    pub fn tag(&self) -> &str {
        match self {
            ScriptKind::Extended(s) => &s.tag,
            ScriptKind::Simple(s) => &s.tag,
        }
    }

    /// Current effective RPS option (mutated when running at a
    /// percentage of target).
    pub fn rps(&self) -> i64 {
        match self {
            ScriptKind::Extended(s) => s.options.rps,
            ScriptKind::Simple(s) => s.rps,
        }
    }

    pub fn set_rps(&mut self, rps: i64) {
        match self {
            ScriptKind::Extended(s) => s.options.rps = rps,
            ScriptKind::Simple(s) => s.rps = rps,
        }
    }

    pub fn script_url(&self) -> &str {
        match self {
            ScriptKind::Extended(s) => &s.script_file,
            ScriptKind::Simple(s) => &s.script_file_url,
        }
    }

    pub fn ammo_url(&self) -> &str {
        match self {
            ScriptKind::Extended(s) => &s.ammo_url,
            ScriptKind::Simple(s) => &s.ammo_url,
        }
    }

    pub fn duration(&self) -> &str {
        match self {
            ScriptKind::Extended(s) => &s.options.duration,
            ScriptKind::Simple(s) => &s.duration,
        }
    }

    pub fn steps(&self) -> i64 {
        match self {
            ScriptKind::Extended(s) => s.options.steps,
            ScriptKind::Simple(s) => s.steps,
        }
    }

    /// Base URL the script drives load against.
    pub fn api_url(&self) -> String {
        match self {
            ScriptKind::Extended(s) => s.base_url.clone(),
            ScriptKind::Simple(s) => format!("{}://{}", s.scheme, s.path),
        }
    }
}

/// One live instance of a script executing on one agent within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptRun {
    pub id: i64,
    pub run_id: i64,
    pub script: ScriptKind,
    pub status: ScriptRunStatus,
    /// RPS ceiling, fixed at creation. Adjustments change the effective
    /// RPS option on `script`, never this.
    pub target: i64,
    /// Agent-local process handle, -1 until started.
    pub pid: i64,
    pub agent: Option<Agent>,
    pub metrics: Metrics,
    pub info: String,
    pub log_file_name: String,
    pub api_port: String,
    pub prometheus_port: String,
}

impl ScriptRun {
    pub fn new(id: i64, run_id: i64, script: ScriptKind) -> Self {
        let target = script.rps();
        Self {
            id,
            run_id,
            script,
            status: ScriptRunStatus::Stopped,
            target,
            pid: -1,
            agent: None,
            metrics: Metrics::default(),
            info: String::new(),
            log_file_name: String::new(),
            api_port: String::new(),
            prometheus_port: String::new(),
        }
    }

    /// Append a note unless the same text was already recorded.
    pub fn note(&mut self, message: &str) {
        if message.is_empty() || self.info.contains(message) {
            return;
        }
        if self.info.is_empty() {
            self.info = format!("{message}; ");
        } else {
            self.info = format!("{}{message}; ", self.info);
        }
    }
}

/// One execution of a scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: i64,
    pub scenario_id: i64,
    pub project_id: i64,
    pub status: RunStatus,
    pub percentage_of_target: i32,
    pub title: String,
    pub info: String,
    pub script_runs: Vec<ScriptRun>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Run {
    pub fn new(id: i64, scenario_id: i64, project_id: i64, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            scenario_id,
            project_id,
            status: RunStatus::Prepared,
            percentage_of_target: 100,
            title: title.into(),
            info: String::new(),
            script_runs: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn running_script_count(&self) -> usize {
        self.script_runs
            .iter()
            .filter(|sr| sr.status == ScriptRunStatus::Running)
            .count()
    }

    /// Append to the free-text log, trimming to the trailing 20% once it
    /// grows past `limit`.
    pub fn note(&mut self, message: &str, limit: usize) {
        if message.is_empty() {
            return;
        }
        self.info.push_str(message);
        self.info.push(' ');
        if self.info.len() > limit {
            let keep = limit / 5;
            let cut = self.info.len() - keep;
            // Stay on a char boundary.
            let cut = (cut..self.info.len())
                .find(|i| self.info.is_char_boundary(*i))
                .unwrap_or(self.info.len());
            self.info = self.info.split_off(cut);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script(rps: i64) -> ScriptKind {
        ScriptKind::Extended(Script {
            id: 1,
            name: "checkout".into(),
            options: ScriptOptions {
                rps,
                ..ScriptOptions::default()
            },
            ..Script::default()
        })
    }

    #[test]
    fn target_is_fixed_at_creation() {
        let mut sr = ScriptRun::new(10, 1, script(200));
        assert_eq!(sr.target, 200);
        sr.script.set_rps(50);
        assert_eq!(sr.target, 200);
        assert_eq!(sr.script.rps(), 50);
    }

    #[test]
    fn note_deduplicates() {
        let mut sr = ScriptRun::new(10, 1, script(100));
        sr.note("agent unreachable");
        sr.note("agent unreachable");
        assert_eq!(sr.info.matches("agent unreachable").count(), 1);
    }

    #[test]
    fn run_info_is_trimmed_to_trailing_fifth() {
        let mut run = Run::new(1, 2, 3, "t");
        for _ in 0..100 {
            run.note("0123456789", 100);
        }
        assert!(run.info.len() <= 100 / 5 + 11);
    }

    #[test]
    fn simple_script_api_url_joins_scheme_and_path() {
        let kind = ScriptKind::Simple(SimpleScript {
            scheme: "https".into(),
            path: "shop.example.com/cart".into(),
            ..SimpleScript::default()
        });
        assert_eq!(kind.api_url(), "https://shop.example.com/cart");
    }
}
