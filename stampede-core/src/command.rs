//! Commands: durable, leasable units of orchestration work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error returned when a stored enum text does not match any variant.
#[derive(Debug, thiserror::Error)]
#[error("unknown {kind} value: '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

/// The kind of state transition a command requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    RunScenario,
    StopScenario,
    RunScript,
    StopScript,
    RunSimpleScript,
    Adjustment,
    Increase,
    Update,
}

impl CommandType {
    /// Dispatch priority, lower is served first. Stops always win over
    /// starts so an operator can abort a misbehaving run immediately;
    /// Update is the background filler.
    pub fn priority_rank(&self) -> u8 {
        match self {
            CommandType::StopScenario => 0,
            CommandType::StopScript => 1,
            CommandType::RunScript => 2,
            CommandType::RunSimpleScript => 3,
            CommandType::RunScenario => 4,
            CommandType::Adjustment => 5,
            CommandType::Increase => 6,
            CommandType::Update => 7,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandType::RunScenario => "run_scenario",
            CommandType::StopScenario => "stop_scenario",
            CommandType::RunScript => "run_script",
            CommandType::StopScript => "stop_script",
            CommandType::RunSimpleScript => "run_simple_script",
            CommandType::Adjustment => "adjustment",
            CommandType::Increase => "increase",
            CommandType::Update => "update",
        }
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "run_scenario" => Ok(CommandType::RunScenario),
            "stop_scenario" => Ok(CommandType::StopScenario),
            "run_script" => Ok(CommandType::RunScript),
            "stop_script" => Ok(CommandType::StopScript),
            "run_simple_script" => Ok(CommandType::RunSimpleScript),
            "adjustment" => Ok(CommandType::Adjustment),
            "increase" => Ok(CommandType::Increase),
            "update" => Ok(CommandType::Update),
            other => Err(ParseEnumError {
                kind: "command type",
                value: other.to_string(),
            }),
        }
    }
}

/// Whether a command targets the whole run or specific scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandScope {
    #[default]
    All,
    ById,
}

impl CommandScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandScope::All => "all",
            CommandScope::ById => "by_id",
        }
    }
}

impl FromStr for CommandScope {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(CommandScope::All),
            "by_id" => Ok(CommandScope::ById),
            other => Err(ParseEnumError {
                kind: "command scope",
                value: other.to_string(),
            }),
        }
    }
}

/// Lifecycle of a command row.
///
/// Created rows are leasable; Processed rows are claimed by exactly one
/// worker; Completed rows with no error text are deleted, everything
/// else is retained for diagnosis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Created,
    Processed,
    Completed,
    Failed,
}

impl CommandStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandStatus::Created => "created",
            CommandStatus::Processed => "processed",
            CommandStatus::Completed => "completed",
            CommandStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(CommandStatus::Created),
            "processed" => Ok(CommandStatus::Processed),
            "completed" => Ok(CommandStatus::Completed),
            "failed" => Ok(CommandStatus::Failed),
            other => Err(ParseEnumError {
                kind: "command status",
                value: other.to_string(),
            }),
        }
    }
}

/// A requested state transition for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    /// Store-assigned identity; 0 until enqueued.
    pub id: i64,
    pub command_type: CommandType,
    pub scope: CommandScope,
    pub run_id: i64,
    /// Targeted script (or script-run) ids when scope is ById.
    pub script_ids: Vec<i64>,
    /// Requested percentage of target RPS; 0 means "unspecified/full".
    pub percentage_of_target: Option<i32>,
    /// Raw RPS increase for Increase commands, -1 when unused.
    pub increase_rps: i32,
    pub status: CommandStatus,
    /// Accumulated diagnostic text, "; "-separated.
    pub error_description: String,
    /// Owning processor replica.
    pub hostname: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Command {
    fn new(
        command_type: CommandType,
        scope: CommandScope,
        run_id: i64,
        script_ids: Vec<i64>,
        percentage_of_target: i32,
        increase_rps: i32,
        hostname: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            command_type,
            scope,
            run_id,
            script_ids,
            percentage_of_target: Some(percentage_of_target),
            increase_rps,
            status: CommandStatus::Created,
            error_description: String::new(),
            hostname: hostname.into(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn run_scenario(run_id: i64, percentage_of_target: i32, hostname: impl Into<String>) -> Self {
        Self::new(
            CommandType::RunScenario,
            CommandScope::All,
            run_id,
            Vec::new(),
            percentage_of_target,
            -1,
            hostname,
        )
    }

    pub fn stop_scenario(run_id: i64, hostname: impl Into<String>) -> Self {
        Self::new(
            CommandType::StopScenario,
            CommandScope::All,
            run_id,
            Vec::new(),
            0,
            -1,
            hostname,
        )
    }

    pub fn run_script(
        run_id: i64,
        script_ids: Vec<i64>,
        percentage_of_target: i32,
        hostname: impl Into<String>,
    ) -> Self {
        Self::new(
            CommandType::RunScript,
            CommandScope::ById,
            run_id,
            script_ids,
            percentage_of_target,
            -1,
            hostname,
        )
    }

    pub fn run_simple_script(
        run_id: i64,
        script_ids: Vec<i64>,
        percentage_of_target: i32,
        hostname: impl Into<String>,
    ) -> Self {
        Self::new(
            CommandType::RunSimpleScript,
            CommandScope::ById,
            run_id,
            script_ids,
            percentage_of_target,
            -1,
            hostname,
        )
    }

    pub fn stop_script(run_id: i64, script_run_ids: Vec<i64>, hostname: impl Into<String>) -> Self {
        Self::new(
            CommandType::StopScript,
            CommandScope::ById,
            run_id,
            script_run_ids,
            0,
            -1,
            hostname,
        )
    }

    pub fn adjustment(run_id: i64, percentage_of_target: i32, hostname: impl Into<String>) -> Self {
        Self::new(
            CommandType::Adjustment,
            CommandScope::All,
            run_id,
            Vec::new(),
            percentage_of_target,
            -1,
            hostname,
        )
    }

    pub fn update(run_id: i64, hostname: impl Into<String>) -> Self {
        Self::new(
            CommandType::Update,
            CommandScope::All,
            run_id,
            Vec::new(),
            0,
            -1,
            hostname,
        )
    }

    /// Requested percentage, treating the unset/0 marker as absent.
    pub fn requested_percentage(&self) -> Option<i32> {
        match self.percentage_of_target {
            Some(0) | None => None,
            other => other,
        }
    }

    /// Append diagnostic text, keeping earlier entries.
    pub fn append_error(&mut self, message: &str) {
        if message.is_empty() {
            return;
        }
        if self.error_description.is_empty() {
            self.error_description = message.to_string();
        } else {
            self.error_description = format!("{}; {}", self.error_description, message);
        }
    }
}
