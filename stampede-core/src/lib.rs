//! Core domain model for the stampede load-test orchestrator.
//!
//! This crate holds the entities the orchestration engine operates on
//! (commands, runs, script runs, agents) and the pure load-math
//! primitives. It has no I/O and no async surface, which keeps the
//! state-machine logic in `stampede-engine` testable against plain
//! values.

pub mod agent;
pub mod command;
pub mod load;
pub mod metrics;
pub mod run;

pub use agent::Agent;
pub use command::{Command, CommandScope, CommandStatus, CommandType, ParseEnumError};
pub use load::{percent_from_rps, rps_from_percent, total_loading};
pub use metrics::{ExecutionStatus, Metrics, MetricsSample};
pub use run::{Run, RunStatus, Script, ScriptKind, ScriptRun, ScriptRunStatus, SimpleScript};
