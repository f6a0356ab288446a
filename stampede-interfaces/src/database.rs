//! Store and repository traits.

use async_trait::async_trait;
use stampede_core::{
    Agent, Command, CommandStatus, Run, RunStatus, Script, ScriptRun, SimpleScript,
};

/// Common storage error type shared by every implementation.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: i64 },

    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("connection error: {message}")]
    Connection { message: String },

    #[error("internal storage error: {message}")]
    Internal { message: String },
}

impl StorageError {
    pub fn internal(err: impl std::fmt::Display) -> Self {
        StorageError::Internal {
            message: err.to_string(),
        }
    }
}

/// The durable command queue.
///
/// Lease contract: `lease_next` returns at most one command per call and
/// no two concurrent callers ever observe the same row — the claim must
/// flip Created→Processed atomically with the row selection. Selection
/// follows [`stampede_core::CommandType::priority_rank`], FIFO by id
/// within a type, filtered to the caller's hostname unless the store was
/// configured as a shared pool.
#[async_trait]
pub trait CommandStore: Send + Sync {
    /// Insert a Created command, returning it with its assigned id.
    async fn enqueue(&self, command: Command) -> Result<Command, StorageError>;

    /// Atomically claim the next command for this host.
    async fn lease_next(&self, hostname: &str) -> Result<Option<Command>, StorageError>;

    /// Persist a status change, appending `error_append` (if non-empty)
    /// to the command's diagnostic text. Mirrors the change into `command`.
    async fn update_status(
        &self,
        command: &mut Command,
        status: CommandStatus,
        error_append: &str,
    ) -> Result<(), StorageError>;

    /// Finish a command: delete the row only when it completed cleanly
    /// (Completed and no error text); otherwise retain it for diagnosis.
    /// Returns whether the row was deleted.
    async fn complete(&self, command: &Command) -> Result<bool, StorageError>;

    /// Number of leasable (Created) commands for this host.
    async fn count_created(&self, hostname: &str) -> Result<u64, StorageError>;

    /// Drop un-leased Update commands for a run. Used both before
    /// re-enqueueing an Update (dedup) and when a run stops (queue
    /// cleanup). Returns how many rows were removed.
    async fn delete_pending_updates(&self, run_id: i64) -> Result<u64, StorageError>;
}

/// Runs and their script runs. Entity CRUD lives with the API layer;
/// the engine only reads and mutates what it is driving.
#[async_trait]
pub trait RunRepository: Send + Sync {
    async fn get_run(&self, run_id: i64) -> Result<Run, StorageError>;

    async fn update_run(&self, run: &Run) -> Result<(), StorageError>;

    /// Upsert one script run within its run.
    async fn update_script_run(&self, run_id: i64, script_run: &ScriptRun)
        -> Result<(), StorageError>;

    async fn count_runs_by_status(&self, status: RunStatus) -> Result<u64, StorageError>;

    /// Id of a run of this scenario that is still active (Running or
    /// Stopping), if any.
    async fn running_run_for_scenario(&self, scenario_id: i64)
        -> Result<Option<i64>, StorageError>;
}

/// Scenario definitions: enabled scripts and titles.
#[async_trait]
pub trait ScenarioRepository: Send + Sync {
    async fn scenario_title(&self, scenario_id: i64) -> Result<String, StorageError>;

    async fn enabled_scripts(&self, scenario_id: i64) -> Result<Vec<Script>, StorageError>;

    async fn enabled_simple_scripts(
        &self,
        scenario_id: i64,
    ) -> Result<Vec<SimpleScript>, StorageError>;

    async fn get_script(&self, script_id: i64) -> Result<Option<Script>, StorageError>;

    async fn get_simple_script(
        &self,
        script_id: i64,
    ) -> Result<Option<SimpleScript>, StorageError>;
}

/// The agent directory. The engine reads it for selection and the health
/// tracker writes utilization and availability back.
#[async_trait]
pub trait AgentRepository: Send + Sync {
    /// Enabled agents, ascending by utilization score.
    async fn enabled_agents(&self) -> Result<Vec<Agent>, StorageError>;

    /// Enabled agents carrying `tag`, ascending by utilization score.
    async fn enabled_agents_by_tag(&self, tag: &str) -> Result<Vec<Agent>, StorageError>;

    async fn update_agent(&self, agent: &Agent) -> Result<(), StorageError>;

    /// Distinct tags across enabled agents.
    async fn known_tags(&self) -> Result<Vec<String>, StorageError>;
}
