//! In-memory implementations of the storage interfaces.
//!
//! Used as test doubles and by the embedded binary. The command store
//! honors the same lease contract as the SQLite implementation: the
//! whole select-and-claim runs under one lock, so it is atomic by
//! construction.

use async_trait::async_trait;
use chrono::Utc;
use stampede_core::{
    Agent, Command, CommandStatus, CommandType, Run, RunStatus, Script, ScriptRun, SimpleScript,
};
use stampede_interfaces::{
    AgentRepository, CommandStore, RunRepository, ScenarioRepository, StatsRecord, StatsSink,
    StorageError,
};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
struct CommandsInner {
    next_id: i64,
    rows: Vec<Command>,
}

/// In-memory command queue with the same semantics as the durable one.
#[derive(Default)]
pub struct InMemoryCommandStore {
    inner: Mutex<CommandsInner>,
    shared_host_pool: bool,
}

impl InMemoryCommandStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared_pool() -> Self {
        Self {
            inner: Mutex::default(),
            shared_host_pool: true,
        }
    }

    /// Snapshot of all rows, for assertions.
    pub fn rows(&self) -> Vec<Command> {
        lock(&self.inner).rows.clone()
    }

    /// Pending (Created) commands of one type for one run.
    pub fn pending_of_type(&self, run_id: i64, command_type: CommandType) -> Vec<Command> {
        lock(&self.inner)
            .rows
            .iter()
            .filter(|c| {
                c.run_id == run_id
                    && c.command_type == command_type
                    && c.status == CommandStatus::Created
            })
            .cloned()
            .collect()
    }
}

#[async_trait]
impl CommandStore for InMemoryCommandStore {
    async fn enqueue(&self, mut command: Command) -> Result<Command, StorageError> {
        let mut inner = lock(&self.inner);
        if command.command_type == CommandType::Update {
            inner.rows.retain(|c| {
                !(c.command_type == CommandType::Update
                    && c.run_id == command.run_id
                    && c.status == CommandStatus::Created)
            });
        }
        inner.next_id += 1;
        command.id = inner.next_id;
        command.status = CommandStatus::Created;
        let now = Utc::now();
        command.created_at = now;
        command.updated_at = now;
        inner.rows.push(command.clone());
        Ok(command)
    }

    async fn lease_next(&self, hostname: &str) -> Result<Option<Command>, StorageError> {
        let mut inner = lock(&self.inner);
        let candidate = inner
            .rows
            .iter_mut()
            .filter(|c| c.status == CommandStatus::Created)
            .filter(|c| self.shared_host_pool || c.hostname == hostname)
            .min_by_key(|c| (c.command_type.priority_rank(), c.id));

        Ok(candidate.map(|command| {
            command.status = CommandStatus::Processed;
            command.updated_at = Utc::now();
            command.clone()
        }))
    }

    async fn update_status(
        &self,
        command: &mut Command,
        status: CommandStatus,
        error_append: &str,
    ) -> Result<(), StorageError> {
        command.append_error(error_append);
        command.status = status;
        command.updated_at = Utc::now();

        let mut inner = lock(&self.inner);
        match inner.rows.iter_mut().find(|c| c.id == command.id) {
            Some(row) => {
                *row = command.clone();
                Ok(())
            }
            None => Err(StorageError::NotFound {
                entity: "command",
                id: command.id,
            }),
        }
    }

    async fn complete(&self, command: &Command) -> Result<bool, StorageError> {
        let mut inner = lock(&self.inner);
        if command.status == CommandStatus::Completed && command.error_description.is_empty() {
            inner.rows.retain(|c| c.id != command.id);
            return Ok(true);
        }
        if let Some(row) = inner.rows.iter_mut().find(|c| c.id == command.id) {
            *row = command.clone();
        }
        Ok(false)
    }

    async fn count_created(&self, hostname: &str) -> Result<u64, StorageError> {
        let inner = lock(&self.inner);
        Ok(inner
            .rows
            .iter()
            .filter(|c| c.status == CommandStatus::Created)
            .filter(|c| self.shared_host_pool || c.hostname == hostname)
            .count() as u64)
    }

    async fn delete_pending_updates(&self, run_id: i64) -> Result<u64, StorageError> {
        let mut inner = lock(&self.inner);
        let before = inner.rows.len();
        inner.rows.retain(|c| {
            !(c.command_type == CommandType::Update
                && c.run_id == run_id
                && c.status == CommandStatus::Created)
        });
        Ok((before - inner.rows.len()) as u64)
    }
}

/// In-memory run store.
#[derive(Default)]
pub struct InMemoryRunRepository {
    runs: Mutex<HashMap<i64, Run>>,
}

impl InMemoryRunRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_run(&self, run: Run) {
        lock(&self.runs).insert(run.id, run);
    }

    pub fn snapshot(&self, run_id: i64) -> Option<Run> {
        lock(&self.runs).get(&run_id).cloned()
    }
}

#[async_trait]
impl RunRepository for InMemoryRunRepository {
    async fn get_run(&self, run_id: i64) -> Result<Run, StorageError> {
        lock(&self.runs)
            .get(&run_id)
            .cloned()
            .ok_or(StorageError::NotFound {
                entity: "run",
                id: run_id,
            })
    }

    async fn update_run(&self, run: &Run) -> Result<(), StorageError> {
        let mut runs = lock(&self.runs);
        let mut stored = run.clone();
        stored.updated_at = Utc::now();
        runs.insert(run.id, stored);
        Ok(())
    }

    async fn update_script_run(
        &self,
        run_id: i64,
        script_run: &ScriptRun,
    ) -> Result<(), StorageError> {
        let mut runs = lock(&self.runs);
        let run = runs.get_mut(&run_id).ok_or(StorageError::NotFound {
            entity: "run",
            id: run_id,
        })?;
        match run.script_runs.iter_mut().find(|sr| sr.id == script_run.id) {
            Some(existing) => *existing = script_run.clone(),
            None => run.script_runs.push(script_run.clone()),
        }
        run.updated_at = Utc::now();
        Ok(())
    }

    async fn count_runs_by_status(&self, status: RunStatus) -> Result<u64, StorageError> {
        Ok(lock(&self.runs)
            .values()
            .filter(|r| r.status == status)
            .count() as u64)
    }

    async fn running_run_for_scenario(
        &self,
        scenario_id: i64,
    ) -> Result<Option<i64>, StorageError> {
        Ok(lock(&self.runs)
            .values()
            .find(|r| {
                r.scenario_id == scenario_id
                    && matches!(r.status, RunStatus::Running | RunStatus::Stopping)
            })
            .map(|r| r.id))
    }
}

#[derive(Default)]
struct ScenarioInner {
    titles: HashMap<i64, String>,
    scripts: Vec<Script>,
    simple_scripts: Vec<SimpleScript>,
}

/// In-memory scenario definitions.
#[derive(Default)]
pub struct InMemoryScenarioRepository {
    inner: Mutex<ScenarioInner>,
}

impl InMemoryScenarioRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_scenario(&self, scenario_id: i64, title: impl Into<String>) {
        lock(&self.inner).titles.insert(scenario_id, title.into());
    }

    pub fn insert_script(&self, script: Script) {
        lock(&self.inner).scripts.push(script);
    }

    pub fn insert_simple_script(&self, script: SimpleScript) {
        lock(&self.inner).simple_scripts.push(script);
    }
}

#[async_trait]
impl ScenarioRepository for InMemoryScenarioRepository {
    async fn scenario_title(&self, scenario_id: i64) -> Result<String, StorageError> {
        lock(&self.inner)
            .titles
            .get(&scenario_id)
            .cloned()
            .ok_or(StorageError::NotFound {
                entity: "scenario",
                id: scenario_id,
            })
    }

    async fn enabled_scripts(&self, scenario_id: i64) -> Result<Vec<Script>, StorageError> {
        Ok(lock(&self.inner)
            .scripts
            .iter()
            .filter(|s| s.scenario_id == scenario_id && s.enabled)
            .cloned()
            .collect())
    }

    async fn enabled_simple_scripts(
        &self,
        scenario_id: i64,
    ) -> Result<Vec<SimpleScript>, StorageError> {
        Ok(lock(&self.inner)
            .simple_scripts
            .iter()
            .filter(|s| s.scenario_id == scenario_id && s.enabled)
            .cloned()
            .collect())
    }

    async fn get_script(&self, script_id: i64) -> Result<Option<Script>, StorageError> {
        Ok(lock(&self.inner)
            .scripts
            .iter()
            .find(|s| s.id == script_id)
            .cloned())
    }

    async fn get_simple_script(
        &self,
        script_id: i64,
    ) -> Result<Option<SimpleScript>, StorageError> {
        Ok(lock(&self.inner)
            .simple_scripts
            .iter()
            .find(|s| s.id == script_id)
            .cloned())
    }
}

/// In-memory agent directory.
#[derive(Default)]
pub struct InMemoryAgentRepository {
    agents: Mutex<Vec<Agent>>,
}

impl InMemoryAgentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_agent(&self, agent: Agent) {
        lock(&self.agents).push(agent);
    }

    pub fn snapshot(&self) -> Vec<Agent> {
        lock(&self.agents).clone()
    }
}

#[async_trait]
impl AgentRepository for InMemoryAgentRepository {
    async fn enabled_agents(&self) -> Result<Vec<Agent>, StorageError> {
        let mut agents: Vec<Agent> = lock(&self.agents)
            .iter()
            .filter(|a| a.enabled)
            .cloned()
            .collect();
        agents.sort_by_key(|a| a.total_loading);
        Ok(agents)
    }

    async fn enabled_agents_by_tag(&self, tag: &str) -> Result<Vec<Agent>, StorageError> {
        let mut agents: Vec<Agent> = lock(&self.agents)
            .iter()
            .filter(|a| a.enabled && a.has_tag(tag))
            .cloned()
            .collect();
        agents.sort_by_key(|a| a.total_loading);
        Ok(agents)
    }

    async fn update_agent(&self, agent: &Agent) -> Result<(), StorageError> {
        let mut agents = lock(&self.agents);
        match agents.iter_mut().find(|a| a.id == agent.id) {
            Some(existing) => {
                *existing = agent.clone();
                Ok(())
            }
            None => Err(StorageError::NotFound {
                entity: "agent",
                id: agent.id,
            }),
        }
    }

    async fn known_tags(&self) -> Result<Vec<String>, StorageError> {
        let mut tags: Vec<String> = lock(&self.agents)
            .iter()
            .filter(|a| a.enabled)
            .flat_map(|a| a.tags.clone())
            .collect();
        tags.sort();
        tags.dedup();
        Ok(tags)
    }
}

#[derive(Default)]
struct StatsInner {
    next_dump_id: i64,
    dumps: HashMap<i64, Vec<StatsRecord>>,
}

/// In-memory statistics sink.
#[derive(Default)]
pub struct InMemoryStatsSink {
    inner: Mutex<StatsInner>,
}

impl InMemoryStatsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dump(&self, dump_id: i64) -> Option<Vec<StatsRecord>> {
        lock(&self.inner).dumps.get(&dump_id).cloned()
    }

    pub fn dump_count(&self) -> usize {
        lock(&self.inner).dumps.len()
    }
}

#[async_trait]
impl StatsSink for InMemoryStatsSink {
    async fn create_dump(&self) -> Result<i64, StorageError> {
        let mut inner = lock(&self.inner);
        inner.next_dump_id += 1;
        let id = inner.next_dump_id;
        inner.dumps.insert(id, Vec::new());
        Ok(id)
    }

    async fn put_statistic(&self, dump_id: i64, record: &StatsRecord) -> Result<(), StorageError> {
        let mut inner = lock(&self.inner);
        let dump = inner.dumps.get_mut(&dump_id).ok_or(StorageError::NotFound {
            entity: "statistic dump",
            id: dump_id,
        })?;
        dump.push(record.clone());
        Ok(())
    }

    async fn delete_dump(&self, dump_id: i64) -> Result<(), StorageError> {
        lock(&self.inner).dumps.remove(&dump_id);
        Ok(())
    }
}
