//! Processor pool: workers routing commands to their handlers.

use std::sync::Arc;
use stampede_agent::{AgentSelector, ControlPlane};
use stampede_config::{AgentConfig, EngineConfig};
use stampede_core::{Command, CommandStatus, CommandType};
use stampede_interfaces::{
    AnnotationSink, CommandStore, RunRepository, ScenarioRepository,
};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::error::EngineError;

/// Engine tunables resolved at startup.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// This processor replica's identity in the command queue.
    pub hostname: String,
    pub worker_count: usize,
    pub dispatch_capacity: usize,
    pub max_series_per_script: i64,
    pub run_info_limit: usize,
    pub ui_base_url: String,
}

impl EngineSettings {
    pub fn from_config(engine: &EngineConfig, _agent: &AgentConfig, hostname: String) -> Self {
        Self {
            hostname,
            worker_count: engine.worker_count,
            dispatch_capacity: engine.dispatch_capacity,
            max_series_per_script: engine.max_series_per_script,
            run_info_limit: engine.run_info_limit,
            ui_base_url: engine.ui_base_url.clone(),
        }
    }
}

/// Routes leased commands to their state-machine handlers.
///
/// Every collaborator is injected; there is no global state. The pool is
/// cheap to clone so fan-out tasks can carry it across spawns.
#[derive(Clone)]
pub struct ProcessorPool {
    pub(crate) commands: Arc<dyn CommandStore>,
    pub(crate) runs: Arc<dyn RunRepository>,
    pub(crate) scenarios: Arc<dyn ScenarioRepository>,
    pub(crate) control: Arc<dyn ControlPlane>,
    pub(crate) selector: Arc<AgentSelector>,
    pub(crate) annotations: Arc<dyn AnnotationSink>,
    pub(crate) settings: EngineSettings,
}

impl ProcessorPool {
    pub fn new(
        commands: Arc<dyn CommandStore>,
        runs: Arc<dyn RunRepository>,
        scenarios: Arc<dyn ScenarioRepository>,
        control: Arc<dyn ControlPlane>,
        selector: Arc<AgentSelector>,
        annotations: Arc<dyn AnnotationSink>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            commands,
            runs,
            scenarios,
            control,
            selector,
            annotations,
            settings,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Spawn the worker tasks consuming the dispatch channel. Workers
    /// exit when the channel closes.
    pub fn spawn_workers(&self, dispatch: mpsc::Receiver<Command>) -> JoinSet<()> {
        let dispatch = Arc::new(Mutex::new(dispatch));
        let mut workers = JoinSet::new();

        for worker_id in 0..self.settings.worker_count {
            let pool = self.clone();
            let dispatch = Arc::clone(&dispatch);
            workers.spawn(async move {
                info!(worker_id, "processor worker started");
                loop {
                    let command = { dispatch.lock().await.recv().await };
                    let Some(command) = command else { break };
                    pool.process(command).await;
                }
                info!(worker_id, "processor worker stopped");
            });
        }

        workers
    }

    /// Handle one command inside the fault boundary: a failing handler
    /// marks its command Failed and never takes the worker (or sibling
    /// handlers) down with it.
    pub async fn process(&self, mut command: Command) {
        info!(
            id = command.id,
            command_type = %command.command_type,
            run_id = command.run_id,
            "processing command"
        );

        let result = match command.command_type {
            CommandType::RunScenario => self.run_scenario(&mut command).await,
            CommandType::StopScenario => self.stop_scenario(&mut command).await,
            CommandType::StopScript => self.stop_scripts(&mut command).await,
            CommandType::Adjustment => self.adjust_load(&mut command).await,
            CommandType::RunScript => self.run_scripts(&mut command).await,
            CommandType::RunSimpleScript => self.run_simple_scripts(&mut command).await,
            CommandType::Update => self.update_run(&mut command).await,
            CommandType::Increase => Err(EngineError::Validation(format!(
                "the command type '{}' is not implemented",
                command.command_type
            ))),
        };

        match result {
            Ok(()) => info!(
                id = command.id,
                command_type = %command.command_type,
                status = %command.status,
                "command handled"
            ),
            Err(err) => {
                if let Err(store_err) = self
                    .commands
                    .update_status(&mut command, CommandStatus::Failed, &err.to_string())
                    .await
                {
                    error!(
                        id = command.id,
                        "could not record command failure ({err}): {store_err}"
                    );
                }
            }
        }
    }

    /// Mark a command Completed and delete it when it finished cleanly.
    pub(crate) async fn finish_command(&self, command: &mut Command) -> Result<(), EngineError> {
        self.commands
            .update_status(command, CommandStatus::Completed, "")
            .await?;
        self.commands.complete(command).await?;
        Ok(())
    }

    pub(crate) fn run_link(&self, run_id: i64) -> String {
        format!("{}/runs/{run_id}", self.settings.ui_base_url)
    }
}
