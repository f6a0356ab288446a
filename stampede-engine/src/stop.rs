//! Stop handlers: StopScript and StopScenario.

use stampede_core::{Command, CommandStatus, ExecutionStatus, RunStatus, ScriptRun, ScriptRunStatus};
use tracing::{info, warn};

use crate::error::EngineError;
use crate::processor::ProcessorPool;

impl ProcessorPool {
    /// Stop the targeted script runs; when nothing in the run is left
    /// running, the run itself goes to Stopped.
    pub(crate) async fn stop_scripts(&self, command: &mut Command) -> Result<(), EngineError> {
        self.commands
            .update_status(command, CommandStatus::Processed, "")
            .await?;
        info!(ids = ?command.script_ids, run_id = command.run_id, "stopping script runs");

        let mut run = self.runs.get_run(command.run_id).await?;
        let run_id = run.id;

        for target_id in command.script_ids.clone() {
            let Some(script_run) = run.script_runs.iter_mut().find(|sr| sr.id == target_id)
            else {
                warn!(script_run = target_id, run_id, "no such script run to stop");
                continue;
            };
            self.stop_script_run(script_run).await;
            self.runs.update_script_run(run_id, script_run).await?;
        }

        if run.running_script_count() == 0 {
            run.status = RunStatus::Stopped;
            info!(run_id = run.id, "run stopped");
        }
        self.runs.update_run(&run).await?;

        self.finish_command(command).await
    }

    /// Stop every script run of the run, best effort per script, then
    /// clean the pending Update backlog for it.
    pub(crate) async fn stop_scenario(&self, command: &mut Command) -> Result<(), EngineError> {
        self.commands
            .update_status(command, CommandStatus::Processed, "")
            .await?;

        let mut run = self.runs.get_run(command.run_id).await?;
        let link = self.run_link(run.id);

        if run.status != RunStatus::Stopped {
            for index in 0..run.script_runs.len() {
                let mut script_run = run.script_runs[index].clone();
                self.stop_script_run(&mut script_run).await;
                self.runs.update_script_run(run.id, &script_run).await?;
                run.script_runs[index] = script_run;
            }

            let still_running = run.running_script_count();
            if still_running == 0 {
                run.status = RunStatus::Stopped;
                info!(run_id = run.id, "run stopped");
            } else {
                let message = format!("{still_running} script runs still running");
                warn!(run_id = run.id, "{message}");
                run.note(&message, self.settings.run_info_limit);
            }
            self.runs.update_run(&run).await?;
        }

        self.annotations.dec(&run.title, run.id, &link);

        // A stopped run needs no more observation.
        let removed = self.commands.delete_pending_updates(run.id).await?;
        if removed > 0 {
            info!(run_id = run.id, removed, "dropped pending update commands");
        }

        self.finish_command(command).await
    }

    /// Stop one script run on its agent. "No such test run" means the
    /// process already ended and is not an error; stopping an
    /// already-stopped run is a no-op.
    pub(crate) async fn stop_script_run(&self, script_run: &mut ScriptRun) {
        if let Some(agent) = script_run.agent.clone() {
            if script_run.pid >= 0 {
                match self.control.stop(&agent, script_run.pid).await {
                    Ok(()) => {
                        script_run
                            .metrics
                            .settle_execution_status(ExecutionStatus::Teardown);
                    }
                    Err(err) if err.is_no_such_run() => {
                        warn!(
                            script_run = script_run.id,
                            "stop: test run already gone on agent"
                        );
                        script_run
                            .metrics
                            .settle_execution_status(ExecutionStatus::Ended);
                    }
                    Err(err) => {
                        let message = format!("stop request failed: {err}");
                        warn!(script_run = script_run.id, "{message}");
                        script_run.note(&message);
                        script_run.metrics.execution_status = ExecutionStatus::Interrupted;
                    }
                }
            }
        }

        script_run.status = ScriptRunStatus::Stopped;
    }
}
