//! Update handler: the self-chaining observation cycle of a run.

use stampede_core::{Command, ExecutionStatus, RunStatus, ScriptRun, ScriptRunStatus};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::error::EngineError;
use crate::processor::ProcessorPool;

impl ProcessorPool {
    /// Refresh every running script run from its agent, then either
    /// re-issue the Update (run still alive) or turn the run down via
    /// StopScenario (nothing left running). Each invocation terminates:
    /// the observation loop persists only through the re-enqueued
    /// commands.
    pub(crate) async fn update_run(&self, command: &mut Command) -> Result<(), EngineError> {
        let mut run = self.runs.get_run(command.run_id).await?;

        let mut tasks = JoinSet::new();
        for script_run in run.script_runs.drain(..) {
            let pool = self.clone();
            tasks.spawn(async move {
                let mut script_run = script_run;
                pool.refresh_script_run(&mut script_run).await;
                script_run
            });
        }

        let mut script_runs = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(script_run) => script_runs.push(script_run),
                Err(err) => error!("script refresh task panicked: {err}"),
            }
        }
        script_runs.sort_by_key(|sr| sr.id);
        run.script_runs = script_runs;

        let running = run.running_script_count();
        info!(run_id = run.id, running, "run refreshed");

        if running < 1 {
            warn!(run_id = run.id, title = %run.title, "no running scripts left in the run");
            run.status = RunStatus::Stopping;
            self.commands
                .enqueue(Command::stop_scenario(run.id, &self.settings.hostname))
                .await?;
        }

        self.runs.update_run(&run).await?;

        match run.status {
            RunStatus::Running => {
                // Keep observing; enqueue replaces any pending Update.
                self.commands
                    .enqueue(Command::update(run.id, &self.settings.hostname))
                    .await?;
            }
            RunStatus::Stopping => {}
            other => {
                return Err(EngineError::Validation(format!(
                    "observation interrupted, run '{}' is {other}",
                    run.id
                )));
            }
        }

        self.finish_command(command).await
    }

    /// Fetch one script run's live status from its agent and merge the
    /// result. Status transitions: Running stays Running, "no such test
    /// run" means it ended, anything else is a failure recorded on the
    /// script run.
    pub(crate) async fn refresh_script_run(&self, script_run: &mut ScriptRun) {
        if script_run.status != ScriptRunStatus::Running {
            script_run.note(&format!("script run status is {}", script_run.status));
            return;
        }

        let Some(agent) = script_run.agent.clone() else {
            script_run.note("no agent recorded for a running script");
            script_run.status = ScriptRunStatus::Failed;
            return;
        };

        match self.control.status(&agent, script_run.pid).await {
            Ok(response) => {
                if let Some(wire) = response.metrics {
                    script_run.metrics.merge_sample(&wire.to_sample());

                    // Breaker: unbounded metric cardinality would melt
                    // the metrics backend, stop the offender.
                    if script_run.metrics.variety_ts > self.settings.max_series_per_script {
                        warn!(
                            script_run = script_run.id,
                            series = script_run.metrics.variety_ts,
                            ceiling = self.settings.max_series_per_script,
                            "metric series ceiling exceeded, force-stopping"
                        );
                        if let Err(stop_err) = self.control.stop(&agent, script_run.pid).await {
                            script_run.note(&format!(
                                "error force-stopping script run {}/{}: {stop_err}",
                                script_run.run_id, script_run.id
                            ));
                        }
                        script_run.metrics.execution_status = ExecutionStatus::Interrupted;
                        let guard = EngineError::OverflowGuard(format!(
                            "{} distinct metric series exceed the ceiling of {}, redefine the script's url and name fields",
                            script_run.metrics.variety_ts, self.settings.max_series_per_script
                        ));
                        script_run.note(&guard.to_string());
                    }
                }
            }
            Err(err) if err.is_no_such_run() => {
                script_run.status = ScriptRunStatus::Stopped;
                script_run
                    .metrics
                    .settle_execution_status(ExecutionStatus::Ended);
            }
            Err(err) => {
                let message = format!("error getting script run status: {err}");
                warn!(script_run = script_run.id, "{message}");
                script_run.note(&message);
                script_run.status = ScriptRunStatus::Failed;
            }
        }
    }
}
