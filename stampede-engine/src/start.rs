//! Start handlers: RunScenario, RunScript, RunSimpleScript.

use rand::Rng;
use stampede_agent::types::StartRequest;
use stampede_core::{
    load::rps_from_percent, Command, CommandStatus, Run, RunStatus, ScriptKind, ScriptRun,
    ScriptRunStatus,
};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::EngineError;
use crate::processor::ProcessorPool;

impl ProcessorPool {
    /// Start every prepared script run of a run, fan-out with a join
    /// barrier, then begin observation by enqueueing the first Update.
    pub(crate) async fn run_scenario(&self, command: &mut Command) -> Result<(), EngineError> {
        self.commands
            .update_status(command, CommandStatus::Processed, "")
            .await?;

        let mut run = self.runs.get_run(command.run_id).await?;
        let link = self.run_link(run.id);
        self.annotations.inc(&run.title, run.id, &link);

        let pct = command.percentage_of_target.unwrap_or(0);

        // A scenario runs at most once at a time.
        if let Some(other) = self.runs.running_run_for_scenario(run.scenario_id).await? {
            if other != run.id {
                let message = format!(
                    "scenario '{}' already has an active run '{other}'",
                    run.scenario_id
                );
                self.annotations.dec(&run.title, run.id, &link);
                return Err(EngineError::Validation(message));
            }
        }

        if run.script_runs.is_empty() {
            self.prepare_script_runs(&mut run).await?;
        }

        if run.script_runs.is_empty() {
            let message = format!(
                "there are no scripts to run. title:'{}' run:'{}'",
                run.title, run.id
            );
            run.note(&message, self.settings.run_info_limit);
            run.status = RunStatus::Stopped;
            run.percentage_of_target = pct;
            self.runs.update_run(&run).await?;
            self.annotations.dec(&run.title, run.id, &link);
            return Err(EngineError::Validation(message));
        }

        // Every tag in the run must have at least one available agent
        // before anything is started.
        let mut tags: Vec<String> = run
            .script_runs
            .iter()
            .map(|sr| sr.script.tag().to_string())
            .collect();
        tags.sort();
        tags.dedup();
        for tag in &tags {
            if let Err(err) = self.selector.ensure_capacity(tag).await {
                self.annotations.dec(&run.title, run.id, &link);
                return Err(err.into());
            }
        }

        let title = run.title.clone();
        let mut tasks = JoinSet::new();
        for script_run in run.script_runs.drain(..) {
            let pool = self.clone();
            let title = title.clone();
            tasks.spawn(async move {
                let mut script_run = script_run;
                if let Err(err) = pool.launch_script_run(&mut script_run, &title, pct).await {
                    warn!(script_run = script_run.id, "script start failed: {err}");
                }
                if let Err(err) = pool
                    .runs
                    .update_script_run(script_run.run_id, &script_run)
                    .await
                {
                    error!(script_run = script_run.id, "persisting script run failed: {err}");
                }
                script_run
            });
        }

        let mut script_runs = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(script_run) => script_runs.push(script_run),
                Err(err) => error!("script start task panicked: {err}"),
            }
        }
        script_runs.sort_by_key(|sr| sr.id);
        run.script_runs = script_runs;

        // The run counts as running as soon as one script made it.
        if run.running_script_count() > 0 {
            run.status = RunStatus::Running;
            run.percentage_of_target = if pct == 0 { 100 } else { pct };
        } else {
            run.status = RunStatus::Stopped;
            run.note("no scripts running", self.settings.run_info_limit);
        }
        self.runs.update_run(&run).await?;

        if run.status != RunStatus::Running {
            self.annotations.dec(&run.title, run.id, &link);
            return Err(EngineError::TransientAgent(
                "no script run reached the running state".to_string(),
            ));
        }

        info!(run_id = run.id, "scenario is running, starting observation");
        let mut update = self
            .commands
            .enqueue(Command::update(run.id, &self.settings.hostname))
            .await?;
        // Claim it the way the provider's lease would, so the chained
        // re-enqueue inside update_run cannot dedup it away mid-flight.
        self.commands
            .update_status(&mut update, CommandStatus::Processed, "")
            .await?;

        self.finish_command(command).await?;

        // First observation happens as part of scenario start; the loop
        // then lives on through the re-enqueued Update commands.
        if let Err(err) = self.update_run(&mut update).await {
            warn!(run_id = run.id, "initial update failed: {err}");
            if let Err(store_err) = self
                .commands
                .update_status(&mut update, CommandStatus::Failed, &err.to_string())
                .await
            {
                error!(run_id = run.id, "recording initial update failure failed: {store_err}");
            }
        }

        Ok(())
    }

    /// Build one prepared script run per enabled script of the
    /// scenario, each with Target fixed to the script's configured RPS.
    async fn prepare_script_runs(&self, run: &mut Run) -> Result<(), EngineError> {
        for script in self.scenarios.enabled_scripts(run.scenario_id).await? {
            run.script_runs.push(ScriptRun::new(
                random_script_run_id(),
                run.id,
                ScriptKind::Extended(script),
            ));
        }
        for script in self
            .scenarios
            .enabled_simple_scripts(run.scenario_id)
            .await?
        {
            run.script_runs.push(ScriptRun::new(
                random_script_run_id(),
                run.id,
                ScriptKind::Simple(script),
            ));
        }

        if !run.script_runs.is_empty() {
            run.status = RunStatus::Prepared;
            self.runs.update_run(run).await?;
        }
        Ok(())
    }

    /// Start fresh script runs for specific extended scripts.
    pub(crate) async fn run_scripts(&self, command: &mut Command) -> Result<(), EngineError> {
        self.commands
            .update_status(command, CommandStatus::Processed, "")
            .await?;
        info!(
            ids = ?command.script_ids,
            pct = command.percentage_of_target,
            "starting scripts"
        );

        let run = self.runs.get_run(command.run_id).await?;
        let title = self.scenarios.scenario_title(run.scenario_id).await?;
        let pct = command.percentage_of_target.unwrap_or(0);

        for script_id in command.script_ids.clone() {
            let Some(script) = self.scenarios.get_script(script_id).await? else {
                let message = format!("script '{script_id}' not found");
                warn!("{message}");
                self.commands
                    .update_status(command, CommandStatus::Processed, &message)
                    .await?;
                continue;
            };

            let mut script_run = ScriptRun::new(
                random_script_run_id(),
                command.run_id,
                ScriptKind::Extended(script),
            );
            if let Err(err) = self.launch_script_run(&mut script_run, &title, pct).await {
                self.commands
                    .update_status(command, CommandStatus::Failed, &err.to_string())
                    .await?;
            }
            self.runs
                .update_script_run(command.run_id, &script_run)
                .await?;
        }

        self.finish_command(command).await
    }

    /// Start fresh script runs for specific simple scripts.
    pub(crate) async fn run_simple_scripts(&self, command: &mut Command) -> Result<(), EngineError> {
        self.commands
            .update_status(command, CommandStatus::Processed, "")
            .await?;
        info!(
            ids = ?command.script_ids,
            pct = command.percentage_of_target,
            "starting simple scripts"
        );

        let run = self.runs.get_run(command.run_id).await?;
        let title = self.scenarios.scenario_title(run.scenario_id).await?;
        let pct = command.percentage_of_target.unwrap_or(0);

        for script_id in command.script_ids.clone() {
            let Some(script) = self.scenarios.get_simple_script(script_id).await? else {
                let message = format!("simple script '{script_id}' not found");
                warn!("{message}");
                self.commands
                    .update_status(command, CommandStatus::Processed, &message)
                    .await?;
                continue;
            };

            let mut script_run = ScriptRun::new(
                random_script_run_id(),
                command.run_id,
                ScriptKind::Simple(script),
            );
            if let Err(err) = self.launch_script_run(&mut script_run, &title, pct).await {
                self.commands
                    .update_status(command, CommandStatus::Failed, &err.to_string())
                    .await?;
            }
            self.runs
                .update_script_run(command.run_id, &script_run)
                .await?;
        }

        self.finish_command(command).await
    }

    /// Pick an agent and start one script run on it. Failures are
    /// recorded on the script run's info field as well as returned, so
    /// sibling starts keep going either way.
    pub(crate) async fn launch_script_run(
        &self,
        script_run: &mut ScriptRun,
        scenario_title: &str,
        pct: i32,
    ) -> Result<(), EngineError> {
        if pct != 0 {
            let adjusted = rps_from_percent(pct, script_run.target);
            debug!(
                script_run = script_run.id,
                pct, adjusted, "adjusting effective rps before start"
            );
            script_run.script.set_rps(adjusted);
        }

        let agent = match self.selector.pick_free_agent(script_run.script.tag()).await {
            Ok(agent) => agent,
            Err(err) => {
                script_run.note(&err.to_string());
                return Err(err.into());
            }
        };

        let request = build_start_request(script_run, scenario_title);
        let response = match self.control.start(&agent, &request).await {
            Ok(response) => response,
            Err(err) => {
                let message = format!(
                    "execute start request failed for script '{}': {err}",
                    script_run.script.name()
                );
                script_run.note(&message);
                return Err(EngineError::TransientAgent(message));
            }
        };

        script_run.agent = Some(agent);
        script_run.pid = response.pid;
        match response.task {
            Some(task) => {
                script_run.log_file_name = task.log_file_name;
                script_run.api_port = task.k6_api_port;
                script_run.prometheus_port = task.port_prometheus;
            }
            None => {
                let message = format!("start response carried no task (pid {})", response.pid);
                script_run.note(&message);
                script_run.status = ScriptRunStatus::Failed;
                return Err(EngineError::TransientAgent(message));
            }
        }

        script_run.status = ScriptRunStatus::Running;
        info!(
            script_run = script_run.id,
            pid = script_run.pid,
            script = script_run.script.name(),
            "script run started"
        );
        Ok(())
    }
}

fn build_start_request(script_run: &ScriptRun, scenario_title: &str) -> StartRequest {
    let script = &script_run.script;
    StartRequest {
        scenario_title: scenario_title.to_string(),
        script_title: script.name().to_string(),
        script_url: script.script_url().to_string(),
        ammo_url: script.ammo_url().to_string(),
        params: vec![
            "-e".to_string(),
            format!("RPS={}", script.rps()),
            "-e".to_string(),
            format!("DURATION={}", script.duration()),
            "-e".to_string(),
            format!("STEPS={}", script.steps()),
        ],
    }
}

fn random_script_run_id() -> i64 {
    rand::thread_rng().gen_range(1..100_000_000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stampede_core::run::{Script, ScriptOptions};

    #[test]
    fn start_request_carries_effective_rps() {
        let script = ScriptKind::Extended(Script {
            id: 1,
            name: "cart".into(),
            script_file: "http://files/cart.js".into(),
            ammo_url: "http://files/ammo.json".into(),
            options: ScriptOptions {
                rps: 75,
                steps: 3,
                duration: "10m".into(),
                ..ScriptOptions::default()
            },
            ..Script::default()
        });
        let script_run = ScriptRun::new(9, 1, script);
        let request = build_start_request(&script_run, "checkout");
        assert_eq!(request.scenario_title, "checkout");
        assert!(request.params.contains(&"RPS=75".to_string()));
        assert!(request.params.contains(&"DURATION=10m".to_string()));
    }

    #[test]
    fn random_ids_are_positive_and_bounded() {
        for _ in 0..100 {
            let id = random_script_run_id();
            assert!(id >= 1 && id < 100_000_000);
        }
    }
}
