//! Load adjustment: move a running scenario to a new percentage of its
//! target throughput without restarting everything.

use stampede_core::{
    load::{percent_from_rps, rps_from_percent},
    Command, CommandStatus, RunStatus, ScriptKind, ScriptRunStatus,
};
use tracing::{info, warn};

use crate::error::EngineError;
use crate::processor::ProcessorPool;

/// One running script instance considered for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecreaseCandidate {
    pub script_run_id: i64,
    pub current_rps: i64,
}

/// Outcome of the greedy reduction for one script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecreasePlan {
    /// Script runs to stop, largest consumers first.
    pub stop_ids: Vec<i64>,
    /// RPS that must be re-added to avoid undershooting the target.
    pub resume_rps: i64,
}

/// Greedy largest-first removal: walk the candidates by descending RPS,
/// stopping instances until at least `decrease_on_rps` worth of load is
/// gone. Removing whole instances usually overshoots; the overshoot
/// comes back as `resume_rps` so the caller can compensate with one
/// fresh instance. Exhausting all candidates without covering the
/// decrease is an input inconsistency: the plan clamps `resume_rps` to
/// zero and the discrepancy is logged, never papered over.
pub fn plan_decrease(mut candidates: Vec<DecreaseCandidate>, decrease_on_rps: i64) -> DecreasePlan {
    candidates.sort_by(|a, b| b.current_rps.cmp(&a.current_rps));

    let mut stop_ids = Vec::new();
    let mut remaining = decrease_on_rps;
    for candidate in &candidates {
        stop_ids.push(candidate.script_run_id);
        remaining -= candidate.current_rps;
        if remaining <= 0 {
            break;
        }
    }

    if remaining > 0 {
        warn!(
            decrease_on_rps,
            short_by = remaining,
            "decrease algorithm could not reach the requested reduction from running capacity"
        );
        return DecreasePlan {
            stop_ids,
            resume_rps: 0,
        };
    }

    DecreasePlan {
        stop_ids,
        resume_rps: remaining.abs(),
    }
}

/// Which definition family a reduction pass works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScriptFamily {
    Extended,
    Simple,
}

impl ProcessorPool {
    /// Adjust a running scenario to `percentage_of_target`.
    pub(crate) async fn adjust_load(&self, command: &mut Command) -> Result<(), EngineError> {
        let target_pct = command.percentage_of_target.unwrap_or(0);
        info!(
            run_id = command.run_id,
            target_pct, "adjusting load level"
        );

        let run = self.runs.get_run(command.run_id).await?;
        if run.status != RunStatus::Running {
            return Err(EngineError::Validation(format!(
                "interruption due to incorrect status '{}' of run '{}'",
                run.status, run.id
            )));
        }

        let current_pct = run.percentage_of_target;
        if target_pct == current_pct {
            return Err(EngineError::Validation(format!(
                "the requested level of {target_pct}% for run '{}' is already reached",
                run.id
            )));
        }

        if target_pct == 0 {
            // Dropping to zero is a full stop.
            let mut stop = self
                .commands
                .enqueue(Command::stop_scenario(run.id, &self.settings.hostname))
                .await?;
            self.stop_scenario(&mut stop).await?;
        } else if target_pct > current_pct {
            self.raise_load(&run, target_pct - current_pct).await?;
        } else {
            let diff = current_pct - target_pct;
            self.reduce_family(command, diff, ScriptFamily::Extended)
                .await?;
            self.reduce_family(command, diff, ScriptFamily::Simple)
                .await?;
        }

        // Record the new level on the freshest run state.
        let mut run = self.runs.get_run(command.run_id).await?;
        run.percentage_of_target = target_pct;
        self.runs.update_run(&run).await?;

        self.finish_command(command).await
    }

    /// Increase: add incremental instances for every enabled script at
    /// the missing percentage; already-running instances are untouched.
    async fn raise_load(&self, run: &stampede_core::Run, diff_pct: i32) -> Result<(), EngineError> {
        info!(run_id = run.id, diff_pct, "raising load");

        let scripts = self.scenarios.enabled_scripts(run.scenario_id).await?;
        if !scripts.is_empty() {
            let ids = scripts.iter().map(|s| s.id).collect();
            let mut start = self
                .commands
                .enqueue(Command::run_script(
                    run.id,
                    ids,
                    diff_pct,
                    &self.settings.hostname,
                ))
                .await?;
            self.run_scripts(&mut start).await?;
        }

        let simple_scripts = self
            .scenarios
            .enabled_simple_scripts(run.scenario_id)
            .await?;
        if !simple_scripts.is_empty() {
            let ids = simple_scripts.iter().map(|s| s.id).collect();
            let mut start = self
                .commands
                .enqueue(Command::run_simple_script(
                    run.id,
                    ids,
                    diff_pct,
                    &self.settings.hostname,
                ))
                .await?;
            self.run_simple_scripts(&mut start).await?;
        }

        Ok(())
    }

    /// Decrease one definition family: per enabled script independently,
    /// plan the greedy removal, compensate the overshoot, then stop the
    /// planned instances in one batch.
    async fn reduce_family(
        &self,
        command: &mut Command,
        diff_pct: i32,
        family: ScriptFamily,
    ) -> Result<(), EngineError> {
        let mut run = self.runs.get_run(command.run_id).await?;

        // (script id, target rps, name) of every enabled definition.
        let entries: Vec<(i64, i64, String)> = match family {
            ScriptFamily::Extended => self
                .scenarios
                .enabled_scripts(run.scenario_id)
                .await?
                .into_iter()
                .map(|s| (s.id, s.options.rps, s.name))
                .collect(),
            ScriptFamily::Simple => self
                .scenarios
                .enabled_simple_scripts(run.scenario_id)
                .await?
                .into_iter()
                .map(|s| (s.id, s.rps, s.name))
                .collect(),
        };

        let mut all_stop_ids = Vec::new();

        for (script_id, target_rps, name) in entries {
            let candidates: Vec<DecreaseCandidate> = run
                .script_runs
                .iter()
                .filter(|sr| {
                    sr.status == ScriptRunStatus::Running
                        && sr.script.id() == script_id
                        && family_matches(&sr.script, family)
                })
                .map(|sr| DecreaseCandidate {
                    script_run_id: sr.id,
                    current_rps: sr.script.rps(),
                })
                .collect();

            if candidates.is_empty() {
                let message =
                    format!("no active script runs to decrease for script '{name}' ({script_id})");
                warn!(run_id = run.id, "{message}");
                self.commands
                    .update_status(command, CommandStatus::Processed, &message)
                    .await?;
                continue;
            }

            let decrease_on_rps = rps_from_percent(diff_pct, target_rps);
            let available_rps: i64 = candidates.iter().map(|c| c.current_rps).sum();
            let plan = plan_decrease(candidates, decrease_on_rps);
            if available_rps < decrease_on_rps {
                // Clamped by the planner; surface the discrepancy on the
                // command row instead of pretending success.
                let message = EngineError::AlgorithmInconsistency(format!(
                    "requested decrease of {decrease_on_rps} rps exceeds the {available_rps} rps running for script '{name}'"
                ))
                .to_string();
                self.commands
                    .update_status(command, CommandStatus::Processed, &message)
                    .await?;
            }
            info!(
                script_id,
                decrease_on_rps,
                stop_ids = ?plan.stop_ids,
                resume_rps = plan.resume_rps,
                "planned decrease"
            );

            // Compensate the overshoot before stopping anything, so the
            // delivered load never dips below the requested level.
            if plan.resume_rps > 0 {
                let resume_pct = percent_from_rps(plan.resume_rps, target_rps);
                let compensate = match family {
                    ScriptFamily::Extended => Command::run_script(
                        run.id,
                        vec![script_id],
                        resume_pct,
                        &self.settings.hostname,
                    ),
                    ScriptFamily::Simple => Command::run_simple_script(
                        run.id,
                        vec![script_id],
                        resume_pct,
                        &self.settings.hostname,
                    ),
                };
                let mut compensate = self.commands.enqueue(compensate).await?;
                let started = match family {
                    ScriptFamily::Extended => self.run_scripts(&mut compensate).await,
                    ScriptFamily::Simple => self.run_simple_scripts(&mut compensate).await,
                };
                if let Err(err) = started {
                    let message = format!("compensating start failed for '{name}': {err}");
                    self.commands
                        .update_status(command, CommandStatus::Failed, &message)
                        .await?;
                    continue;
                }
            }

            let run_id = run.id;
            for script_run in run
                .script_runs
                .iter_mut()
                .filter(|sr| plan.stop_ids.contains(&sr.id))
            {
                script_run.status = ScriptRunStatus::Stopping;
                self.runs.update_script_run(run_id, script_run).await?;
            }
            all_stop_ids.extend(plan.stop_ids);
        }

        if all_stop_ids.is_empty() {
            warn!(run_id = run.id, "nothing to stop in this family");
            return Ok(());
        }

        let mut stop = self
            .commands
            .enqueue(Command::stop_script(
                run.id,
                all_stop_ids,
                &self.settings.hostname,
            ))
            .await?;
        self.stop_scripts(&mut stop).await?;

        Ok(())
    }
}

fn family_matches(script: &ScriptKind, family: ScriptFamily) -> bool {
    match family {
        ScriptFamily::Extended => matches!(script, ScriptKind::Extended(_)),
        ScriptFamily::Simple => matches!(script, ScriptKind::Simple(_)),
    }
}
