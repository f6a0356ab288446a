//! End-to-end handler flows over in-memory stores and a fake agent
//! control plane.

use async_trait::async_trait;
use stampede_agent::types::{
    AllTasksResponse, StartRequest, StartResponse, StatusResponse, TaskInfo, Utilization,
    WireMetrics, STATUS_SUCCESS,
};
use stampede_agent::{AgentError, AgentSelector, ControlPlane};
use stampede_core::{
    Agent, Command, CommandStatus, CommandType, Run, RunStatus, Script, ScriptKind, ScriptRun,
    ScriptRunStatus,
};
use stampede_core::run::ScriptOptions;
use stampede_engine::{EngineSettings, LogAnnotationSink, ProcessorPool};
use stampede_interfaces::{AgentRepository, CommandStore, RunRepository, ScenarioRepository};
use stampede_storage::{
    InMemoryAgentRepository, InMemoryCommandStore, InMemoryRunRepository,
    InMemoryScenarioRepository,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct FakeState {
    next_pid: i64,
    started: Vec<StartRequest>,
    stopped: Vec<i64>,
    running: HashMap<i64, WireMetrics>,
}

/// Control plane fake: starting registers a pid, status answers from
/// the `running` map, stopping removes from it; an unknown pid is the
/// "no such test run" case.
#[derive(Default)]
struct FakeControlPlane {
    state: Mutex<FakeState>,
}

impl FakeControlPlane {
    fn with_running(pids: &[(i64, &str)]) -> Self {
        let fake = Self::default();
        {
            let mut state = fake.state.lock().unwrap();
            state.next_pid = 1000;
            for (pid, rps) in pids {
                state.running.insert(
                    *pid,
                    WireMetrics {
                        rps: rps.to_string(),
                        ..WireMetrics::default()
                    },
                );
            }
        }
        fake
    }

    fn started(&self) -> Vec<StartRequest> {
        self.state.lock().unwrap().started.clone()
    }

    fn stopped(&self) -> Vec<i64> {
        self.state.lock().unwrap().stopped.clone()
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn start(
        &self,
        _agent: &Agent,
        request: &StartRequest,
    ) -> Result<StartResponse, AgentError> {
        let mut state = self.state.lock().unwrap();
        state.next_pid += 1;
        let pid = state.next_pid;
        state.started.push(request.clone());
        state.running.insert(pid, WireMetrics::default());
        Ok(StartResponse {
            status: STATUS_SUCCESS.to_string(),
            error: String::new(),
            pid,
            task: Some(TaskInfo {
                pid,
                log_file_name: format!("{pid}.log"),
                k6_api_port: "6565".to_string(),
                port_prometheus: "9090".to_string(),
                ..TaskInfo::default()
            }),
        })
    }

    async fn stop(&self, _agent: &Agent, pid: i64) -> Result<(), AgentError> {
        let mut state = self.state.lock().unwrap();
        if state.running.remove(&pid).is_none() {
            return Err(AgentError::NoSuchTestRun);
        }
        state.stopped.push(pid);
        Ok(())
    }

    async fn status(&self, _agent: &Agent, pid: i64) -> Result<StatusResponse, AgentError> {
        let state = self.state.lock().unwrap();
        match state.running.get(&pid) {
            Some(metrics) => Ok(StatusResponse {
                status: STATUS_SUCCESS.to_string(),
                error: String::new(),
                task: Some(TaskInfo {
                    pid,
                    ..TaskInfo::default()
                }),
                metrics: Some(metrics.clone()),
            }),
            None => Err(AgentError::NoSuchTestRun),
        }
    }

    async fn all_tasks(&self, _agent: &Agent) -> Result<AllTasksResponse, AgentError> {
        let state = self.state.lock().unwrap();
        Ok(AllTasksResponse {
            status: STATUS_SUCCESS.to_string(),
            error: String::new(),
            tasks: state
                .running
                .keys()
                .map(|pid| {
                    (
                        *pid,
                        TaskInfo {
                            pid: *pid,
                            ..TaskInfo::default()
                        },
                    )
                })
                .collect(),
        })
    }

    async fn utilization(&self, _agent: &Agent) -> Result<Utilization, AgentError> {
        Ok(Utilization::default())
    }
}

struct Harness {
    commands: Arc<InMemoryCommandStore>,
    runs: Arc<InMemoryRunRepository>,
    scenarios: Arc<InMemoryScenarioRepository>,
    agents: Arc<InMemoryAgentRepository>,
    control: Arc<FakeControlPlane>,
    pool: ProcessorPool,
}

const HOST: &str = "proc-1";

fn harness(control: FakeControlPlane) -> Harness {
    let commands = Arc::new(InMemoryCommandStore::new());
    let runs = Arc::new(InMemoryRunRepository::new());
    let scenarios = Arc::new(InMemoryScenarioRepository::new());
    let agents = Arc::new(InMemoryAgentRepository::new());
    agents.insert_agent(Agent {
        id: 1,
        host_name: "gen-01".into(),
        port: 8888,
        tags: vec!["perf".into()],
        enabled: true,
        ..Agent::default()
    });
    let control = Arc::new(control);

    let selector = Arc::new(AgentSelector::new(
        Arc::clone(&agents) as Arc<dyn AgentRepository>,
        "perf",
    ));
    let settings = EngineSettings {
        hostname: HOST.into(),
        worker_count: 1,
        dispatch_capacity: 4,
        max_series_per_script: 100,
        run_info_limit: 4000,
        ui_base_url: "http://localhost:8080".into(),
    };
    let pool = ProcessorPool::new(
        Arc::clone(&commands) as Arc<dyn CommandStore>,
        Arc::clone(&runs) as Arc<dyn RunRepository>,
        Arc::clone(&scenarios) as Arc<dyn ScenarioRepository>,
        Arc::clone(&control) as Arc<dyn ControlPlane>,
        selector,
        Arc::new(LogAnnotationSink),
        settings,
    );

    Harness {
        commands,
        runs,
        scenarios,
        agents,
        control,
        pool,
    }
}

fn script(id: i64, scenario_id: i64, rps: i64) -> Script {
    Script {
        id,
        scenario_id,
        project_id: 1,
        name: format!("script-{id}"),
        tag: "perf".into(),
        script_file: format!("http://files/{id}.js"),
        enabled: true,
        options: ScriptOptions {
            rps,
            steps: 1,
            duration: "10m".into(),
            ..ScriptOptions::default()
        },
        ..Script::default()
    }
}

fn prepared_run(run_id: i64, scenario_id: i64, scripts: &[Script]) -> Run {
    let mut run = Run::new(run_id, scenario_id, 1, format!("run-{run_id}"));
    for (index, s) in scripts.iter().enumerate() {
        run.script_runs.push(ScriptRun::new(
            100 + index as i64,
            run_id,
            ScriptKind::Extended(s.clone()),
        ));
    }
    run
}

async fn lease(h: &Harness) -> Command {
    h.commands
        .lease_next(HOST)
        .await
        .unwrap()
        .expect("a leasable command")
}

#[tokio::test]
async fn run_scenario_starts_scripts_and_begins_observation() {
    let h = harness(FakeControlPlane::default());
    let scripts = [script(5, 10, 100), script(6, 10, 200)];
    h.scenarios.insert_scenario(10, "checkout");
    for s in &scripts {
        h.scenarios.insert_script(s.clone());
    }
    h.runs.insert_run(prepared_run(1, 10, &scripts));

    h.commands
        .enqueue(Command::run_scenario(1, 0, HOST))
        .await
        .unwrap();
    let cmd = lease(&h).await;
    h.pool.process(cmd).await;

    let run = h.runs.snapshot(1).unwrap();
    assert_eq!(run.status, RunStatus::Running);
    assert_eq!(run.percentage_of_target, 100);
    assert_eq!(run.running_script_count(), 2);
    for sr in &run.script_runs {
        assert!(sr.pid > 0);
        assert_eq!(sr.log_file_name, format!("{}.log", sr.pid));
    }

    // Observation is live: the self-chained Update is waiting.
    assert_eq!(h.commands.pending_of_type(1, CommandType::Update).len(), 1);
    assert_eq!(h.control.started().len(), 2);
}

#[tokio::test]
async fn update_with_everything_ended_turns_the_run_down() {
    // The fake knows no pids, so every status probe answers
    // "no such test run".
    let h = harness(FakeControlPlane::default());
    let scripts = [script(5, 10, 100)];
    h.scenarios.insert_scenario(10, "checkout");
    let mut run = prepared_run(1, 10, &scripts);
    run.status = RunStatus::Running;
    run.script_runs[0].status = ScriptRunStatus::Running;
    run.script_runs[0].pid = 4711;
    run.script_runs[0].agent = Some(Agent {
        id: 1,
        host_name: "gen-01".into(),
        port: 8888,
        enabled: true,
        ..Agent::default()
    });
    h.runs.insert_run(run);

    h.commands.enqueue(Command::update(1, HOST)).await.unwrap();
    let cmd = lease(&h).await;
    h.pool.process(cmd).await;

    let run = h.runs.snapshot(1).unwrap();
    assert_eq!(run.status, RunStatus::Stopping);
    assert_eq!(run.script_runs[0].status, ScriptRunStatus::Stopped);
    assert_eq!(
        h.commands.pending_of_type(1, CommandType::StopScenario).len(),
        1
    );
    // No further Update is chained for a stopping run.
    assert_eq!(h.commands.pending_of_type(1, CommandType::Update).len(), 0);

    // Processing the queued StopScenario finishes the run.
    let cmd = lease(&h).await;
    assert_eq!(cmd.command_type, CommandType::StopScenario);
    h.pool.process(cmd).await;
    let run = h.runs.snapshot(1).unwrap();
    assert_eq!(run.status, RunStatus::Stopped);
}

#[tokio::test]
async fn adjustment_halves_load_with_compensation() {
    // Target 100 rps, run at 100% with one full instance. Moving to
    // 50% stops the 100-rps instance and compensates with a fresh one
    // at 50%.
    let h = harness(FakeControlPlane::with_running(&[(4711, "100")]));
    let scripts = [script(5, 10, 100)];
    h.scenarios.insert_scenario(10, "checkout");
    h.scenarios.insert_script(scripts[0].clone());

    let mut run = prepared_run(1, 10, &scripts);
    run.status = RunStatus::Running;
    run.percentage_of_target = 100;
    run.script_runs[0].status = ScriptRunStatus::Running;
    run.script_runs[0].pid = 4711;
    run.script_runs[0].agent = Some(Agent {
        id: 1,
        host_name: "gen-01".into(),
        port: 8888,
        enabled: true,
        ..Agent::default()
    });
    h.runs.insert_run(run);

    h.commands
        .enqueue(Command::adjustment(1, 50, HOST))
        .await
        .unwrap();
    let cmd = lease(&h).await;
    h.pool.process(cmd).await;

    let run = h.runs.snapshot(1).unwrap();
    assert_eq!(run.percentage_of_target, 50);

    // The original instance was stopped on its agent...
    assert_eq!(h.control.stopped(), vec![4711]);
    let old = run.script_runs.iter().find(|sr| sr.id == 100).unwrap();
    assert_eq!(old.status, ScriptRunStatus::Stopped);

    // ...and one compensating instance runs at half the target.
    let started = h.control.started();
    assert_eq!(started.len(), 1);
    assert!(started[0].params.contains(&"RPS=50".to_string()));
    let fresh = run.script_runs.iter().find(|sr| sr.id != 100).unwrap();
    assert_eq!(fresh.status, ScriptRunStatus::Running);
    assert_eq!(fresh.script.rps(), 50);
    assert_eq!(fresh.target, 100);
    assert_eq!(run.running_script_count(), 1);
}

#[tokio::test]
async fn run_scenario_builds_script_runs_when_none_are_prepared() {
    let h = harness(FakeControlPlane::default());
    h.scenarios.insert_scenario(10, "checkout");
    h.scenarios.insert_script(script(5, 10, 100));
    h.scenarios.insert_script(script(6, 10, 200));
    // The run arrives without prepared script runs.
    h.runs.insert_run(Run::new(1, 10, 1, "run-1"));

    h.commands
        .enqueue(Command::run_scenario(1, 0, HOST))
        .await
        .unwrap();
    let cmd = lease(&h).await;
    h.pool.process(cmd).await;

    let run = h.runs.snapshot(1).unwrap();
    assert_eq!(run.status, RunStatus::Running);
    assert_eq!(run.script_runs.len(), 2);
    assert_eq!(run.running_script_count(), 2);
    // Target comes from each script's configured rps.
    let mut targets: Vec<i64> = run.script_runs.iter().map(|sr| sr.target).collect();
    targets.sort();
    assert_eq!(targets, vec![100, 200]);
}

#[tokio::test]
async fn run_scenario_rejects_a_second_active_run_of_the_scenario() {
    let h = harness(FakeControlPlane::default());
    let scripts = [script(5, 10, 100)];
    h.scenarios.insert_scenario(10, "checkout");
    let mut active = prepared_run(7, 10, &scripts);
    active.status = RunStatus::Running;
    h.runs.insert_run(active);
    h.runs.insert_run(prepared_run(8, 10, &scripts));

    h.commands
        .enqueue(Command::run_scenario(8, 0, HOST))
        .await
        .unwrap();
    let cmd = lease(&h).await;
    h.pool.process(cmd).await;

    let rows = h.commands.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, CommandStatus::Failed);
    assert!(rows[0].error_description.contains("already has an active run"));
    assert!(h.control.started().is_empty());
}

#[tokio::test]
async fn run_scenario_without_agents_for_the_tag_is_a_capacity_failure() {
    let h = harness(FakeControlPlane::default());
    let mut orphan = script(5, 10, 100);
    orphan.tag = "no-agents-here".into();
    h.scenarios.insert_scenario(10, "checkout");
    h.runs.insert_run(prepared_run(1, 10, &[orphan]));

    // The unknown tag falls back to the selector default; disable the
    // whole fleet so capacity is genuinely unavailable.
    for mut agent in h.agents.snapshot() {
        agent.enabled = false;
        h.agents.update_agent(&agent).await.unwrap();
    }

    h.commands
        .enqueue(Command::run_scenario(1, 0, HOST))
        .await
        .unwrap();
    let cmd = lease(&h).await;
    h.pool.process(cmd).await;

    let rows = h.commands.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, CommandStatus::Failed);
    assert!(rows[0].error_description.contains("no free agents"));
    assert!(h.control.started().is_empty());
}

#[tokio::test]
async fn adjustment_to_current_level_fails_fast() {
    let h = harness(FakeControlPlane::default());
    let scripts = [script(5, 10, 100)];
    h.scenarios.insert_scenario(10, "checkout");
    let mut run = prepared_run(1, 10, &scripts);
    run.status = RunStatus::Running;
    run.percentage_of_target = 100;
    h.runs.insert_run(run);

    h.commands
        .enqueue(Command::adjustment(1, 100, HOST))
        .await
        .unwrap();
    let cmd = lease(&h).await;
    h.pool.process(cmd).await;

    // The command is retained as Failed with an explanation; nothing
    // was started or stopped.
    let rows = h.commands.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, CommandStatus::Failed);
    assert!(rows[0].error_description.contains("already reached"));
    assert!(h.control.started().is_empty());
    assert!(h.control.stopped().is_empty());
}

#[tokio::test]
async fn stopping_a_stopped_script_run_stays_stopped() {
    let h = harness(FakeControlPlane::default());
    let scripts = [script(5, 10, 100)];
    h.scenarios.insert_scenario(10, "checkout");
    let mut run = prepared_run(1, 10, &scripts);
    run.status = RunStatus::Running;
    run.script_runs[0].status = ScriptRunStatus::Stopped;
    h.runs.insert_run(run);

    for _ in 0..2 {
        h.commands
            .enqueue(Command::stop_script(1, vec![100], HOST))
            .await
            .unwrap();
        let cmd = lease(&h).await;
        h.pool.process(cmd).await;

        let run = h.runs.snapshot(1).unwrap();
        assert_eq!(run.script_runs[0].status, ScriptRunStatus::Stopped);
        assert_eq!(run.status, RunStatus::Stopped);
    }

    // Both stop commands completed cleanly and were deleted.
    assert!(h.commands.rows().is_empty());
}

#[tokio::test]
async fn increase_command_type_is_rejected_as_unimplemented() {
    let h = harness(FakeControlPlane::default());
    let mut cmd = Command::run_scenario(1, 0, HOST);
    cmd.command_type = CommandType::Increase;
    let cmd = h.commands.enqueue(cmd).await.unwrap();
    let leased = lease(&h).await;
    assert_eq!(leased.id, cmd.id);
    h.pool.process(leased).await;

    let rows = h.commands.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, CommandStatus::Failed);
    assert!(rows[0].error_description.contains("not implemented"));
}
