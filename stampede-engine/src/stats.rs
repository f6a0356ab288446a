//! Statistics collector: periodic fan-out over the fleet aggregating
//! live task metrics into durable dumps.
//!
//! Reuses the agent control plane but takes no part in the run state
//! machine; a tick with no running scenarios collects nothing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stampede_agent::ControlPlane;
use stampede_core::{Agent, MetricsSample, RunStatus};
use stampede_interfaces::{AgentRepository, RunRepository, StatsRecord, StatsSink};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

pub struct StatisticsCollector {
    runs: Arc<dyn RunRepository>,
    agents: Arc<dyn AgentRepository>,
    control: Arc<dyn ControlPlane>,
    sink: Arc<dyn StatsSink>,
    interval: Duration,
    is_running: AtomicBool,
}

impl StatisticsCollector {
    pub fn new(
        runs: Arc<dyn RunRepository>,
        agents: Arc<dyn AgentRepository>,
        control: Arc<dyn ControlPlane>,
        sink: Arc<dyn StatsSink>,
        interval: Duration,
    ) -> Self {
        Self {
            runs,
            agents,
            control,
            sink,
            interval,
            is_running: AtomicBool::new(false),
        }
    }

    pub async fn run(&self) {
        self.is_running.store(true, Ordering::Relaxed);
        info!(interval = ?self.interval, "statistics collector started");

        let mut tick = tokio::time::interval(self.interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tick.tick().await;

        while self.is_running.load(Ordering::Relaxed) {
            tick.tick().await;

            let running = match self.runs.count_runs_by_status(RunStatus::Running).await {
                Ok(count) => count,
                Err(err) => {
                    warn!("could not count running scenarios: {err}");
                    continue;
                }
            };
            if running == 0 {
                debug!("no running scenarios, skipping collection");
                continue;
            }

            info!(running, "running scenarios found, collecting statistics");
            self.collect().await;
        }

        info!("statistics collector stopped");
    }

    pub fn stop(&self) {
        self.is_running.store(false, Ordering::Relaxed);
    }

    /// One collection pass: fan out over the enabled fleet, aggregate
    /// per pid, persist the dump (or discard it when empty).
    pub async fn collect(&self) {
        let dump_id = match self.sink.create_dump().await {
            Ok(id) => id,
            Err(err) => {
                error!("creating statistics dump failed: {err}");
                return;
            }
        };

        let agents = match self.agents.enabled_agents().await {
            Ok(agents) => agents,
            Err(err) => {
                error!(dump_id, "listing agents failed: {err}");
                return;
            }
        };
        debug!(dump_id, agents = agents.len(), "collecting dump");

        let aggregate: Arc<Mutex<HashMap<i64, StatsRecord>>> = Arc::new(Mutex::new(HashMap::new()));
        let mut tasks = JoinSet::new();
        for agent in agents {
            let control = Arc::clone(&self.control);
            let aggregate = Arc::clone(&aggregate);
            tasks.spawn(async move {
                collect_from_agent(control, agent, aggregate).await;
            });
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                error!(dump_id, "statistics task panicked: {err}");
            }
        }

        let records: Vec<StatsRecord> = {
            let aggregate = aggregate.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            aggregate.values().cloned().collect()
        };

        if records.is_empty() {
            info!(dump_id, "statistics have no data to save");
            if let Err(err) = self.sink.delete_dump(dump_id).await {
                error!(dump_id, "deleting empty dump failed: {err}");
            }
            return;
        }

        info!(dump_id, records = records.len(), "saving collected statistics");
        for record in &records {
            if let Err(err) = self.sink.put_statistic(dump_id, record).await {
                error!(dump_id, pid = record.pid, "saving statistic failed: {err}");
            }
        }
    }
}

async fn collect_from_agent(
    control: Arc<dyn ControlPlane>,
    agent: Agent,
    aggregate: Arc<Mutex<HashMap<i64, StatsRecord>>>,
) {
    let tasks = match control.all_tasks(&agent).await {
        Ok(response) => response.tasks,
        Err(err) => {
            warn!(agent = %agent.host_name, "getAllTasks failed: {err}");
            return;
        }
    };

    for pid in tasks.keys().copied() {
        let status = match control.status(&agent, pid).await {
            Ok(status) => status,
            Err(err) => {
                warn!(agent = %agent.host_name, pid, "getStatus failed: {err}");
                continue;
            }
        };
        let Some(metrics) = status.metrics else {
            continue;
        };
        let sample = metrics.to_sample();

        let mut aggregate = aggregate.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let record = aggregate.entry(pid).or_insert_with(|| StatsRecord {
            pid,
            ..StatsRecord::default()
        });
        merge_record(record, &sample, &agent.host_name);
    }
}

/// Percentiles take the max seen, throughput counters accumulate, and
/// every contributing agent is listed once.
fn merge_record(record: &mut StatsRecord, sample: &MetricsSample, agent_host: &str) {
    record.rps += sample.rps;
    record.vus += sample.vus;
    record.failed += sample.failed;
    record.data_sent += sample.sent;
    record.data_received += sample.received;
    record.rt90p = record.rt90p.max(sample.rt90p);
    record.rt95p = record.rt95p.max(sample.rt95p);
    record.rt99p = record.rt99p.max(sample.rt99p);
    record.rt_max = record.rt_max.max(sample.rt_max);
    if !record.agents.iter().any(|a| a == agent_host) {
        record.agents.push(agent_host.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_accumulates_and_tracks_agents_once() {
        let mut record = StatsRecord {
            pid: 42,
            ..StatsRecord::default()
        };
        let sample = MetricsSample {
            rps: 10,
            rt95p: 200,
            vus: 4,
            sent: 100,
            received: 300,
            ..MetricsSample::default()
        };
        merge_record(&mut record, &sample, "gen-01");
        merge_record(&mut record, &sample, "gen-01");

        assert_eq!(record.rps, 20);
        assert_eq!(record.rt95p, 200);
        assert_eq!(record.vus, 8);
        assert_eq!(record.agents, vec!["gen-01".to_string()]);
    }
}
