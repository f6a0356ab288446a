//! Periodic agent health tracking.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stampede_core::{load::total_loading, Agent};
use stampede_interfaces::AgentRepository;
use stampede_resilience::{RetryExecutor, RetryPolicy};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::client::ControlPlane;

/// Sweeps the enabled fleet on a fixed cadence, refreshing utilization
/// and flipping availability. An agent that stays unreachable through
/// the retry policy is disabled; a single successful fetch re-enables it
/// immediately.
pub struct AgentHealthTracker {
    agents: Arc<dyn AgentRepository>,
    client: Arc<dyn ControlPlane>,
    interval: Duration,
    retry: RetryPolicy,
    is_running: AtomicBool,
}

impl AgentHealthTracker {
    pub fn new(
        agents: Arc<dyn AgentRepository>,
        client: Arc<dyn ControlPlane>,
        interval: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            agents,
            client,
            interval,
            retry,
            is_running: AtomicBool::new(false),
        }
    }

    /// Run the tracking loop until [`stop`](Self::stop) is called.
    pub async fn run(&self) {
        self.is_running.store(true, Ordering::Relaxed);
        info!(interval = ?self.interval, "agent health tracker started");

        let mut tick = tokio::time::interval(self.interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so startup order
        // does not race repository seeding.
        tick.tick().await;

        while self.is_running.load(Ordering::Relaxed) {
            tick.tick().await;
            self.sweep().await;
        }

        info!("agent health tracker stopped");
    }

    pub fn stop(&self) {
        self.is_running.store(false, Ordering::Relaxed);
    }

    /// One fan-out sweep over the enabled fleet.
    pub async fn sweep(&self) {
        let agents = match self.agents.enabled_agents().await {
            Ok(agents) => agents,
            Err(err) => {
                error!("health sweep could not list agents: {err}");
                return;
            }
        };
        debug!(count = agents.len(), "health sweep");

        let mut tasks = JoinSet::new();
        for agent in agents {
            let repo = Arc::clone(&self.agents);
            let client = Arc::clone(&self.client);
            let retry = self.retry.clone();
            tasks.spawn(async move {
                track_agent(repo, client, retry, agent).await;
            });
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                error!("health tracking task panicked: {err}");
            }
        }
    }
}

async fn track_agent(
    repo: Arc<dyn AgentRepository>,
    client: Arc<dyn ControlPlane>,
    retry: RetryPolicy,
    mut agent: Agent,
) {
    let executor = RetryExecutor::new(retry);
    let host = agent.host_name.clone();

    let fetched = executor
        .execute(|| {
            let client = Arc::clone(&client);
            let target = agent.clone();
            async move { client.utilization(&target).await }
        })
        .await;

    match fetched {
        Ok(utilization) => {
            agent.cpu_used = utilization.cpu_used;
            agent.mem_used = utilization.mem_used;
            agent.ports_used = utilization.ports_used;
            agent.total_loading =
                total_loading(agent.cpu_used, agent.mem_used, agent.ports_used);
            agent.enabled = true;
            debug!(agent = %host, loading = agent.total_loading, "utilization updated");
        }
        Err(err) => {
            warn!(agent = %host, "disabling agent after failed health checks: {err}");
            agent.enabled = false;
        }
    }

    if let Err(err) = repo.update_agent(&agent).await {
        error!(agent = %host, "failed to persist agent state: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use stampede_interfaces::StorageError;
    use std::sync::Mutex;

    struct RecordingAgents {
        agents: Mutex<Vec<Agent>>,
    }

    #[async_trait]
    impl AgentRepository for RecordingAgents {
        async fn enabled_agents(&self) -> Result<Vec<Agent>, StorageError> {
            Ok(self
                .agents
                .lock()
                .unwrap()
                .iter()
                .filter(|a| a.enabled)
                .cloned()
                .collect())
        }

        async fn enabled_agents_by_tag(&self, _tag: &str) -> Result<Vec<Agent>, StorageError> {
            self.enabled_agents().await
        }

        async fn update_agent(&self, agent: &Agent) -> Result<(), StorageError> {
            let mut agents = self.agents.lock().unwrap();
            if let Some(existing) = agents.iter_mut().find(|a| a.id == agent.id) {
                *existing = agent.clone();
            }
            Ok(())
        }

        async fn known_tags(&self) -> Result<Vec<String>, StorageError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn unreachable_agent_is_disabled_after_retries() {
        // Port 9 (discard) on a reserved host name: the connection fails
        // fast and deterministically.
        let agent = Agent {
            id: 1,
            host_name: "invalid.invalid".into(),
            port: 9,
            enabled: true,
            ..Agent::default()
        };
        let repo = Arc::new(RecordingAgents {
            agents: Mutex::new(vec![agent]),
        });
        let client = crate::client::AgentClient::new(Duration::from_millis(300)).unwrap();
        let tracker = AgentHealthTracker::new(
            Arc::clone(&repo) as Arc<dyn AgentRepository>,
            Arc::new(client),
            Duration::from_secs(60),
            RetryPolicy::linear(2, Duration::from_millis(1)),
        );

        tracker.sweep().await;

        let agents = repo.agents.lock().unwrap();
        assert!(!agents[0].enabled);
    }
}
