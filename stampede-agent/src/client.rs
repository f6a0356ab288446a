//! HTTP client for the agent control plane.

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use stampede_core::Agent;
use tracing::debug;

use crate::error::AgentError;
use crate::types::{
    AllTasksResponse, PidRequest, StartRequest, StartResponse, StatusResponse, StopResponse,
    UtilizationResponse, Utilization, STATUS_ERROR,
};

/// Client for one fleet of agents. Cheap to clone; every call is bounded
/// by the configured per-call timeout so a stuck agent cannot hold a
/// handler hostage.
#[derive(Debug, Clone)]
pub struct AgentClient {
    http: Client,
    call_timeout: Duration,
}

impl AgentClient {
    pub fn new(call_timeout: Duration) -> Result<Self, AgentError> {
        let http = Client::builder().timeout(call_timeout).build()?;
        Ok(Self { http, call_timeout })
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Start a script on the agent.
    pub async fn start(
        &self,
        agent: &Agent,
        request: &StartRequest,
    ) -> Result<StartResponse, AgentError> {
        debug!(agent = %agent.host_name, script = %request.script_title, "agent start");
        let response: StartResponse = self
            .post_json(format!("{}/api/v1/start", agent.base_url()), request)
            .await?;
        Self::check_body(&response.status, &response.error)?;
        Ok(response)
    }

    /// Stop a running pid on the agent.
    pub async fn stop(&self, agent: &Agent, pid: i64) -> Result<(), AgentError> {
        debug!(agent = %agent.host_name, pid, "agent stop");
        let response: StopResponse = self
            .post_json(format!("{}/api/v1/stop", agent.base_url()), &PidRequest { pid })
            .await?;
        Self::check_body(&response.status, &response.error)
    }

    /// Fetch live status and metrics of a pid.
    pub async fn status(&self, agent: &Agent, pid: i64) -> Result<StatusResponse, AgentError> {
        let response: StatusResponse = self
            .post_json(
                format!("{}/api/v1/getStatus", agent.base_url()),
                &PidRequest { pid },
            )
            .await?;
        Self::check_body(&response.status, &response.error)?;
        Ok(response)
    }

    /// Every task the agent currently runs, keyed by pid.
    pub async fn all_tasks(&self, agent: &Agent) -> Result<AllTasksResponse, AgentError> {
        let response: AllTasksResponse = self
            .get_json(format!("{}/api/v1/getAllTasks", agent.base_url()))
            .await?;
        Self::check_body(&response.status, &response.error)?;
        Ok(response)
    }

    /// Host utilization (CPU/mem/port percentages).
    pub async fn utilization(&self, agent: &Agent) -> Result<Utilization, AgentError> {
        let response: UtilizationResponse = self
            .get_json(format!("{}/api/v1/metrics", agent.base_url()))
            .await?;
        Self::check_body(&response.status, &response.error)?;
        Ok(response.agent_utilization)
    }

    async fn post_json<Rq, Rs>(&self, url: String, body: &Rq) -> Result<Rs, AgentError>
    where
        Rq: Serialize + ?Sized,
        Rs: DeserializeOwned,
    {
        let response = self.http.post(&url).json(body).send().await?;
        Ok(response.error_for_status()?.json::<Rs>().await?)
    }

    async fn get_json<Rs>(&self, url: String) -> Result<Rs, AgentError>
    where
        Rs: DeserializeOwned,
    {
        let response = self.http.get(&url).send().await?;
        Ok(response.error_for_status()?.json::<Rs>().await?)
    }

    fn check_body(status: &str, error: &str) -> Result<(), AgentError> {
        if status == STATUS_ERROR || !error.is_empty() {
            return Err(AgentError::from_api_error(error));
        }
        Ok(())
    }
}

/// Abstraction over the agent control plane, implemented by
/// [`AgentClient`] over HTTP and by in-process fakes in tests.
#[async_trait::async_trait]
pub trait ControlPlane: Send + Sync {
    async fn start(&self, agent: &Agent, request: &StartRequest)
        -> Result<StartResponse, AgentError>;

    async fn stop(&self, agent: &Agent, pid: i64) -> Result<(), AgentError>;

    async fn status(&self, agent: &Agent, pid: i64) -> Result<StatusResponse, AgentError>;

    async fn all_tasks(&self, agent: &Agent) -> Result<AllTasksResponse, AgentError>;

    async fn utilization(&self, agent: &Agent) -> Result<Utilization, AgentError>;
}

#[async_trait::async_trait]
impl ControlPlane for AgentClient {
    async fn start(
        &self,
        agent: &Agent,
        request: &StartRequest,
    ) -> Result<StartResponse, AgentError> {
        AgentClient::start(self, agent, request).await
    }

    async fn stop(&self, agent: &Agent, pid: i64) -> Result<(), AgentError> {
        AgentClient::stop(self, agent, pid).await
    }

    async fn status(&self, agent: &Agent, pid: i64) -> Result<StatusResponse, AgentError> {
        AgentClient::status(self, agent, pid).await
    }

    async fn all_tasks(&self, agent: &Agent) -> Result<AllTasksResponse, AgentError> {
        AgentClient::all_tasks(self, agent).await
    }

    async fn utilization(&self, agent: &Agent) -> Result<Utilization, AgentError> {
        AgentClient::utilization(self, agent).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_body_maps_to_agent_error() {
        assert!(AgentClient::check_body("Success", "").is_ok());
        assert!(matches!(
            AgentClient::check_body("Error", "boom"),
            Err(AgentError::Api(_))
        ));
        assert!(matches!(
            AgentClient::check_body("Error", "no such test run"),
            Err(AgentError::NoSuchTestRun)
        ));
    }
}
