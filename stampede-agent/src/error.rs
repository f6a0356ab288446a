//! Agent control-plane error types.

use stampede_resilience::Retryable;

use crate::types::{NO_SUCH_TASK, NO_SUCH_TEST_RUN};

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// The agent no longer knows the pid; the run already ended.
    #[error("no such test run on agent")]
    NoSuchTestRun,

    #[error("agent transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("agent returned error: {0}")]
    Api(String),
}

impl AgentError {
    /// Classify an error string from an agent response body.
    pub fn from_api_error(message: &str) -> Self {
        if message.contains(NO_SUCH_TEST_RUN) || message.contains(NO_SUCH_TASK) {
            AgentError::NoSuchTestRun
        } else {
            AgentError::Api(message.to_string())
        }
    }

    pub fn is_no_such_run(&self) -> bool {
        matches!(self, AgentError::NoSuchTestRun)
    }
}

impl Retryable for AgentError {
    fn is_retryable(&self) -> bool {
        match self {
            AgentError::NoSuchTestRun => false,
            AgentError::Transport(_) => true,
            AgentError::Api(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_such_run_is_recognized_in_error_text() {
        assert!(AgentError::from_api_error("stop: no such test run 123").is_no_such_run());
        assert!(AgentError::from_api_error("there is no such task").is_no_such_run());
        assert!(!AgentError::from_api_error("could not initialize").is_no_such_run());
    }
}
