//! Free-agent selection.
//!
//! Selection is weighted-random rather than strictly least-loaded: the
//! repository returns candidates ascending by utilization and a
//! geometric draw biases toward the head of that list, so concurrent
//! start bursts spread across agents instead of piling onto one "best"
//! host whose utilization data is seconds stale.

use rand::Rng;
use std::sync::Arc;
use stampede_core::Agent;
use stampede_interfaces::{AgentRepository, StorageError};
use tracing::debug;

/// Parameter of the geometric draw; higher means stronger bias toward
/// the least-loaded agents.
const GEOMETRIC_P: f64 = 0.3;

#[derive(Debug, thiserror::Error)]
pub enum SelectError {
    #[error("no free agents for tag '{tag}'")]
    NoCapacity { tag: String },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub struct AgentSelector {
    agents: Arc<dyn AgentRepository>,
    default_tag: String,
}

impl AgentSelector {
    pub fn new(agents: Arc<dyn AgentRepository>, default_tag: impl Into<String>) -> Self {
        Self {
            agents,
            default_tag: default_tag.into(),
        }
    }

    /// A tag unknown to the fleet falls back to the default tag.
    pub async fn resolve_tag(&self, tag: &str) -> Result<String, SelectError> {
        if tag.is_empty() {
            return Ok(self.default_tag.clone());
        }
        let known = self.agents.known_tags().await?;
        if known.iter().any(|t| t == tag) {
            Ok(tag.to_string())
        } else {
            debug!(tag, fallback = %self.default_tag, "unknown tag, using fallback");
            Ok(self.default_tag.clone())
        }
    }

    /// Verify that at least one enabled agent serves `tag` (or its
    /// fallback).
    pub async fn ensure_capacity(&self, tag: &str) -> Result<(), SelectError> {
        let tag = self.resolve_tag(tag).await?;
        let candidates = self.agents.enabled_agents_by_tag(&tag).await?;
        if candidates.is_empty() {
            return Err(SelectError::NoCapacity { tag });
        }
        Ok(())
    }

    /// Pick an agent for `tag` using the weighted-random draw.
    pub async fn pick_free_agent(&self, tag: &str) -> Result<Agent, SelectError> {
        let tag = self.resolve_tag(tag).await?;
        let candidates = self.agents.enabled_agents_by_tag(&tag).await?;
        if candidates.is_empty() {
            return Err(SelectError::NoCapacity { tag });
        }
        if candidates.len() == 1 {
            return Ok(candidates[0].clone());
        }

        let index = geometric_index(GEOMETRIC_P, candidates.len());
        debug!(tag, index, count = candidates.len(), "picked agent");
        Ok(candidates[index].clone())
    }
}

/// Geometrically distributed index, clipped modulo `len`.
fn geometric_index(p: f64, len: usize) -> usize {
    let u: f64 = rand::thread_rng().gen_range(0.0..1.0);
    let sample = ((1.0 - u).ln() / (1.0 - p).ln()).floor() as usize;
    sample % len
}
