//! Load-generation agents.

use serde::{Deserialize, Serialize};

/// A remote host capable of executing load-generation processes,
/// reachable over its HTTP control plane.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: i64,
    pub host_name: String,
    pub port: u16,
    pub tags: Vec<String>,
    pub enabled: bool,
    /// Utilization percentages, 0..=100, written by the health tracker.
    pub cpu_used: i32,
    pub mem_used: i32,
    pub ports_used: i32,
    /// Weighted utilization score, see [`crate::load::total_loading`].
    pub total_loading: i16,
}

impl Agent {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host_name, self.port)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}
