//! Annotation and statistics sinks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::database::StorageError;

/// Receives run start/stop markers, typically backing a dashboard
/// annotation gauge.
pub trait AnnotationSink: Send + Sync {
    fn inc(&self, title: &str, run_id: i64, link: &str);
    fn dec(&self, title: &str, run_id: i64, link: &str);
}

/// One aggregated statistics row for a dump, keyed by agent-local pid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsRecord {
    pub pid: i64,
    pub rps: i64,
    pub rt90p: i64,
    pub rt95p: i64,
    pub rt99p: i64,
    pub rt_max: i64,
    pub failed: i64,
    pub vus: i64,
    pub data_sent: i64,
    pub data_received: i64,
    /// Hostnames of the agents that contributed to this row.
    pub agents: Vec<String>,
}

/// Durable destination for periodic statistics dumps.
#[async_trait]
pub trait StatsSink: Send + Sync {
    /// Open a new dump, returning its id.
    async fn create_dump(&self) -> Result<i64, StorageError>;

    async fn put_statistic(&self, dump_id: i64, record: &StatsRecord) -> Result<(), StorageError>;

    /// Discard a dump that collected nothing.
    async fn delete_dump(&self, dump_id: i64) -> Result<(), StorageError>;
}
