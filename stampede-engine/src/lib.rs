//! The stampede orchestration engine.
//!
//! A [`CommandProvider`] leases commands from the durable queue and
//! feeds a bounded dispatch channel; a [`ProcessorPool`] of workers
//! routes each command to the state-machine handler for its type. The
//! handlers drive runs and their script runs across the agent fleet and
//! keep themselves alive by re-enqueueing follow-up commands (an Update
//! re-issues itself while its run is running).

pub mod adjust;
pub mod annotations;
pub mod error;
pub mod processor;
pub mod provider;
pub mod stats;

mod start;
mod stop;
mod update;

pub use adjust::{plan_decrease, DecreaseCandidate, DecreasePlan};
pub use annotations::LogAnnotationSink;
pub use error::EngineError;
pub use processor::{EngineSettings, ProcessorPool};
pub use provider::CommandProvider;
pub use stats::StatisticsCollector;
