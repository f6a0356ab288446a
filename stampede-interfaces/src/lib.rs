//! Store and repository interfaces for the stampede orchestrator.
//!
//! These traits are the seams between the orchestration engine and its
//! collaborators: the durable command queue, the entity store behind the
//! user-facing API, and the annotation/statistics sinks. Everything the
//! engine touches goes through one of them, so tests and the embedded
//! binary can swap in in-memory implementations.

pub mod database;
pub mod sinks;

pub use database::{
    AgentRepository, CommandStore, RunRepository, ScenarioRepository, StorageError,
};
pub use sinks::{AnnotationSink, StatsRecord, StatsSink};
