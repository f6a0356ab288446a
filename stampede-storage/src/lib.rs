//! Storage for the stampede orchestrator.
//!
//! The command queue is the single authoritative shared mutable
//! resource, so it gets a durable SQLite implementation whose lease is
//! one atomic claim statement. Domain entities (runs, scenarios,
//! agents) are persisted by the surrounding platform; the in-memory
//! implementations here back tests and the embedded binary.

pub mod memory;
pub mod sqlite;

pub use memory::{
    InMemoryAgentRepository, InMemoryCommandStore, InMemoryRunRepository,
    InMemoryScenarioRepository, InMemoryStatsSink,
};
pub use sqlite::SqliteCommandStore;
