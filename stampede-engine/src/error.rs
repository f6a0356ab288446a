//! Engine error taxonomy.
//!
//! Nothing here propagates to a caller synchronously: the processor's
//! fault boundary converts every error into `Status=Failed` plus a
//! human-readable description on the command row, and callers observe
//! outcomes by polling command/run state.

use stampede_agent::SelectError;
use stampede_interfaces::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Bad or missing input (unknown script ids, wrong run status).
    /// Not retried; the caller must resubmit a corrected command.
    #[error("validation error: {0}")]
    Validation(String),

    /// No agent available for a tag. Not retried automatically.
    #[error("capacity error: {0}")]
    Capacity(String),

    /// Network or agent-side failure; recovery happens on the next
    /// self-chained Update cycle, never inline.
    #[error("agent error: {0}")]
    TransientAgent(String),

    /// The metrics-cardinality breaker tripped.
    #[error("metrics cardinality exceeded: {0}")]
    OverflowGuard(String),

    /// The decrease algorithm could not reach the requested reduction
    /// from the available running capacity.
    #[error("load decrease inconsistency: {0}")]
    AlgorithmInconsistency(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<SelectError> for EngineError {
    fn from(err: SelectError) -> Self {
        match err {
            SelectError::NoCapacity { tag } => {
                EngineError::Capacity(format!("no free agents for tag '{tag}'"))
            }
            SelectError::Storage(storage) => EngineError::Storage(storage),
        }
    }
}
