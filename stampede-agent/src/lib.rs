//! Agent fleet plumbing: the HTTP control-plane client, the free-agent
//! selector and the periodic health tracker.

pub mod client;
pub mod error;
pub mod selector;
pub mod tracker;
pub mod types;

pub use client::{AgentClient, ControlPlane};
pub use error::AgentError;
pub use selector::{AgentSelector, SelectError};
pub use tracker::AgentHealthTracker;
