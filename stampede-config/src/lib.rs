//! Configuration for the stampede orchestrator.
//!
//! Domain-split config structs with serde defaults, validated per
//! domain, loadable from a YAML file with `STAMPEDE_*` environment
//! overrides. There is no global config singleton: the loaded struct is
//! passed into every constructor that needs it.

pub mod domains;
pub mod error;
pub mod loader;
pub mod validation;

pub use domains::{
    agent::AgentConfig,
    engine::EngineConfig,
    logging::{LogFormat, LoggingConfig},
    StampedeConfig,
};
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use validation::Validatable;
