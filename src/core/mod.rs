//! Shared domain types: stages, credentials and configuration.

pub mod config;
pub mod keys;
pub mod stage;

pub use config::{BootstrapConfig, ConfigError, NodeProcessConfig, StageTimeouts};
pub use keys::{KeyError, KeyPair};
pub use stage::Stage;
