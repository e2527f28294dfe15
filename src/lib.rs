//! Validator node bootstrap library.
//!
//! Brings a local validator node from "just launched" to "ready to hand off
//! to the dashboard":
//! - Checks the host has enough memory
//! - Waits for the operator to confirm START with a key pair
//! - Downloads and installs the node's database dependency
//! - Starts the node, waits for the relay connection, the sync handshake and
//!   the leader turn assignment
//!
//! # Architecture
//!
//! - `bus`: per-kind broadcast channels carrying node events
//! - `core`: stages, key material and configuration
//! - `node`: the node collaborator (commands out, events in)
//! - `runtime`: stage controller, convergence gate, failure reporting and the
//!   orchestrator that drives one session at a time

pub mod bus;
pub mod core;
pub mod node;
pub mod runtime;

#[cfg(test)]
mod testing;

#[cfg(test)]
mod tests;

use serde::Serialize;

pub use crate::bus::{EventKind, NodeEvent, NodeEventBus, ReplayPolicy};
pub use crate::core::{BootstrapConfig, ConfigError, KeyError, KeyPair, Stage};
pub use crate::node::{CommandError, CommandKind, NodeCommander, ProcessNode};
pub use crate::runtime::failure::{ErrorRecord, FailureKind};
pub use crate::runtime::{BootstrapOrchestrator, Handoff, SessionHandle, SessionSnapshot};

// ---------------------------------------------------------------------------
// Shared error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("insufficient resources: {0}")]
    PreconditionFailure(String),
    #[error("dependency setup failed: {0}")]
    DependencyFailure(String),
    #[error("node protocol error: {0}")]
    ProtocolError(String),
    #[error("{0}")]
    TimedOut(String),
    #[error("cannot start bootstrap while {0}")]
    NotAwaitingStart(Stage),
    #[error("bootstrap session was abandoned")]
    Abandoned,
    #[error("no active bootstrap session")]
    NoActiveSession,
    #[error("{0}")]
    Keys(#[from] KeyError),
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Command(#[from] CommandError),
}

impl BootstrapError {
    /// Failure category, for errors that end a session.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::PreconditionFailure(_) => Some(FailureKind::PreconditionFailure),
            Self::DependencyFailure(_) => Some(FailureKind::DependencyFailure),
            Self::ProtocolError(_) => Some(FailureKind::ProtocolError),
            Self::TimedOut(_) => Some(FailureKind::TimedOut),
            _ => None,
        }
    }
}

impl From<ErrorRecord> for BootstrapError {
    fn from(record: ErrorRecord) -> Self {
        match record.kind {
            FailureKind::PreconditionFailure => Self::PreconditionFailure(record.message),
            FailureKind::DependencyFailure => Self::DependencyFailure(record.message),
            FailureKind::ProtocolError => Self::ProtocolError(record.message),
            FailureKind::TimedOut => Self::TimedOut(record.message),
        }
    }
}

impl Serialize for BootstrapError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

pub const DEFAULT_LOG_FILTER: &str = "validator_bootstrap=debug,info";

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// filter. Safe to call more than once; later calls are ignored.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .try_init();
}
