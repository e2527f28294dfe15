//! Boundary to the external validator node process.
//!
//! The node is an opaque collaborator: commands go out fire-and-forget and
//! every result comes back later as a [`NodeEvent`](crate::bus::NodeEvent)
//! on the bus.

pub mod memory;
pub mod process;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::keys::KeyPair;

pub use process::ProcessNode;

#[derive(Debug, Clone, thiserror::Error)]
pub enum CommandError {
    #[error("node rejected {command}: {message}")]
    Rejected { command: CommandKind, message: String },
    #[error("{command} timed out after {after_ms}ms")]
    Timeout { command: CommandKind, after_ms: u64 },
    #[error("node process unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    ProbeMemory,
    BeginDependencyDownload,
    StartNode,
}

impl CommandKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ProbeMemory => "probe_memory",
            Self::BeginDependencyDownload => "begin_dependency_download",
            Self::StartNode => "start_node",
        }
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeCommand {
    ProbeMemory,
    BeginDependencyDownload,
    StartNode(KeyPair),
}

impl NodeCommand {
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::ProbeMemory => CommandKind::ProbeMemory,
            Self::BeginDependencyDownload => CommandKind::BeginDependencyDownload,
            Self::StartNode(_) => CommandKind::StartNode,
        }
    }
}

/// Outbound half of the node contract.
///
/// `Ok(())` only means the node accepted the command.
#[async_trait]
pub trait NodeCommander: Send + Sync {
    async fn probe_memory(&self) -> Result<(), CommandError>;

    async fn begin_dependency_download(&self) -> Result<(), CommandError>;

    async fn start_node(&self, keys: &KeyPair) -> Result<(), CommandError>;
}

/// Route a command to the matching trait method.
pub async fn send(commander: &dyn NodeCommander, command: &NodeCommand) -> Result<(), CommandError> {
    match command {
        NodeCommand::ProbeMemory => commander.probe_memory().await,
        NodeCommand::BeginDependencyDownload => commander.begin_dependency_download().await,
        NodeCommand::StartNode(keys) => commander.start_node(keys).await,
    }
}
