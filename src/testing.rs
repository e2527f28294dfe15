//! Test doubles for the node collaborator.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::bus::{NodeEvent, NodeEventBus};
use crate::core::keys::KeyPair;
use crate::node::{CommandError, CommandKind, NodeCommander};

/// Records every command it receives. Optionally answers the memory probe,
/// rejects some commands, or never answers others.
pub struct RecordingNode {
    bus: Arc<NodeEventBus>,
    commands: Mutex<Vec<CommandKind>>,
    started_with: Mutex<Option<KeyPair>>,
    rejected: HashSet<CommandKind>,
    stalled: HashSet<CommandKind>,
    memory_reply: Option<bool>,
}

impl RecordingNode {
    pub fn new(bus: Arc<NodeEventBus>) -> Self {
        Self {
            bus,
            commands: Mutex::new(Vec::new()),
            started_with: Mutex::new(None),
            rejected: HashSet::new(),
            stalled: HashSet::new(),
            memory_reply: None,
        }
    }

    pub fn reject(mut self, kind: CommandKind) -> Self {
        self.rejected.insert(kind);
        self
    }

    pub fn stall(mut self, kind: CommandKind) -> Self {
        self.stalled.insert(kind);
        self
    }

    pub fn reply_memory(mut self, sufficient: bool) -> Self {
        self.memory_reply = Some(sufficient);
        self
    }

    pub fn commands(&self) -> Vec<CommandKind> {
        self.commands.lock().unwrap().clone()
    }

    pub fn count(&self, kind: CommandKind) -> usize {
        self.commands().iter().filter(|k| **k == kind).count()
    }

    pub fn started_with(&self) -> Option<KeyPair> {
        self.started_with.lock().unwrap().clone()
    }

    async fn handle(&self, kind: CommandKind) -> Result<(), CommandError> {
        self.commands.lock().unwrap().push(kind);
        if self.stalled.contains(&kind) {
            futures::future::pending::<()>().await;
        }
        if self.rejected.contains(&kind) {
            return Err(CommandError::Rejected {
                command: kind,
                message: "refused by test node".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl NodeCommander for RecordingNode {
    async fn probe_memory(&self) -> Result<(), CommandError> {
        self.handle(CommandKind::ProbeMemory).await?;
        if let Some(sufficient) = self.memory_reply {
            self.bus.publish(NodeEvent::MemoryProbe { sufficient });
        }
        Ok(())
    }

    async fn begin_dependency_download(&self) -> Result<(), CommandError> {
        self.handle(CommandKind::BeginDependencyDownload).await
    }

    async fn start_node(&self, keys: &KeyPair) -> Result<(), CommandError> {
        *self.started_with.lock().unwrap() = Some(keys.clone());
        self.handle(CommandKind::StartNode).await
    }
}
