use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{info, warn};

use crate::bus::{NodeEvent, NodeEventBus};
use crate::node::{self, CommandError, CommandKind, NodeCommand, NodeCommander};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Accepted,
    /// Already dispatched once in this session.
    Skipped,
    /// The node rejected the command or did not answer in time. The error has
    /// been published on the bus.
    Failed(String),
}

/// Sends each command kind to the node at most once per session.
///
/// Failures are not returned to the caller as errors: they are published as
/// `error` events so the stage controller handles them like any other node
/// error.
pub struct CommandDispatcher {
    commander: Arc<dyn NodeCommander>,
    bus: Arc<NodeEventBus>,
    issued: Mutex<HashSet<CommandKind>>,
    timeout: Duration,
}

impl CommandDispatcher {
    pub fn new(commander: Arc<dyn NodeCommander>, bus: Arc<NodeEventBus>, timeout: Duration) -> Self {
        Self {
            commander,
            bus,
            issued: Mutex::new(HashSet::new()),
            timeout,
        }
    }

    /// Reserve the right to send `kind`. Only the first call per kind wins.
    pub fn claim(&self, kind: CommandKind) -> bool {
        let mut issued = self.issued.lock().expect("dispatcher mutex poisoned");
        issued.insert(kind)
    }

    pub fn was_issued(&self, kind: CommandKind) -> bool {
        self.issued
            .lock()
            .expect("dispatcher mutex poisoned")
            .contains(&kind)
    }

    pub async fn dispatch(&self, command: NodeCommand) -> DispatchOutcome {
        let kind = command.kind();
        if !self.claim(kind) {
            warn!(command = %kind, "command already dispatched; skipping");
            return DispatchOutcome::Skipped;
        }

        info!(command = %kind, "dispatching command to node");
        let result = match tokio::time::timeout(
            self.timeout,
            node::send(self.commander.as_ref(), &command),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(CommandError::Timeout {
                command: kind,
                after_ms: self.timeout.as_millis() as u64,
            }),
        };

        match result {
            Ok(()) => DispatchOutcome::Accepted,
            Err(e) => {
                warn!(command = %kind, "command failed: {e}");
                let message = e.to_string();
                self.bus.publish(NodeEvent::Error(message.clone()));
                DispatchOutcome::Failed(message)
            }
        }
    }
}
