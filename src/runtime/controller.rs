//! Stage controller: the bootstrap state machine.
//!
//! The controller is synchronous and side-effect free. Every input returns
//! the [`Effect`]s the caller must carry out (commands to dispatch) or report
//! (stage changes, readiness, failure). Callers serialize access to it; the
//! orchestrator keeps it behind a single mutex.

use std::time::Duration;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::failure::{ErrorRecord, FailureKind, FailureReporter};
use super::gate::ConvergenceGate;
use super::session::{BootstrapSession, Handoff, SessionSnapshot, StageChange};
use crate::bus::{DependencyState, NodeEvent};
use crate::core::config::DEFAULT_SYNC_MARKER;
use crate::core::stage::Stage;
use crate::node::{CommandKind, NodeCommand};
use crate::BootstrapError;

pub const INSUFFICIENT_MEMORY_MESSAGE: &str = "not enough memory to join the network";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Entered(StageChange),
    Dispatch(NodeCommand),
    Ready(Handoff),
    Failed(ErrorRecord),
}

pub struct StageController {
    session: BootstrapSession,
    gate: ConvergenceGate,
    reporter: FailureReporter,
    sync_marker: String,
    node_started: bool,
    handoff: Option<Handoff>,
}

impl StageController {
    pub fn new(session: BootstrapSession, sync_marker: impl Into<String>) -> Self {
        let sync_marker = sync_marker.into();
        Self {
            session,
            gate: ConvergenceGate::new(),
            reporter: FailureReporter::default(),
            sync_marker: if sync_marker.trim().is_empty() {
                DEFAULT_SYNC_MARKER.to_string()
            } else {
                sync_marker
            },
            node_started: false,
            handoff: None,
        }
    }

    pub fn session(&self) -> &BootstrapSession {
        &self.session
    }

    pub fn session_id(&self) -> Uuid {
        self.session.id()
    }

    pub fn stage(&self) -> Stage {
        self.session.stage()
    }

    pub fn gate(&self) -> &ConvergenceGate {
        &self.gate
    }

    pub fn reporter(&self) -> &FailureReporter {
        &self.reporter
    }

    pub fn handoff(&self) -> Option<&Handoff> {
        self.handoff.as_ref()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session.id(),
            stage: self.session.stage(),
            public_key: self.session.keys().public_key().to_string(),
            relay_address: self.session.relay_address().map(str::to_string),
            peer_id: self.session.peer_id().map(str::to_string),
            download_percent: self.session.download_percent(),
            sync_complete: self.gate.sync_complete(),
            turn: self.gate.turn(),
            last_status: self.reporter.last_status().map(str::to_string),
            last_error: self.reporter.last_error().cloned(),
            failure: self.reporter.failure().cloned(),
            presentation: self.reporter.presentation(),
            history: self.session.history().to_vec(),
            started_at: self.session.started_at().to_string(),
            abandoned: false,
        }
    }

    /// `Idle → MemoryChecking`, asking the node to probe memory.
    pub fn begin(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.stage() != Stage::Idle {
            debug!(session_id = %self.session_id(), stage = %self.stage(), "begin ignored");
            return effects;
        }
        self.enter(Stage::MemoryChecking, &mut effects);
        effects.push(Effect::Dispatch(NodeCommand::ProbeMemory));
        effects
    }

    /// Operator pressed START.
    pub fn confirm_start(&mut self) -> Result<Vec<Effect>, BootstrapError> {
        let stage = self.stage();
        if stage.is_terminal() {
            return Err(BootstrapError::NotAwaitingStart(stage));
        }
        if stage.rank() > Stage::AwaitingStart.rank() {
            debug!(session_id = %self.session_id(), %stage, "start already confirmed");
            return Ok(Vec::new());
        }
        if stage != Stage::AwaitingStart {
            return Err(BootstrapError::NotAwaitingStart(stage));
        }

        let mut effects = Vec::new();
        self.enter(Stage::DependencyDownloading, &mut effects);
        effects.push(Effect::Dispatch(NodeCommand::BeginDependencyDownload));
        Ok(effects)
    }

    /// The node accepted an outbound command.
    pub fn command_accepted(&mut self, command: CommandKind) -> Vec<Effect> {
        let mut effects = Vec::new();
        if command != CommandKind::StartNode || self.node_started || !self.stage().node_launched() {
            return effects;
        }
        self.node_started = true;
        info!(session_id = %self.session_id(), stage = %self.stage(), "node accepted start");
        if self.stage() == Stage::NodeStarting {
            self.enter(Stage::RelayConnecting, &mut effects);
            if self.stage() == Stage::RelayConnecting && self.session.relay_address().is_some() {
                self.enter(Stage::Syncing, &mut effects);
            }
        }
        self.evaluate_gate(&mut effects);
        effects
    }

    /// The watchdog saw `stage` exceed its limit.
    pub fn time_out(&mut self, stage: Stage, after: Duration) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.stage() != stage || stage.is_terminal() {
            return effects;
        }
        let message = format!("stage {stage} timed out after {}ms", after.as_millis());
        self.fail(FailureKind::TimedOut, message, &mut effects);
        effects
    }

    pub fn apply(&mut self, event: &NodeEvent) -> Vec<Effect> {
        let mut effects = Vec::new();
        let stage = self.stage();

        if let NodeEvent::Error(message) = event {
            if stage.is_terminal() {
                self.reporter.record_error(ErrorRecord::new(
                    FailureKind::for_stage(stage),
                    message.clone(),
                    stage,
                ));
                debug!(session_id = %self.session_id(), %stage, "error recorded after terminal stage");
            } else {
                self.fail(FailureKind::for_stage(stage), message.clone(), &mut effects);
            }
            return effects;
        }

        if stage.is_terminal() {
            debug!(session_id = %self.session_id(), %stage, kind = %event.kind(), "event ignored in terminal stage");
            return effects;
        }

        match event {
            NodeEvent::MemoryProbe { sufficient } => {
                if stage != Stage::MemoryChecking {
                    debug!(session_id = %self.session_id(), %stage, "duplicate memory probe result");
                } else if *sufficient {
                    self.reporter.note_progress();
                    self.enter(Stage::MemoryOk, &mut effects);
                    self.enter(Stage::AwaitingStart, &mut effects);
                } else {
                    let record = ErrorRecord::new(
                        FailureKind::PreconditionFailure,
                        INSUFFICIENT_MEMORY_MESSAGE,
                        stage,
                    );
                    self.reporter.fail(record.clone());
                    self.enter(Stage::MemoryFailed, &mut effects);
                    error!(session_id = %self.session_id(), "{INSUFFICIENT_MEMORY_MESSAGE}");
                    effects.push(Effect::Failed(record));
                }
            }
            NodeEvent::DownloadProgress(percent) => {
                if stage == Stage::DependencyDownloading {
                    self.reporter.note_progress();
                    self.session.record_download_progress(*percent);
                } else {
                    debug!(session_id = %self.session_id(), %stage, percent, "stray download progress");
                }
            }
            NodeEvent::DependencyState(DependencyState::Downloaded) => {
                if stage == Stage::DependencyDownloading {
                    self.reporter.note_progress();
                    self.enter(Stage::DependencyInstalling, &mut effects);
                }
            }
            NodeEvent::DependencyState(DependencyState::Installed) => {
                if matches!(
                    stage,
                    Stage::DependencyDownloading | Stage::DependencyInstalling
                ) {
                    self.reporter.note_progress();
                    effects.push(Effect::Dispatch(NodeCommand::StartNode(
                        self.session.keys().clone(),
                    )));
                    self.enter(Stage::NodeStarting, &mut effects);
                }
            }
            NodeEvent::Status(text) => {
                self.reporter.record_status(text.clone());
                if text.contains(&self.sync_marker) && self.gate.latch_sync() {
                    info!(session_id = %self.session_id(), %stage, "sync handshake observed");
                    self.evaluate_gate(&mut effects);
                }
            }
            NodeEvent::Relay(address) => {
                self.reporter.note_progress();
                let address = address.trim();
                if address.is_empty() {
                    return effects;
                }
                if self.session.set_relay_address(address) {
                    info!(session_id = %self.session_id(), relay = address, "relay connected");
                } else if self.session.relay_address() != Some(address) {
                    warn!(
                        session_id = %self.session_id(),
                        relay = address,
                        "ignoring relay change; session keeps its first relay"
                    );
                }
                if matches!(stage, Stage::NodeStarting | Stage::RelayConnecting) {
                    self.enter(Stage::Syncing, &mut effects);
                }
            }
            NodeEvent::PeerId(peer_id) => {
                self.reporter.note_progress();
                if !self.session.set_peer_id(peer_id)
                    && self.session.peer_id() != Some(peer_id.trim())
                {
                    warn!(session_id = %self.session_id(), peer_id = %peer_id, "ignoring peer id change");
                }
            }
            NodeEvent::Turn { is_leader } => {
                self.reporter.note_progress();
                if self.gate.latch_turn(*is_leader) {
                    info!(session_id = %self.session_id(), is_leader, "leader turn assigned");
                    self.evaluate_gate(&mut effects);
                } else {
                    debug!(session_id = %self.session_id(), "turn already latched");
                }
            }
            NodeEvent::Error(_) => {}
        }

        effects
    }

    fn enter(&mut self, to: Stage, effects: &mut Vec<Effect>) {
        let change = self.session.advance(to);
        info!(session_id = %self.session_id(), from = %change.from, to = %change.to, "stage changed");
        effects.push(Effect::Entered(change));
        if to.node_launched() {
            self.evaluate_gate(effects);
        }
    }

    /// Readiness needs both latches and a node that accepted `start_node`.
    fn evaluate_gate(&mut self, effects: &mut Vec<Effect>) {
        if !self.node_started || !self.stage().node_launched() {
            return;
        }
        let Some(is_leader) = self.gate.try_fire() else {
            return;
        };

        let handoff = Handoff::from_session(&self.session, is_leader);
        self.reporter.seal();
        self.enter(Stage::Ready, effects);
        self.handoff = Some(handoff.clone());
        effects.push(Effect::Ready(handoff));
    }

    fn fail(&mut self, kind: FailureKind, message: String, effects: &mut Vec<Effect>) {
        let record = ErrorRecord::new(kind, message, self.stage());
        self.reporter.fail(record.clone());
        self.enter(Stage::Failed, effects);
        error!(
            session_id = %self.session_id(),
            stage = %record.stage,
            %kind,
            "bootstrap failed: {}",
            record.message
        );
        effects.push(Effect::Failed(record));
    }
}
