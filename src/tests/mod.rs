//! Scenario tests for the bootstrap flow.
//!
//! This module provides helpers shared by the scenario suites: drivers that
//! walk a stage controller to a given stage, and waiters for orchestrated
//! sessions.

use std::sync::Arc;
use std::time::Duration;

use crate::bus::{DependencyState, NodeEvent, NodeEventBus, ReplayPolicy};
use crate::core::config::{BootstrapConfig, DEFAULT_SYNC_MARKER};
use crate::core::keys::KeyPair;
use crate::core::stage::Stage;
use crate::node::CommandKind;
use crate::runtime::controller::{Effect, StageController};
use crate::runtime::orchestrator::{BootstrapOrchestrator, SessionHandle};
use crate::runtime::session::{BootstrapSession, SessionSnapshot};
use crate::testing::RecordingNode;


#[cfg(test)]
mod failures;


pub const WAIT: Duration = Duration::from_secs(5);

pub const PRIVATE_KEY: &str = "bottom drive obey lake curtain smoke";
pub const PUBLIC_KEY: &str = "5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQY";

pub fn keys() -> KeyPair {
    KeyPair::new(PRIVATE_KEY, PUBLIC_KEY).expect("test keys are valid")
}

pub fn sync_status() -> NodeEvent {
    NodeEvent::Status(DEFAULT_SYNC_MARKER.to_string())
}

pub fn new_controller() -> StageController {
    StageController::new(BootstrapSession::new(keys()), DEFAULT_SYNC_MARKER)
}

/// Controller that has confirmed START and is downloading the dependency.
pub fn downloading_controller() -> StageController {
    let mut controller = new_controller();
    controller.begin();
    controller.apply(&NodeEvent::MemoryProbe { sufficient: true });
    controller.confirm_start().expect("awaiting start");
    assert_eq!(controller.stage(), Stage::DependencyDownloading);
    controller
}

/// Controller whose node has been started and accepted the command.
pub fn launched_controller() -> StageController {
    let mut controller = downloading_controller();
    controller.apply(&NodeEvent::DependencyState(DependencyState::Downloaded));
    controller.apply(&NodeEvent::DependencyState(DependencyState::Installed));
    controller.command_accepted(CommandKind::StartNode);
    assert_eq!(controller.stage(), Stage::RelayConnecting);
    controller
}

pub fn ready_count(effects: &[Effect]) -> usize {
    effects
        .iter()
        .filter(|effect| matches!(effect, Effect::Ready(_)))
        .count()
}

pub fn dispatched(effects: &[Effect]) -> Vec<CommandKind> {
    effects
        .iter()
        .filter_map(|effect| match effect {
            Effect::Dispatch(command) => Some(command.kind()),
            _ => None,
        })
        .collect()
}

pub struct Harness {
    pub bus: Arc<NodeEventBus>,
    pub node: Arc<RecordingNode>,
    pub orchestrator: BootstrapOrchestrator,
}

impl Harness {
    pub fn new(configure: impl FnOnce(RecordingNode) -> RecordingNode) -> Self {
        Self::with_config(configure, BootstrapConfig::default())
    }

    pub fn with_config(
        configure: impl FnOnce(RecordingNode) -> RecordingNode,
        config: BootstrapConfig,
    ) -> Self {
        let bus = Arc::new(NodeEventBus::with_policy(ReplayPolicy::LastValue, 64));
        let node = Arc::new(configure(RecordingNode::new(bus.clone())));
        let orchestrator = BootstrapOrchestrator::new(bus.clone(), node.clone(), config);
        Self {
            bus,
            node,
            orchestrator,
        }
    }

    /// Start a session and confirm START once the memory check passes.
    pub async fn confirmed_session(&self) -> SessionHandle {
        let session = self.orchestrator.start_session(keys());
        wait_for_stage(&session, Stage::AwaitingStart).await;
        session.confirm_start().expect("awaiting start");
        session
    }
}

/// Wait until the session's snapshot satisfies `done`, or panic.
pub async fn wait_until<F>(session: &SessionHandle, mut done: F) -> SessionSnapshot
where
    F: FnMut(&SessionSnapshot) -> bool,
{
    let mut rx = session.watch();
    let result = tokio::time::timeout(WAIT, async {
        loop {
            let snapshot = rx.borrow_and_update().clone();
            if done(&snapshot) {
                return snapshot;
            }
            if rx.changed().await.is_err() {
                return snapshot;
            }
        }
    })
    .await;
    match result {
        Ok(snapshot) => snapshot,
        Err(_) => panic!("timed out waiting; last snapshot: {:?}", session.snapshot()),
    }
}

pub async fn wait_for_stage(session: &SessionHandle, stage: Stage) -> SessionSnapshot {
    let snapshot = wait_until(session, |snapshot| snapshot.stage == stage).await;
    assert_eq!(snapshot.stage, stage, "session ended in {}", snapshot.stage);
    snapshot
}

/// Poll `check` until it holds, or panic.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "condition never held");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
