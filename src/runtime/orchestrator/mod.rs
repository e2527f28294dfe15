//! Bootstrap orchestrator: owns the active session and drives it.
//!
//! The orchestrator wires the stage controller to the outside world:
//! - Subscribes the session to every node event kind on the bus
//! - Feeds events, command acceptances and stage timeouts into the controller
//! - Dispatches the commands the controller asks for
//! - Publishes a [`SessionSnapshot`] after every mutation
//!
//! # Sub-modules
//!
//! - `pump`: merges the per-kind subscriptions and applies inputs
//! - `watchdog`: per-stage timeouts
//!
//! # Usage
//!
//! ```ignore
//! let orchestrator = BootstrapOrchestrator::new(bus, node, config);
//! let session = orchestrator.start_session(keys);
//!
//! // START is only accepted once the memory check has passed.
//! let mut state = session.watch();
//! while state.borrow_and_update().stage != Stage::AwaitingStart {
//!     state.changed().await?;
//! }
//! session.confirm_start()?;
//! let handoff = session.wait_outcome().await?;
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::bus::{EventKind, NodeEvent, NodeEventBus, Subscription, SubscriptionHandle};
use crate::core::config::BootstrapConfig;
use crate::core::keys::KeyPair;
use crate::core::stage::Stage;
use crate::node::{CommandKind, NodeCommander};
use crate::BootstrapError;

use super::controller::StageController;
use super::dispatcher::CommandDispatcher;
use super::session::{BootstrapSession, Handoff, SessionSnapshot};

mod pump;
mod watchdog;

/// Something the stage controller must react to.
#[derive(Debug, Clone)]
pub(crate) enum Input {
    Event(NodeEvent),
    CommandAccepted(CommandKind),
    StageTimedOut { stage: Stage, after: Duration },
}

pub struct BootstrapOrchestrator {
    bus: Arc<NodeEventBus>,
    commander: Arc<dyn NodeCommander>,
    config: BootstrapConfig,
    active: Mutex<Option<SessionHandle>>,
}

impl BootstrapOrchestrator {
    pub fn new(
        bus: Arc<NodeEventBus>,
        commander: Arc<dyn NodeCommander>,
        config: BootstrapConfig,
    ) -> Self {
        Self {
            bus,
            commander,
            config,
            active: Mutex::new(None),
        }
    }

    pub fn bus(&self) -> &Arc<NodeEventBus> {
        &self.bus
    }

    pub fn config(&self) -> &BootstrapConfig {
        &self.config
    }

    /// Create a session and begin the memory check.
    ///
    /// Any session still active is abandoned first, and values retained on
    /// the bus from it are cleared so they are not replayed into the new one.
    /// Must be called from within a tokio runtime.
    pub fn start_session(&self, keys: KeyPair) -> SessionHandle {
        let mut active = self.active.lock().expect("orchestrator mutex poisoned");
        if let Some(previous) = active.take() {
            previous.abandon();
        }
        self.bus.clear_retained();

        let controller = StageController::new(BootstrapSession::new(keys), &self.config.sync_marker);
        let (state_tx, _) = watch::channel(controller.snapshot());
        let shared = Arc::new(SessionShared {
            id: controller.session_id(),
            controller: Mutex::new(controller),
            dispatcher: CommandDispatcher::new(
                self.commander.clone(),
                self.bus.clone(),
                self.config.command_timeout(),
            ),
            subscriptions: SessionSubscriptions::default(),
            state_tx,
            tasks: Mutex::new(Vec::new()),
            abandoned: AtomicBool::new(false),
        });
        let session = SessionHandle { shared };

        // Subscribe before the first command goes out so no reply is missed.
        let subscriptions: Vec<Subscription> = EventKind::all()
            .iter()
            .filter_map(|kind| session.shared.subscriptions.ensure(&self.bus, *kind))
            .collect();
        session.track(|| tokio::spawn(pump::run(session.clone(), subscriptions)));
        if !self.config.stage_timeouts.is_empty() {
            let timeouts = self.config.stage_timeouts.clone();
            session.track(|| tokio::spawn(watchdog::run(session.clone(), timeouts)));
        }

        info!(session_id = %session.id(), "bootstrap session started");
        session.begin();
        *active = Some(session.clone());
        session
    }

    pub fn active_session(&self) -> Option<SessionHandle> {
        self.active
            .lock()
            .expect("orchestrator mutex poisoned")
            .clone()
    }

    /// Confirm START on the active session.
    pub fn confirm_start(&self) -> Result<(), BootstrapError> {
        self.active_session()
            .ok_or(BootstrapError::NoActiveSession)?
            .confirm_start()
    }

    /// Abandon the active session, if any. Returns true if one was abandoned.
    pub fn abandon_active(&self) -> bool {
        let session = self
            .active
            .lock()
            .expect("orchestrator mutex poisoned")
            .take();
        match session {
            Some(session) => {
                session.abandon();
                true
            }
            None => false,
        }
    }
}

/// Per-kind bus subscriptions owned by one session.
///
/// [`SessionSubscriptions::ensure`] only subscribes a kind that has no live
/// subscription, so re-entering a stage never registers a second one.
#[derive(Default)]
pub struct SessionSubscriptions {
    handles: Mutex<HashMap<EventKind, SubscriptionHandle>>,
}

impl SessionSubscriptions {
    pub fn ensure(&self, bus: &NodeEventBus, kind: EventKind) -> Option<Subscription> {
        let mut handles = self.handles.lock().expect("subscriptions mutex poisoned");
        if handles.get(&kind).is_some_and(SubscriptionHandle::is_active) {
            return None;
        }
        let subscription = bus.subscribe(kind);
        handles.insert(kind, subscription.handle());
        Some(subscription)
    }

    /// Unsubscribe every kind. Returns how many were still active.
    pub fn release_all(&self) -> usize {
        self.handles
            .lock()
            .expect("subscriptions mutex poisoned")
            .values()
            .filter(|handle| handle.unsubscribe())
            .count()
    }

    pub fn active_kinds(&self) -> Vec<EventKind> {
        let handles = self.handles.lock().expect("subscriptions mutex poisoned");
        EventKind::all()
            .iter()
            .copied()
            .filter(|kind| handles.get(kind).is_some_and(SubscriptionHandle::is_active))
            .collect()
    }
}

struct SessionShared {
    id: Uuid,
    controller: Mutex<StageController>,
    dispatcher: CommandDispatcher,
    subscriptions: SessionSubscriptions,
    state_tx: watch::Sender<SessionSnapshot>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    abandoned: AtomicBool,
}

/// Cheap, cloneable handle to one bootstrap session.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<SessionShared>,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.state_tx.borrow().clone()
    }

    pub fn stage(&self) -> Stage {
        self.shared.state_tx.borrow().stage
    }

    /// Receiver that sees every published snapshot.
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.shared.state_tx.subscribe()
    }

    pub fn handoff(&self) -> Option<Handoff> {
        self.shared
            .controller
            .lock()
            .expect("session mutex poisoned")
            .handoff()
            .cloned()
    }

    pub fn is_abandoned(&self) -> bool {
        self.shared.abandoned.load(Ordering::SeqCst)
    }

    pub fn active_subscriptions(&self) -> Vec<EventKind> {
        self.shared.subscriptions.active_kinds()
    }

    pub fn was_dispatched(&self, kind: CommandKind) -> bool {
        self.shared.dispatcher.was_issued(kind)
    }

    /// Operator pressed START. Only valid in `AwaitingStart`; a repeat after
    /// the download has begun is a no-op.
    pub fn confirm_start(&self) -> Result<(), BootstrapError> {
        if self.is_abandoned() {
            return Err(BootstrapError::Abandoned);
        }
        let effects = {
            let mut controller = self.shared.controller.lock().expect("session mutex poisoned");
            if self.is_abandoned() {
                return Err(BootstrapError::Abandoned);
            }
            let effects = controller.confirm_start()?;
            self.publish_locked(&controller);
            effects
        };
        self.execute(effects);
        Ok(())
    }

    /// Resolve once the session reaches a terminal stage.
    pub async fn wait_outcome(&self) -> Result<Handoff, BootstrapError> {
        let mut rx = self.watch();
        loop {
            let (stage, abandoned) = {
                let snapshot = rx.borrow_and_update();
                (snapshot.stage, snapshot.abandoned)
            };
            if abandoned {
                return Err(BootstrapError::Abandoned);
            }
            match stage {
                Stage::Ready => {
                    if let Some(handoff) = self.handoff() {
                        return Ok(handoff);
                    }
                }
                Stage::MemoryFailed | Stage::Failed => return Err(self.failure_error()),
                _ => {}
            }
            if rx.changed().await.is_err() {
                return Err(BootstrapError::Abandoned);
            }
        }
    }

    /// Stop driving this session: release subscriptions, cancel pending work.
    /// No command is sent to the node.
    pub fn abandon(&self) {
        if self.shared.abandoned.swap(true, Ordering::SeqCst) {
            return;
        }
        let released = self.shared.subscriptions.release_all();
        let tasks: Vec<JoinHandle<()>> = self
            .shared
            .tasks
            .lock()
            .expect("session mutex poisoned")
            .drain(..)
            .collect();
        for task in tasks {
            task.abort();
        }
        self.shared.state_tx.send_modify(|snapshot| snapshot.abandoned = true);
        info!(session_id = %self.id(), released, "bootstrap session abandoned");
    }

    fn failure_error(&self) -> BootstrapError {
        let controller = self.shared.controller.lock().expect("session mutex poisoned");
        match controller.reporter().failure() {
            Some(record) => record.clone().into(),
            None => BootstrapError::ProtocolError("session ended without a failure record".into()),
        }
    }

    /// Spawn a task owned by this session. Nothing is spawned once the
    /// session is abandoned; `abandon` sets the flag before draining `tasks`,
    /// so every task spawned here is either aborted or never started.
    fn track<F>(&self, spawn: F) -> bool
    where
        F: FnOnce() -> JoinHandle<()>,
    {
        let mut tasks = self.shared.tasks.lock().expect("session mutex poisoned");
        if self.is_abandoned() {
            return false;
        }
        tasks.retain(|task| !task.is_finished());
        tasks.push(spawn());
        true
    }

    fn begin(&self) {
        let effects = {
            let mut controller = self.shared.controller.lock().expect("session mutex poisoned");
            let effects = controller.begin();
            self.publish_locked(&controller);
            effects
        };
        self.execute(effects);
    }

    /// Publish the controller state. Called with the controller lock held so
    /// snapshots go out in mutation order.
    fn publish_locked(&self, controller: &StageController) {
        let mut next = controller.snapshot();
        next.abandoned = self.is_abandoned();
        let changed = self.shared.state_tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
        if changed {
            debug!(session_id = %self.id(), "snapshot published");
        }
    }
}
