use futures::stream::{self, StreamExt};
use tracing::{debug, trace};

use super::*;
use crate::bus::Subscription;
use crate::runtime::controller::Effect;
use crate::runtime::dispatcher::DispatchOutcome;

/// Merge the session's per-kind subscriptions and feed every event into the
/// controller. Ends once all subscriptions are released.
pub(super) async fn run(session: SessionHandle, subscriptions: Vec<Subscription>) {
    let streams = subscriptions
        .into_iter()
        .map(|subscription| subscription.into_stream().boxed());
    let mut events = stream::select_all(streams);

    while let Some(envelope) = events.next().await {
        trace!(
            session_id = %session.id(),
            seq = envelope.seq,
            kind = %envelope.event.kind(),
            "node event"
        );
        session.handle(Input::Event(envelope.event));
    }
    debug!(session_id = %session.id(), "event pump stopped");
}

impl SessionHandle {
    /// Apply one input under the session lock, then carry out its effects.
    pub(crate) fn handle(&self, input: Input) {
        if self.is_abandoned() {
            return;
        }
        let effects = {
            let mut controller = self.shared.controller.lock().expect("session mutex poisoned");
            if self.is_abandoned() {
                return;
            }
            let effects = match input {
                Input::Event(event) => controller.apply(&event),
                Input::CommandAccepted(kind) => controller.command_accepted(kind),
                Input::StageTimedOut { stage, after } => controller.time_out(stage, after),
            };
            self.publish_locked(&controller);
            effects
        };
        self.execute(effects);
    }

    pub(super) fn execute(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Dispatch(command) => self.spawn_dispatch(command),
                Effect::Ready(handoff) => {
                    let released = self.shared.subscriptions.release_all();
                    info!(
                        session_id = %self.id(),
                        is_leader = handoff.is_leader,
                        released,
                        "node ready; handing off to dashboard"
                    );
                }
                Effect::Entered(_) | Effect::Failed(_) => {}
            }
        }
    }

    fn spawn_dispatch(&self, command: crate::node::NodeCommand) {
        let kind = command.kind();
        let session = self.clone();
        let spawned = self.track(move || {
            tokio::spawn(async move {
                if session.is_abandoned() {
                    return;
                }
                if session.shared.dispatcher.dispatch(command).await == DispatchOutcome::Accepted {
                    session.handle(Input::CommandAccepted(kind));
                }
            })
        });
        if !spawned {
            debug!(session_id = %self.id(), command = %kind, "session abandoned; command dropped");
        }
    }
}
