use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Notify};
use uuid::Uuid;

use super::event_types::{EventKind, NodeEvent};
use crate::core::config::DEFAULT_BUS_CAPACITY;

/// What a subscriber sees for events published before it attached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayPolicy {
    /// The last value published for the kind is delivered first.
    #[default]
    LastValue,
    /// Late subscribers only see events published after they attach.
    None,
}

impl std::str::FromStr for ReplayPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "last_value" | "last-value" | "last" => Ok(Self::LastValue),
            "none" | "off" => Ok(Self::None),
            _ => Err(format!("unsupported replay policy: {value}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusEvent {
    pub seq: u64,
    pub received_at: String,
    pub event: NodeEvent,
}

struct KindChannel {
    tx: broadcast::Sender<BusEvent>,
    // Guards publish/subscribe pairs so a replayed value is never also
    // delivered live, and nothing published in between is lost.
    retained: Mutex<Option<BusEvent>>,
}

/// Process-wide inbound channel for node events, one broadcast lane per kind.
pub struct NodeEventBus {
    channels: HashMap<EventKind, KindChannel>,
    policy: ReplayPolicy,
    seq: AtomicU64,
}

impl NodeEventBus {
    pub fn new() -> Self {
        Self::with_policy(ReplayPolicy::default(), DEFAULT_BUS_CAPACITY)
    }

    pub fn with_policy(policy: ReplayPolicy, capacity: usize) -> Self {
        let channels = EventKind::all()
            .iter()
            .map(|kind| {
                let (tx, _) = broadcast::channel(capacity.max(1));
                (
                    *kind,
                    KindChannel {
                        tx,
                        retained: Mutex::new(None),
                    },
                )
            })
            .collect();
        Self {
            channels,
            policy,
            seq: AtomicU64::new(0),
        }
    }

    pub fn policy(&self) -> ReplayPolicy {
        self.policy
    }

    fn channel(&self, kind: EventKind) -> &KindChannel {
        // Every kind gets a lane in `with_policy`.
        &self.channels[&kind]
    }

    /// Publish an event to every active subscriber of its kind.
    pub fn publish(&self, event: NodeEvent) -> BusEvent {
        let kind = event.kind();
        let envelope = BusEvent {
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            received_at: Utc::now().to_rfc3339(),
            event,
        };

        let channel = self.channel(kind);
        let mut retained = channel.retained.lock().expect("event bus mutex poisoned");
        if self.policy == ReplayPolicy::LastValue {
            *retained = Some(envelope.clone());
        }
        if channel.tx.send(envelope.clone()).is_err() {
            tracing::trace!(%kind, seq = envelope.seq, "no subscribers for node event");
        }
        envelope
    }

    pub fn subscribe(&self, kind: EventKind) -> Subscription {
        let channel = self.channel(kind);
        let retained = channel.retained.lock().expect("event bus mutex poisoned");
        let rx = channel.tx.subscribe();
        let replay = retained.clone();
        drop(retained);

        Subscription {
            id: Uuid::new_v4(),
            kind,
            rx,
            replay,
            handle: SubscriptionHandle {
                kind,
                closed: Arc::new(AtomicBool::new(false)),
                wake: Arc::new(Notify::new()),
            },
        }
    }

    /// Forget retained values so a new session never sees a previous
    /// session's events.
    pub fn clear_retained(&self) {
        for channel in self.channels.values() {
            channel
                .retained
                .lock()
                .expect("event bus mutex poisoned")
                .take();
        }
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.channel(kind).tx.receiver_count()
    }
}

impl Default for NodeEventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable control side of a [`Subscription`].
#[derive(Clone)]
pub struct SubscriptionHandle {
    kind: EventKind,
    closed: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl SubscriptionHandle {
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Stop delivery. Safe to call any number of times; returns whether this
    /// call was the one that closed the subscription.
    pub fn unsubscribe(&self) -> bool {
        let first = !self.closed.swap(true, Ordering::SeqCst);
        if first {
            // `notify_one` stores a permit, so a receiver that is not parked
            // yet still wakes up.
            self.wake.notify_one();
        }
        first
    }

    pub fn is_active(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("kind", &self.kind)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Ordered sequence of events of one kind.
pub struct Subscription {
    id: Uuid,
    kind: EventKind,
    rx: broadcast::Receiver<BusEvent>,
    replay: Option<BusEvent>,
    handle: SubscriptionHandle,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn handle(&self) -> SubscriptionHandle {
        self.handle.clone()
    }

    /// Next event of this kind, or `None` once unsubscribed or the bus is gone.
    pub async fn recv(&mut self) -> Option<BusEvent> {
        loop {
            if !self.handle.is_active() {
                return None;
            }
            if let Some(event) = self.replay.take() {
                return Some(event);
            }

            tokio::select! {
                _ = self.handle.wake.notified() => continue,
                result = self.rx.recv() => match result {
                    Ok(event) => {
                        if !self.handle.is_active() {
                            return None;
                        }
                        return Some(event);
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(kind = %self.kind, "subscription lagged, dropped {n} events");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                },
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = BusEvent> + Send + 'static {
        futures::stream::unfold(self, |mut subscription| async move {
            let event = subscription.recv().await?;
            Some((event, subscription))
        })
    }
}
