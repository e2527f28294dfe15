//! Inbound event system for node process signals.
//!
//! The event bus provides:
//! - One broadcast lane per event kind, in-order within a kind
//! - Explicit subscription handles with idempotent unsubscribe
//! - A configurable replay policy for late subscribers
//!
//! # Architecture
//!
//! Events flow from node process → NodeEventBus → session subscriptions:
//! - `NodeEventBus`: process-wide, shared by the node adapter and sessions
//! - `Subscription`: per-kind ordered sequence owned by one session
//! - `event_types`: wire names and payload decoding

mod event_bus;
pub mod event_types;

pub use event_bus::{BusEvent, NodeEventBus, ReplayPolicy, Subscription, SubscriptionHandle};
pub use event_types::{DependencyState, EventKind, EventParseError, NodeEvent};
