//! Common test utilities for bootstrap integration tests.

pub mod scripted_node;

pub use scripted_node::ScriptedNode;
