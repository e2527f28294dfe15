//! Inbound event kinds and their wire decoding.
//!
//! Single source of truth for the event names the node process emits,
//! including the legacy aliases older node builds still send.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Wire names
// ---------------------------------------------------------------------------

pub const EVENT_MEMORY_PROBE: &str = "memory_probe";
pub const EVENT_DOWNLOAD_PROGRESS: &str = "download_progress";
pub const EVENT_DEPENDENCY_STATE: &str = "dependency_state";
pub const EVENT_STATUS: &str = "status";
pub const EVENT_RELAY: &str = "relay";
pub const EVENT_PEER_ID: &str = "peer_id";
pub const EVENT_TURN: &str = "turn";
pub const EVENT_ERROR: &str = "error";

const LEGACY_DOWNLOAD_PROGRESS: &str = "DlPercent";
const LEGACY_DEPENDENCY_STATE: &str = "mongodb";
const LEGACY_PEER_ID: &str = "peerid";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventParseError {
    #[error("unknown event kind: {0}")]
    UnknownKind(String),
    #[error("invalid payload for {kind}: {payload}")]
    InvalidPayload { kind: EventKind, payload: String },
}

// ---------------------------------------------------------------------------
// Kinds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    MemoryProbe,
    DownloadProgress,
    DependencyState,
    Status,
    Relay,
    PeerId,
    Turn,
    Error,
}

impl EventKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MemoryProbe => EVENT_MEMORY_PROBE,
            Self::DownloadProgress => EVENT_DOWNLOAD_PROGRESS,
            Self::DependencyState => EVENT_DEPENDENCY_STATE,
            Self::Status => EVENT_STATUS,
            Self::Relay => EVENT_RELAY,
            Self::PeerId => EVENT_PEER_ID,
            Self::Turn => EVENT_TURN,
            Self::Error => EVENT_ERROR,
        }
    }

    pub const fn all() -> &'static [EventKind] {
        &[
            EventKind::MemoryProbe,
            EventKind::DownloadProgress,
            EventKind::DependencyState,
            EventKind::Status,
            EventKind::Relay,
            EventKind::PeerId,
            EventKind::Turn,
            EventKind::Error,
        ]
    }

    pub const fn is_error_class(&self) -> bool {
        matches!(self, Self::Error)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = EventParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            EVENT_MEMORY_PROBE => Ok(Self::MemoryProbe),
            EVENT_DOWNLOAD_PROGRESS | LEGACY_DOWNLOAD_PROGRESS => Ok(Self::DownloadProgress),
            EVENT_DEPENDENCY_STATE | LEGACY_DEPENDENCY_STATE => Ok(Self::DependencyState),
            EVENT_STATUS => Ok(Self::Status),
            EVENT_RELAY => Ok(Self::Relay),
            EVENT_PEER_ID | LEGACY_PEER_ID => Ok(Self::PeerId),
            EVENT_TURN => Ok(Self::Turn),
            EVENT_ERROR => Ok(Self::Error),
            other => Err(EventParseError::UnknownKind(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyState {
    Downloaded,
    Installed,
}

/// A typed event emitted by the external node process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum NodeEvent {
    MemoryProbe { sufficient: bool },
    DownloadProgress(u8),
    DependencyState(DependencyState),
    Status(String),
    Relay(String),
    PeerId(String),
    Turn { is_leader: bool },
    Error(String),
}

impl NodeEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::MemoryProbe { .. } => EventKind::MemoryProbe,
            Self::DownloadProgress(_) => EventKind::DownloadProgress,
            Self::DependencyState(_) => EventKind::DependencyState,
            Self::Status(_) => EventKind::Status,
            Self::Relay(_) => EventKind::Relay,
            Self::PeerId(_) => EventKind::PeerId,
            Self::Turn { .. } => EventKind::Turn,
            Self::Error(_) => EventKind::Error,
        }
    }

    /// Decode one `{event, payload}` pair as written by the node process.
    ///
    /// A dependency-state payload that is neither `downloaded` nor `installed`
    /// is the node reporting an install failure, so it decodes as an error.
    pub fn from_wire(name: &str, payload: &serde_json::Value) -> Result<Self, EventParseError> {
        let kind: EventKind = name.parse()?;
        let invalid = || EventParseError::InvalidPayload {
            kind,
            payload: payload.to_string(),
        };

        match kind {
            EventKind::MemoryProbe => payload
                .as_bool()
                .map(|sufficient| Self::MemoryProbe { sufficient })
                .ok_or_else(invalid),
            EventKind::DownloadProgress => {
                let raw = payload.as_f64().ok_or_else(invalid)?;
                if !raw.is_finite() {
                    return Err(invalid());
                }
                Ok(Self::DownloadProgress(raw.round().clamp(0.0, 100.0) as u8))
            }
            EventKind::DependencyState => {
                let text = payload.as_str().ok_or_else(invalid)?;
                Ok(match text.trim() {
                    "downloaded" => Self::DependencyState(DependencyState::Downloaded),
                    "installed" => Self::DependencyState(DependencyState::Installed),
                    other => Self::Error(other.to_string()),
                })
            }
            EventKind::Status => text_payload(payload).map(Self::Status).ok_or_else(invalid),
            EventKind::Relay => text_payload(payload).map(Self::Relay).ok_or_else(invalid),
            EventKind::PeerId => text_payload(payload).map(Self::PeerId).ok_or_else(invalid),
            EventKind::Error => text_payload(payload).map(Self::Error).ok_or_else(invalid),
            EventKind::Turn => {
                let is_leader = match payload {
                    serde_json::Value::Bool(value) => *value,
                    serde_json::Value::String(text) => match text.trim() {
                        "true" => true,
                        "false" => false,
                        _ => return Err(invalid()),
                    },
                    _ => return Err(invalid()),
                };
                Ok(Self::Turn { is_leader })
            }
        }
    }
}

fn text_payload(payload: &serde_json::Value) -> Option<String> {
    match payload {
        serde_json::Value::String(text) => Some(text.clone()),
        serde_json::Value::Null => None,
        other => Some(other.to_string()),
    }
}
