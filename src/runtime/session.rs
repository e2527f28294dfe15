use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use super::failure::{ErrorRecord, Presentation};
use crate::core::keys::KeyPair;
use crate::core::stage::Stage;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageChange {
    pub from: Stage,
    pub to: Stage,
    pub at: String,
}

/// State of one bring-up attempt.
///
/// `stage` is only changed through [`BootstrapSession::advance`], which the
/// stage controller calls.
#[derive(Debug, Clone)]
pub struct BootstrapSession {
    id: Uuid,
    keys: KeyPair,
    stage: Stage,
    relay_address: Option<String>,
    peer_id: Option<String>,
    download_percent: u8,
    history: Vec<StageChange>,
    started_at: String,
}

impl BootstrapSession {
    pub fn new(keys: KeyPair) -> Self {
        Self {
            id: Uuid::new_v4(),
            keys,
            stage: Stage::Idle,
            relay_address: None,
            peer_id: None,
            download_percent: 0,
            history: Vec::new(),
            started_at: Utc::now().to_rfc3339(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn keys(&self) -> &KeyPair {
        &self.keys
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn relay_address(&self) -> Option<&str> {
        self.relay_address.as_deref()
    }

    pub fn peer_id(&self) -> Option<&str> {
        self.peer_id.as_deref()
    }

    pub fn download_percent(&self) -> u8 {
        self.download_percent
    }

    pub fn history(&self) -> &[StageChange] {
        &self.history
    }

    pub fn started_at(&self) -> &str {
        &self.started_at
    }

    pub(crate) fn advance(&mut self, to: Stage) -> StageChange {
        let change = StageChange {
            from: self.stage,
            to,
            at: Utc::now().to_rfc3339(),
        };
        if to == Stage::DependencyDownloading && self.stage != Stage::DependencyDownloading {
            self.download_percent = 0;
        }
        self.stage = to;
        self.history.push(change.clone());
        change
    }

    /// Set the relay address if none is known yet. Returns true if stored.
    pub(crate) fn set_relay_address(&mut self, address: &str) -> bool {
        let address = address.trim();
        if address.is_empty() || self.relay_address.is_some() {
            return false;
        }
        self.relay_address = Some(address.to_string());
        true
    }

    pub(crate) fn set_peer_id(&mut self, peer_id: &str) -> bool {
        let peer_id = peer_id.trim();
        if peer_id.is_empty() || self.peer_id.is_some() {
            return false;
        }
        self.peer_id = Some(peer_id.to_string());
        true
    }

    /// Raise the download percentage; never lowers it. Returns true if it moved.
    pub(crate) fn record_download_progress(&mut self, percent: u8) -> bool {
        let percent = percent.min(100);
        if percent <= self.download_percent {
            return false;
        }
        self.download_percent = percent;
        true
    }
}

/// Everything handed to the dashboard once the node is ready.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct Handoff {
    pub private_key: String,
    pub public_key: String,
    pub relay_address: Option<String>,
    pub peer_id: Option<String>,
    pub is_leader: bool,
}

impl Handoff {
    pub(crate) fn from_session(session: &BootstrapSession, is_leader: bool) -> Self {
        Self {
            private_key: session.keys().expose_private().to_string(),
            public_key: session.keys().public_key().to_string(),
            relay_address: session.relay_address.clone(),
            peer_id: session.peer_id.clone(),
            is_leader,
        }
    }
}

impl std::fmt::Debug for Handoff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handoff")
            .field("private_key", &"<redacted>")
            .field("public_key", &self.public_key)
            .field("relay_address", &self.relay_address)
            .field("peer_id", &self.peer_id)
            .field("is_leader", &self.is_leader)
            .finish()
    }
}

/// Read-only view of a session, published after every mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub stage: Stage,
    pub public_key: String,
    pub relay_address: Option<String>,
    pub peer_id: Option<String>,
    pub download_percent: u8,
    pub sync_complete: bool,
    pub turn: Option<bool>,
    pub last_status: Option<String>,
    pub last_error: Option<ErrorRecord>,
    pub failure: Option<ErrorRecord>,
    pub presentation: Presentation,
    pub history: Vec<StageChange>,
    pub started_at: String,
    pub abandoned: bool,
}

impl SessionSnapshot {
    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }
}
