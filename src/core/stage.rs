use serde::{Deserialize, Serialize};

/// Discrete phase of a bootstrap session.
///
/// Stages only move forward, except for the jump to `Failed`. `MemoryFailed`,
/// `Ready` and `Failed` are terminal and absorb every later input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Idle,
    MemoryChecking,
    MemoryFailed,
    MemoryOk,
    AwaitingStart,
    DependencyDownloading,
    DependencyInstalling,
    NodeStarting,
    RelayConnecting,
    Syncing,
    Ready,
    Failed,
}

impl Stage {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::MemoryChecking => "memory_checking",
            Self::MemoryFailed => "memory_failed",
            Self::MemoryOk => "memory_ok",
            Self::AwaitingStart => "awaiting_start",
            Self::DependencyDownloading => "dependency_downloading",
            Self::DependencyInstalling => "dependency_installing",
            Self::NodeStarting => "node_starting",
            Self::RelayConnecting => "relay_connecting",
            Self::Syncing => "syncing",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }

    pub const fn all() -> &'static [Stage] {
        &[
            Stage::Idle,
            Stage::MemoryChecking,
            Stage::MemoryFailed,
            Stage::MemoryOk,
            Stage::AwaitingStart,
            Stage::DependencyDownloading,
            Stage::DependencyInstalling,
            Stage::NodeStarting,
            Stage::RelayConnecting,
            Stage::Syncing,
            Stage::Ready,
            Stage::Failed,
        ]
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::MemoryFailed | Self::Ready | Self::Failed)
    }

    /// Position along the happy path. Terminal failure stages share the rank
    /// of the furthest stage so that "has the session got past X" checks stay
    /// simple.
    pub const fn rank(&self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::MemoryChecking => 1,
            Self::MemoryOk => 2,
            Self::AwaitingStart => 3,
            Self::DependencyDownloading => 4,
            Self::DependencyInstalling => 5,
            Self::NodeStarting => 6,
            Self::RelayConnecting => 7,
            Self::Syncing => 8,
            Self::Ready | Self::MemoryFailed | Self::Failed => 9,
        }
    }

    /// Whether the external node process has been asked to launch.
    pub const fn node_launched(&self) -> bool {
        matches!(
            self,
            Self::NodeStarting | Self::RelayConnecting | Self::Syncing
        )
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::all()
            .iter()
            .copied()
            .find(|stage| stage.as_str() == s.trim())
            .ok_or_else(|| format!("unknown bootstrap stage: {s}"))
    }
}
