use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bus::ReplayPolicy;
use crate::core::stage::Stage;

pub const CONFIG_PATH_ENV: &str = "BOOTSTRAP_CONFIG";

pub const DEFAULT_MIN_MEMORY_GIB: u64 = 4;
pub const DEFAULT_SYNC_MARKER: &str = "Sync message sent";
pub const DEFAULT_BUS_CAPACITY: usize = 256;
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid value for {key}: {value}")]
    Env { key: String, value: String },
}

/// How to launch the external validator node process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeProcessConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub working_dir: Option<String>,
}

/// Optional limits on how long a session may sit in one stage.
///
/// Unset entries mean "wait indefinitely".
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageTimeouts {
    #[serde(default)]
    pub memory_check_ms: Option<u64>,
    #[serde(default)]
    pub download_ms: Option<u64>,
    #[serde(default)]
    pub install_ms: Option<u64>,
    #[serde(default)]
    pub node_start_ms: Option<u64>,
    #[serde(default)]
    pub relay_ms: Option<u64>,
    #[serde(default)]
    pub sync_ms: Option<u64>,
}

impl StageTimeouts {
    pub fn for_stage(&self, stage: Stage) -> Option<Duration> {
        let ms = match stage {
            Stage::MemoryChecking => self.memory_check_ms,
            Stage::DependencyDownloading => self.download_ms,
            Stage::DependencyInstalling => self.install_ms,
            Stage::NodeStarting => self.node_start_ms,
            Stage::RelayConnecting => self.relay_ms,
            Stage::Syncing => self.sync_ms,
            _ => None,
        };
        ms.map(Duration::from_millis)
    }

    pub fn is_empty(&self) -> bool {
        Stage::all().iter().all(|stage| self.for_stage(*stage).is_none())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapConfig {
    #[serde(default = "default_min_memory_gib")]
    pub min_memory_gib: u64,
    #[serde(default = "default_sync_marker")]
    pub sync_marker: String,
    #[serde(default)]
    pub replay: ReplayPolicy,
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    #[serde(default)]
    pub stage_timeouts: StageTimeouts,
    #[serde(default)]
    pub node: Option<NodeProcessConfig>,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            min_memory_gib: default_min_memory_gib(),
            sync_marker: default_sync_marker(),
            replay: ReplayPolicy::default(),
            bus_capacity: default_bus_capacity(),
            command_timeout_ms: default_command_timeout_ms(),
            stage_timeouts: StageTimeouts::default(),
            node: None,
        }
    }
}

fn default_min_memory_gib() -> u64 {
    DEFAULT_MIN_MEMORY_GIB
}

fn default_sync_marker() -> String {
    DEFAULT_SYNC_MARKER.to_string()
}

fn default_bus_capacity() -> usize {
    DEFAULT_BUS_CAPACITY
}

fn default_command_timeout_ms() -> u64 {
    DEFAULT_COMMAND_TIMEOUT_MS
}

impl BootstrapConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    /// Load from the file named by `BOOTSTRAP_CONFIG` (if any), then apply
    /// `BOOTSTRAP_*` environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(Path::new(path.trim()))?,
            _ => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(value) = get("BOOTSTRAP_MIN_MEMORY_GIB") {
            self.min_memory_gib = parse_env("BOOTSTRAP_MIN_MEMORY_GIB", &value)?;
        }
        if let Some(value) = get("BOOTSTRAP_SYNC_MARKER") {
            self.sync_marker = value;
        }
        if let Some(value) = get("BOOTSTRAP_REPLAY") {
            self.replay = value.parse().map_err(|_| ConfigError::Env {
                key: "BOOTSTRAP_REPLAY".to_string(),
                value,
            })?;
        }
        if let Some(value) = get("BOOTSTRAP_COMMAND_TIMEOUT_MS") {
            self.command_timeout_ms = parse_env("BOOTSTRAP_COMMAND_TIMEOUT_MS", &value)?;
        }
        if let Some(program) = get("BOOTSTRAP_NODE_PROGRAM") {
            match self.node.as_mut() {
                Some(node) => node.program = program,
                None => {
                    self.node = Some(NodeProcessConfig {
                        program,
                        args: Vec::new(),
                        env: HashMap::new(),
                        working_dir: None,
                    })
                }
            }
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Env {
        key: key.to_string(),
        value: value.to_string(),
    })
}
