//! Node collaborator backed by a child process speaking JSON lines.
//!
//! Commands are written to the child's stdin, one JSON object per line:
//!
//! ```text
//! {"command":"begin_dependency_download"}
//! {"command":"start_node","private_key":"…","public_key":"…"}
//! ```
//!
//! Events are read from stdout as `{"event": <name>, "payload": <value>}`
//! lines and published on the [`NodeEventBus`]. The memory probe runs
//! locally, since the node shares this host.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{memory, CommandError, CommandKind, NodeCommander};
use crate::bus::{NodeEvent, NodeEventBus};
use crate::core::config::NodeProcessConfig;
use crate::core::keys::KeyPair;

pub const NODE_EXITED_MESSAGE: &str = "node process exited";

#[derive(Debug, Deserialize)]
struct WireEvent {
    event: String,
    #[serde(default)]
    payload: serde_json::Value,
}

/// Decode one stdout line into a typed event.
pub fn decode_line(line: &str) -> Result<NodeEvent, String> {
    let wire: WireEvent =
        serde_json::from_str(line).map_err(|e| format!("malformed node output: {e}"))?;
    NodeEvent::from_wire(&wire.event, &wire.payload).map_err(|e| e.to_string())
}

pub struct ProcessNode {
    process: Arc<Mutex<Child>>,
    stdin: Arc<Mutex<ChildStdin>>,
    bus: Arc<NodeEventBus>,
    stdout_task: JoinHandle<()>,
    stderr_task: JoinHandle<()>,
    min_memory_gib: u64,
    program: String,
}

impl ProcessNode {
    /// Launch the node process and start forwarding its events to `bus`.
    pub fn spawn(
        config: &NodeProcessConfig,
        bus: Arc<NodeEventBus>,
        min_memory_gib: u64,
    ) -> Result<Self, CommandError> {
        info!("spawning node process: {}", config.program);

        let mut cmd = Command::new(&config.program);
        cmd.args(&config.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        for (key, value) in &config.env {
            cmd.env(key, value);
        }

        if let Some(dir) = &config.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            CommandError::Unavailable(format!("failed to spawn '{}': {e}", config.program))
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CommandError::Unavailable("failed to capture stdout".to_string()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| CommandError::Unavailable("failed to capture stdin".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| CommandError::Unavailable("failed to capture stderr".to_string()))?;

        let events = bus.clone();
        let stdout_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        match decode_line(line) {
                            Ok(event) => {
                                events.publish(event);
                            }
                            Err(e) => warn!("skipping node output line: {e}"),
                        }
                    }
                    Ok(None) => {
                        events.publish(NodeEvent::Error(NODE_EXITED_MESSAGE.to_string()));
                        break;
                    }
                    Err(e) => {
                        events.publish(NodeEvent::Error(format!("failed to read node output: {e}")));
                        break;
                    }
                }
            }
        });

        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!("node stderr: {}", line);
            }
        });

        Ok(Self {
            process: Arc::new(Mutex::new(child)),
            stdin: Arc::new(Mutex::new(stdin)),
            bus,
            stdout_task,
            stderr_task,
            min_memory_gib,
            program: config.program.clone(),
        })
    }

    async fn write_command(
        &self,
        command: CommandKind,
        message: serde_json::Value,
    ) -> Result<(), CommandError> {
        let framed = format!("{message}\n");
        let rejected = |e: std::io::Error| CommandError::Rejected {
            command,
            message: e.to_string(),
        };

        let mut stdin = self.stdin.lock().await;
        stdin.write_all(framed.as_bytes()).await.map_err(rejected)?;
        stdin.flush().await.map_err(rejected)?;
        Ok(())
    }

    /// Terminate the child process. The node's lifecycle is otherwise
    /// independent of any bootstrap session.
    pub async fn shutdown(&self) {
        let mut child = self.process.lock().await;
        if let Err(e) = child.kill().await {
            warn!("failed to stop node process {}: {e}", self.program);
        }
    }
}

#[async_trait]
impl NodeCommander for ProcessNode {
    async fn probe_memory(&self) -> Result<(), CommandError> {
        let min_gib = self.min_memory_gib;
        let sufficient = tokio::task::spawn_blocking(move || memory::has_sufficient_memory(min_gib))
            .await
            .map_err(|e| CommandError::Unavailable(format!("memory probe failed: {e}")))?;
        self.bus.publish(NodeEvent::MemoryProbe { sufficient });
        Ok(())
    }

    async fn begin_dependency_download(&self) -> Result<(), CommandError> {
        self.write_command(
            CommandKind::BeginDependencyDownload,
            serde_json::json!({ "command": CommandKind::BeginDependencyDownload.as_str() }),
        )
        .await
    }

    async fn start_node(&self, keys: &KeyPair) -> Result<(), CommandError> {
        info!(public = %keys.fingerprint(), "starting node");
        self.write_command(
            CommandKind::StartNode,
            serde_json::json!({
                "command": CommandKind::StartNode.as_str(),
                "private_key": keys.expose_private(),
                "public_key": keys.public_key(),
            }),
        )
        .await
    }
}

impl Drop for ProcessNode {
    fn drop(&mut self) {
        self.stdout_task.abort();
        self.stderr_task.abort();
        info!("node process handle dropped: {}", self.program);
    }
}
