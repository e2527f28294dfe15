//! Node process stand-in: a shell script that answers commands on stdin with
//! JSON-line events on stdout, the way a real node build does.

use std::collections::HashMap;
use std::path::PathBuf;

use tempfile::TempDir;
use validator_bootstrap::core::NodeProcessConfig;

/// Events emitted in reply to `begin_dependency_download`, using the legacy
/// event names.
pub const DEPENDENCY_REPLY: &str = r#"
      echo '{"event":"DlPercent","payload":12.5}'
      echo '{"event":"DlPercent","payload":100}'
      echo '{"event":"mongodb","payload":"downloaded"}'
      echo '{"event":"mongodb","payload":"installed"}'
"#;

/// Events emitted in reply to `start_node` for a leader that joins through
/// relay `node-7`. The relay is announced before the node syncs.
pub const LEADER_START_REPLY: &str = r#"
      echo '{"event":"relay","payload":"node-7"}'
      echo '{"event":"peerid","payload":"12D3KooWpeer"}'
      sleep 0.2
      echo '{"event":"turn","payload":"true"}'
      echo '{"event":"status","payload":"Sync message sent"}'
"#;

pub struct ScriptedNode {
    dir: TempDir,
    dependency_reply: String,
    start_reply: String,
}

impl ScriptedNode {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("temp dir"),
            dependency_reply: DEPENDENCY_REPLY.to_string(),
            start_reply: LEADER_START_REPLY.to_string(),
        }
    }

    pub fn on_dependency_download(mut self, reply: &str) -> Self {
        self.dependency_reply = reply.to_string();
        self
    }

    pub fn on_start(mut self, reply: &str) -> Self {
        self.start_reply = reply.to_string();
        self
    }

    /// Write the script and return a process config that runs it. The
    /// script records every command line it receives in `commands.log`.
    pub fn config(&self) -> NodeProcessConfig {
        let log = self.log_path();
        let script = format!(
            r#"while IFS= read -r line; do
  echo "$line" >> '{log}'
  case "$line" in
    *begin_dependency_download*)
{dependency}
      ;;
    *start_node*)
{start}
      ;;
  esac
done
"#,
            log = log.display(),
            dependency = self.dependency_reply,
            start = self.start_reply,
        );
        let path = self.dir.path().join("node.sh");
        std::fs::write(&path, script).expect("write node script");

        NodeProcessConfig {
            program: "sh".to_string(),
            args: vec![path.display().to_string()],
            env: HashMap::new(),
            working_dir: Some(self.dir.path().display().to_string()),
        }
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.path().join("commands.log")
    }

    /// Command lines the script has received so far.
    pub fn received(&self) -> Vec<String> {
        std::fs::read_to_string(self.log_path())
            .map(|raw| raw.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }
}
