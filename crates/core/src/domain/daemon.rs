use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Connection info for a running daemon, persisted as `~/.foreman/daemon.yaml`
/// so sibling CLIs can discover the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonInfo {
  pub version: u32,
  pub host: String,
  pub port: u16,
  pub pid: u32,
  pub started_at: DateTime<Utc>,
}

impl DaemonInfo {
  pub fn new(host: impl Into<String>, port: u16, pid: u32) -> Self {
    Self {
      version: 1,
      host: host.into(),
      port,
      pid,
      started_at: Utc::now(),
    }
  }
}

/// One running agent in the best-effort state snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunningAgentInfo {
  pub project_id: String,
  pub project_name: String,
  pub project_path: String,
  pub mode: String,
  pub task_number: u32,
  #[serde(default)]
  pub task_title: String,
}

/// Snapshot of currently running agents, persisted as `~/.foreman/agents.yaml`
/// on every start/stop/exit transition. Purely informational; losing it does
/// not affect supervisor correctness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStateSnapshot {
  pub version: u32,
  pub updated_at: DateTime<Utc>,
  #[serde(default)]
  pub agents: Vec<RunningAgentInfo>,
}

impl AgentStateSnapshot {
  pub fn new(agents: Vec<RunningAgentInfo>) -> Self {
    Self {
      version: 1,
      updated_at: Utc::now(),
      agents,
    }
  }
}
