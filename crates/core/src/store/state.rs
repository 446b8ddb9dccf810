use std::fs;

use anyhow::Result;
use tracing::debug;

use crate::config::paths::{ensure_global_dir, global_agent_state_file, global_daemon_file};
use crate::domain::daemon::{AgentStateSnapshot, DaemonInfo, RunningAgentInfo};

use super::yaml::{load_yaml, save_yaml};

pub fn save_daemon_info(info: &DaemonInfo) -> Result<()> {
  ensure_global_dir()?;
  save_yaml(&global_daemon_file()?, info)
}

/// Load `~/.foreman/daemon.yaml`. `Ok(None)` when no daemon has written it.
pub fn load_daemon_info() -> Result<Option<DaemonInfo>> {
  let path = global_daemon_file()?;
  if !path.exists() {
    return Ok(None);
  }
  Ok(Some(load_yaml(&path)?))
}

pub fn remove_daemon_info() -> Result<()> {
  let path = global_daemon_file()?;
  if path.exists() {
    fs::remove_file(&path)?;
  }
  Ok(())
}

/// Check whether a daemon is alive: the info file exists and its PID responds
/// to signal 0. A stale file is removed as a side effect.
pub fn is_daemon_running() -> Result<(bool, Option<DaemonInfo>)> {
  let Some(info) = load_daemon_info()? else {
    return Ok((false, None));
  };
  let alive = unsafe { libc::kill(info.pid as libc::pid_t, 0) == 0 };
  if !alive {
    debug!(event = "stale_daemon_info", pid = info.pid, "removing stale daemon.yaml");
    let _ = remove_daemon_info();
    return Ok((false, Some(info)));
  }
  Ok((true, Some(info)))
}

/// Best-effort snapshot of running agents for out-of-process introspection.
pub fn save_agent_state(agents: Vec<RunningAgentInfo>) -> Result<()> {
  ensure_global_dir()?;
  save_yaml(&global_agent_state_file()?, &AgentStateSnapshot::new(agents))
}
