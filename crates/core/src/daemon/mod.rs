//! Daemon assembly: supervisor + watcher + router + RPC server, plus the
//! discovery file sibling CLIs use to find the port.

pub mod api;
pub mod events;
pub mod server;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use jsonrpsee::server::ServerHandle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::agent::supervisor::{AgentSupervisor, ChainDecision};
use crate::chain;
use crate::config::paths::{ensure_global_dir, global_dir};
use crate::domain::daemon::DaemonInfo;
use crate::domain::task::TaskStatus;
use crate::git::worktree::{merge_workspace, remove_workspace};
use crate::store::projects::{load_project, load_projects_index};
use crate::store::state::{remove_daemon_info, save_daemon_info};
use crate::store::tasks::load_task;
use crate::tasks::TaskManager;
use crate::watcher::ProjectWatcher;

/// Shared context handed to every RPC handler.
pub struct DaemonState {
  pub supervisor: Arc<AgentSupervisor>,
  pub watcher: Arc<ProjectWatcher>,
  pub tasks: TaskManager,
  pub host: String,
  pub port: u16,
  pub started_at: DateTime<Utc>,
  pub shutdown_tx: watch::Sender<bool>,
}

/// Handle to a running daemon.
pub struct DaemonHandle {
  host: String,
  port: u16,
  supervisor: Arc<AgentSupervisor>,
  // Keeps the watcher (and therefore the router's event stream) alive.
  _watcher: Arc<ProjectWatcher>,
  server_handle: ServerHandle,
  router: JoinHandle<()>,
  shutdown_rx: watch::Receiver<bool>,
}

impl DaemonHandle {
  pub fn host(&self) -> &str {
    &self.host
  }

  pub fn port(&self) -> u16 {
    self.port
  }

  /// Resolves when a shutdown was requested over RPC.
  pub async fn wait_shutdown(&self) {
    let mut rx = self.shutdown_rx.clone();
    let _ = rx.wait_for(|requested| *requested).await;
  }

  /// Graceful teardown: stop routing watcher events first (no new task-done
  /// stops mid-shutdown), then stop every agent, then the RPC server.
  pub async fn shutdown(self) {
    info!(event = "daemon_stopping", "beginning graceful shutdown");
    self.router.abort();
    self.supervisor.stop_all().await;
    let _ = self.server_handle.stop();
    self.server_handle.stopped().await;
    if let Err(err) = remove_daemon_info() {
      warn!(event = "daemon_info_remove_failed", error = %err);
    }
    info!(event = "daemon_stopped", "daemon shut down");
  }
}

/// Boot the daemon: watcher, supervisor wiring, RPC server, discovery file.
pub async fn start(port: u16) -> Result<DaemonHandle> {
  ensure_global_dir()?;

  let supervisor = AgentSupervisor::new();
  let (watcher, events_rx) = ProjectWatcher::spawn()?;
  watcher.watch_global(&global_dir()?);

  // Watch every registered project up front; agents re-register on start to
  // pick up directories created later.
  match load_projects_index() {
    Ok(index) => {
      for entry in &index.projects {
        watcher.watch_project(&entry.project_id, Path::new(&entry.path));
      }
    }
    Err(err) => warn!(event = "projects_index_load_failed", error = %err),
  }

  wire_supervisor(&supervisor, &watcher);

  let (srv, addr) = server::bind(port).await?;
  let (shutdown_tx, shutdown_rx) = watch::channel(false);
  let state = DaemonState {
    supervisor: Arc::clone(&supervisor),
    watcher: Arc::clone(&watcher),
    tasks: TaskManager::new(),
    host: "127.0.0.1".to_string(),
    port: addr.port(),
    started_at: Utc::now(),
    shutdown_tx,
  };
  let server_handle = server::start(srv, state);

  save_daemon_info(&DaemonInfo::new("127.0.0.1", addr.port(), std::process::id()))?;
  let router = events::spawn_router(Arc::clone(&supervisor), events_rx);

  info!(event = "daemon_started", port = addr.port(), pid = std::process::id(), "daemon ready");

  Ok(DaemonHandle {
    host: "127.0.0.1".to_string(),
    port: addr.port(),
    supervisor,
    _watcher: watcher,
    server_handle,
    router,
    shutdown_rx,
  })
}

/// Install the supervisor's callbacks: project re-watching, the post-task
/// merge handler, and the chain driver.
fn wire_supervisor(supervisor: &Arc<AgentSupervisor>, watcher: &Arc<ProjectWatcher>) {
  let watch = Arc::clone(watcher);
  supervisor.set_watch_project_fn(move |project_id, project_root| {
    watch.watch_project(project_id, project_root);
  });

  supervisor.set_next_task_fn(|project_id, project_root, mode, phase, rows, cols| {
    chain::next_start_options(project_id, project_root, mode, phase, rows, cols)
  });

  supervisor.set_task_done_fn(task_done_handler);
}

/// Post-task handler run after every task-bearing agent exits: merge the
/// workspace and clean it up according to the project's automation flags.
/// Returns whether a chaining campaign may continue.
pub fn task_done_handler(
  project_root: &Path,
  task_number: u32,
  workspace: Option<&Path>,
) -> ChainDecision {
  if task_number == 0 || workspace.is_none() {
    return ChainDecision::Continue;
  }

  let project = match load_project(project_root) {
    Ok(Some(project)) => project,
    Ok(None) | Err(_) => {
      warn!(
        event = "task_done_no_project",
        root = %project_root.display(),
        task_number,
        "cannot run post-task handling without project config"
      );
      return ChainDecision::Stop;
    }
  };

  let task = match load_task(project_root, task_number) {
    Ok(Some(task)) => task,
    Ok(None) | Err(_) => {
      warn!(event = "task_done_no_task", task_number, "task file unreadable after exit");
      return ChainDecision::Stop;
    }
  };
  if task.status != TaskStatus::Done {
    info!(
      event = "task_done_skipped",
      task_number,
      status = %task.status,
      "agent exited without finishing the task; leaving workspace in place"
    );
    return ChainDecision::Continue;
  }

  let mut merged = false;
  let mut merge_failed = false;
  if project.auto_merge {
    match merge_workspace(project_root, task_number, &project.default_branch) {
      Ok(did_merge) => merged = did_merge,
      Err(err) => {
        warn!(event = "auto_merge_failed", task_number, error = %err, "merge failed; preserving workspace and branch");
        merge_failed = true;
      }
    }
  }

  // A failed merge keeps everything for inspection; cleanup only runs on
  // healthy outcomes.
  if project.auto_delete_workspace && !merge_failed {
    if let Err(err) = remove_workspace(project_root, task_number, merged) {
      warn!(event = "workspace_cleanup_failed", task_number, error = %err);
    }
  }

  if merge_failed { ChainDecision::Stop } else { ChainDecision::Continue }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::project::Project;
  use crate::git::testutil::{init_repo, run_git};
  use crate::git::worktree::{ensure_workspace, workspace_path};
  use crate::store::projects::save_project;
  use crate::store::tasks::save_task;
  use crate::domain::task::Task;

  fn project_with_flags(root: &Path, auto_merge: bool, auto_delete: bool) {
    let mut project = Project::new("pid-1", "demo");
    project.auto_merge = auto_merge;
    project.auto_delete_workspace = auto_delete;
    save_project(root, &project).unwrap();
  }

  fn done_task(root: &Path, number: u32) {
    let mut task = Task::new("t", number, "title", "prompt");
    task.mark_done(true, "");
    save_task(root, &task).unwrap();
  }

  #[test]
  fn handler_continues_without_task_or_workspace() {
    let dir = tempfile::tempdir().unwrap();
    assert_eq!(task_done_handler(dir.path(), 0, None), ChainDecision::Continue);
    assert_eq!(task_done_handler(dir.path(), 3, None), ChainDecision::Continue);
  }

  #[test]
  fn handler_merges_and_cleans_up_done_task() {
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path());
    project_with_flags(dir.path(), true, true);
    done_task(dir.path(), 1);

    let wt = ensure_workspace(dir.path(), 1).unwrap();
    std::fs::write(wt.join("result.txt"), "ok\n").unwrap();
    run_git(&wt, &["add", "."]);
    run_git(&wt, &["commit", "-m", "task work"]);

    let decision = task_done_handler(dir.path(), 1, Some(&wt));
    assert_eq!(decision, ChainDecision::Continue);
    assert!(dir.path().join("result.txt").exists(), "merge landed on main");
    assert!(!workspace_path(dir.path(), 1).exists(), "workspace removed");
  }

  #[test]
  fn handler_stops_chain_on_merge_conflict() {
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path());
    project_with_flags(dir.path(), true, true);
    done_task(dir.path(), 2);

    let wt = ensure_workspace(dir.path(), 2).unwrap();
    std::fs::write(wt.join("README.md"), "workspace\n").unwrap();
    run_git(&wt, &["add", "."]);
    run_git(&wt, &["commit", "-m", "ws"]);
    std::fs::write(dir.path().join("README.md"), "main\n").unwrap();
    run_git(dir.path(), &["add", "."]);
    run_git(dir.path(), &["commit", "-m", "main"]);

    let decision = task_done_handler(dir.path(), 2, Some(&wt));
    assert_eq!(decision, ChainDecision::Stop);
    assert!(workspace_path(dir.path(), 2).exists(), "workspace preserved on failure");
  }

  #[test]
  fn handler_skips_merge_for_unfinished_task() {
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path());
    project_with_flags(dir.path(), true, true);
    save_task(dir.path(), &Task::new("t", 3, "title", "prompt")).unwrap();
    let wt = ensure_workspace(dir.path(), 3).unwrap();

    let decision = task_done_handler(dir.path(), 3, Some(&wt));
    assert_eq!(decision, ChainDecision::Continue);
    assert!(workspace_path(dir.path(), 3).exists(), "workspace kept for unfinished task");
  }

  #[test]
  fn handler_respects_disabled_automation() {
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path());
    project_with_flags(dir.path(), false, false);
    done_task(dir.path(), 4);
    let wt = ensure_workspace(dir.path(), 4).unwrap();
    std::fs::write(wt.join("f.txt"), "x\n").unwrap();
    run_git(&wt, &["add", "."]);
    run_git(&wt, &["commit", "-m", "work"]);

    let decision = task_done_handler(dir.path(), 4, Some(&wt));
    assert_eq!(decision, ChainDecision::Continue);
    assert!(!dir.path().join("f.txt").exists(), "no auto-merge");
    assert!(workspace_path(dir.path(), 4).exists(), "no auto-delete");
  }
}
