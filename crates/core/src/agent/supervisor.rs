//! The agent supervisor: owns the {project -> running agent} map and the
//! full lifecycle around it.
//!
//! Lock discipline: the map is behind a `parking_lot::RwLock` whose guards
//! are never held across an await or a callback into external code. Every
//! blocking transition (stopping a predecessor, merge hooks, chain lookups)
//! releases the lock, does its work, then re-acquires and re-validates the
//! slot by process identity before mutating it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::paths::project_dir;
use crate::config::settings::Settings;
use crate::domain::daemon::RunningAgentInfo;
use crate::domain::task::TaskStatus;
use crate::git::worktree::ensure_workspace;
use crate::store::{logs, state, tasks as task_store};
use crate::tasks::TaskManager;
use crate::watcher::marker_file_for_phase;

use super::process::{AgentProcess, ProcessOptions};
use super::resolve::resolve_agent_binary;
use super::sandbox::wrap_command;
use super::{Mode, StartOptions, WildfirePhase};

const TASK_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MARKER_POLL_INTERVAL: Duration = Duration::from_secs(3);
/// How long StartAgent waits for a predecessor's exit monitor to clear the
/// slot: 100 polls of 100ms.
const REPLACE_POLLS: u32 = 100;
const REPLACE_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum SupervisorError {
  #[error("agent binary not found; install it or set its path in ~/.foreman/settings.yaml")]
  BinaryNotFound,
  #[error("failed to spawn agent process: {0}")]
  SpawnFailed(String),
  #[error("timed out waiting for the previous agent to stop")]
  StopTimeout,
  #[error("no agent running for project: {0}")]
  NotRunning(String),
  #[error("agent working on task #{actual:04}, not #{requested:04}")]
  TaskMismatch { requested: u32, actual: u32 },
  #[error("failed to create workspace: {0}")]
  WorkspaceCreate(String),
  #[error(transparent)]
  Other(#[from] anyhow::Error),
}

/// Verdict of the task-done handler: whether a chaining campaign may proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainDecision {
  Continue,
  Stop,
}

/// An agent session currently running for a project. In-memory only.
pub struct RunningAgent {
  pub project_id: String,
  pub project_name: String,
  pub project_root: PathBuf,
  pub project_color: String,
  pub mode: Mode,
  pub wildfire_phase: Option<WildfirePhase>,
  /// 0 when the session has no task.
  pub task_number: u32,
  pub task_title: String,
  /// Set when the session runs inside an isolated workspace.
  pub workspace_path: Option<PathBuf>,
  pub process: Arc<AgentProcess>,
  user_stopped: AtomicBool,
}

impl RunningAgent {
  /// True when the user (or a replacement start) stopped this agent, which
  /// inhibits chaining.
  pub fn user_stopped(&self) -> bool {
    self.user_stopped.load(Ordering::SeqCst)
  }

  fn mark_user_stopped(&self) {
    self.user_stopped.store(true, Ordering::SeqCst);
  }
}

type NextTaskFn = dyn Fn(&str, &Path, Mode, Option<WildfirePhase>, u16, u16) -> anyhow::Result<Option<StartOptions>>
  + Send
  + Sync;
type TaskDoneFn = dyn Fn(&Path, u32, Option<&Path>) -> ChainDecision + Send + Sync;
type WatchProjectFn = dyn Fn(&str, &Path) + Send + Sync;
type ChangeFn = dyn Fn() + Send + Sync;

#[derive(Default)]
struct Hooks {
  next_task: Option<Arc<NextTaskFn>>,
  task_done: Option<Arc<TaskDoneFn>>,
  watch_project: Option<Arc<WatchProjectFn>>,
  on_change: Option<Arc<ChangeFn>>,
}

pub struct AgentSupervisor {
  agents: RwLock<HashMap<String, Arc<RunningAgent>>>,
  hooks: RwLock<Hooks>,
  /// Serializes StartAgent calls so two concurrent starts cannot both pass
  /// the replacement check. Exit monitors never take this lock.
  start_lock: tokio::sync::Mutex<()>,
}

impl AgentSupervisor {
  pub fn new() -> Arc<Self> {
    Arc::new(Self {
      agents: RwLock::new(HashMap::new()),
      hooks: RwLock::new(Hooks::default()),
      start_lock: tokio::sync::Mutex::new(()),
    })
  }

  /// Install the chain-driver callback used by start-all and wildfire modes.
  pub fn set_next_task_fn<F>(&self, f: F)
  where
    F: Fn(&str, &Path, Mode, Option<WildfirePhase>, u16, u16) -> anyhow::Result<Option<StartOptions>>
      + Send
      + Sync
      + 'static,
  {
    self.hooks.write().next_task = Some(Arc::new(f));
  }

  /// Install the post-task handler (merge + workspace cleanup). It returns
  /// whether chaining may continue.
  pub fn set_task_done_fn<F>(&self, f: F)
  where
    F: Fn(&Path, u32, Option<&Path>) -> ChainDecision + Send + Sync + 'static,
  {
    self.hooks.write().task_done = Some(Arc::new(f));
  }

  /// Install the callback that (re-)registers a project with the watcher.
  pub fn set_watch_project_fn<F>(&self, f: F)
  where
    F: Fn(&str, &Path) + Send + Sync + 'static,
  {
    self.hooks.write().watch_project = Some(Arc::new(f));
  }

  /// Install a listener fired on every agent state transition. Always invoked
  /// on a detached task so re-entrant supervisor calls cannot deadlock.
  pub fn set_on_change<F>(&self, f: F)
  where
    F: Fn() + Send + Sync + 'static,
  {
    self.hooks.write().on_change = Some(Arc::new(f));
  }

  pub fn get_agent(&self, project_id: &str) -> Option<Arc<RunningAgent>> {
    self.agents.read().get(project_id).cloned()
  }

  pub fn list_agents(&self) -> Vec<Arc<RunningAgent>> {
    self.agents.read().values().cloned().collect()
  }

  pub fn active_count(&self) -> usize {
    self.agents.read().len()
  }

  /// Start an agent for a project, replacing any running one.
  pub async fn start_agent(
    self: &Arc<Self>,
    opts: StartOptions,
  ) -> Result<Arc<RunningAgent>, SupervisorError> {
    let _serialize = self.start_lock.lock().await;

    // Replace a running predecessor: mark it user-stopped so its campaign
    // does not chain, stop it, then wait for its exit monitor to vacate the
    // slot.
    let existing = self.agents.read().get(&opts.project_id).cloned();
    if let Some(existing) = existing {
      info!(
        event = "agent_replacing",
        project_id = %opts.project_id,
        old_mode = %existing.mode,
        "stopping previous agent before start"
      );
      existing.mark_user_stopped();
      existing.process.stop().await;

      let mut vacated = false;
      for _ in 0..REPLACE_POLLS {
        if !self.agents.read().contains_key(&opts.project_id) {
          vacated = true;
          break;
        }
        tokio::time::sleep(REPLACE_POLL_INTERVAL).await;
      }
      if !vacated {
        return Err(SupervisorError::StopTimeout);
      }
    }

    // Re-watch the project: directories like .foreman/tasks/ may have been
    // created since the watcher first registered it.
    let watch_hook = self.hooks.read().watch_project.clone();
    if let Some(hook) = watch_hook {
      hook(&opts.project_id, &opts.project_root);
    }

    let settings = Settings::load()?;
    let binary = resolve_agent_binary(&settings, &settings.defaults.default_agent)
      .ok_or(SupervisorError::BinaryNotFound)?;

    // Materialize the task workspace when the mode requires isolation, and
    // record the task as started.
    let mut workdir = opts.project_root.clone();
    let mut workspace_path = None;
    if opts.needs_workspace() {
      let root = opts.project_root.clone();
      let task_number = opts.task_number;
      let created = tokio::task::spawn_blocking(move || {
        let path = ensure_workspace(&root, task_number)?;
        if let Err(err) = TaskManager::new().mark_task_started(&root, task_number) {
          warn!(event = "task_start_mark_failed", task_number, error = %err);
        }
        anyhow::Ok(path)
      })
      .await
      .map_err(|err| SupervisorError::WorkspaceCreate(err.to_string()))?
      .map_err(|err| SupervisorError::WorkspaceCreate(err.to_string()))?;
      workdir = created.clone();
      workspace_path = Some(created);
    }

    let mut agent_args = Vec::new();
    if !opts.task_system_prompt.is_empty() {
      agent_args.push("--append-system-prompt".to_string());
      agent_args.push(opts.task_system_prompt.clone());
    }
    agent_args.push("--dangerously-skip-permissions".to_string());
    if !opts.task_prompt.is_empty() {
      agent_args.push(opts.task_prompt.clone());
    }

    let home = dirs::home_dir().ok_or_else(|| anyhow::anyhow!("no home directory"))?;
    // Sandbox scope is the project root so worktrees and task files stay
    // writable from inside a workspace.
    let wrapped = wrap_command(&home, &opts.project_root, &binary.to_string_lossy(), &agent_args)?;

    let process = AgentProcess::spawn(ProcessOptions {
      project_id: opts.project_id.clone(),
      program: wrapped.program,
      args: wrapped.args,
      env: wrapped.env,
      cwd: workdir,
      rows: opts.rows,
      cols: opts.cols,
      sandbox_profile: wrapped.profile_path.clone(),
    })
    .map_err(|err| {
      if let Some(profile) = &wrapped.profile_path {
        let _ = std::fs::remove_file(profile);
      }
      SupervisorError::SpawnFailed(err.to_string())
    })?;

    let agent = Arc::new(RunningAgent {
      project_id: opts.project_id.clone(),
      project_name: opts.project_name.clone(),
      project_root: opts.project_root.clone(),
      project_color: opts.project_color.clone(),
      mode: opts.mode,
      wildfire_phase: opts.wildfire_phase,
      task_number: opts.task_number,
      task_title: opts.task_title.clone(),
      workspace_path,
      process: Arc::clone(&process),
      user_stopped: AtomicBool::new(false),
    });

    {
      let mut agents = self.agents.write();
      agents.insert(opts.project_id.clone(), Arc::clone(&agent));
      self.persist_state_locked(&agents);
    }
    self.fire_change();

    info!(
      event = "agent_started",
      project_id = %opts.project_id,
      project = %opts.project_name,
      mode = %opts.mode,
      phase = ?opts.wildfire_phase,
      task_number = opts.task_number,
      "agent running"
    );

    self.spawn_exit_monitor(opts.project_id.clone(), Arc::clone(&process));
    if opts.task_number > 0 {
      self.spawn_task_poller(
        opts.project_id.clone(),
        opts.project_root.clone(),
        opts.task_number,
        Arc::clone(&process),
      );
    }
    if opts.mode == Mode::Wildfire
      && matches!(opts.wildfire_phase, Some(WildfirePhase::Refine | WildfirePhase::Generate))
    {
      self.spawn_marker_poller(
        opts.project_id.clone(),
        opts.project_root.clone(),
        opts.wildfire_phase.expect("phase checked above"),
        Arc::clone(&process),
      );
    }

    Ok(agent)
  }

  /// Stop a project's agent. The exit monitor removes it from the map.
  pub async fn stop_agent(&self, project_id: &str) -> Result<(), SupervisorError> {
    let agent = self
      .get_agent(project_id)
      .ok_or_else(|| SupervisorError::NotRunning(project_id.to_string()))?;
    agent.process.stop().await;
    Ok(())
  }

  /// Stop and inhibit chaining: the campaign ends here.
  pub async fn stop_agent_by_user(&self, project_id: &str) -> Result<(), SupervisorError> {
    let agent = self
      .get_agent(project_id)
      .ok_or_else(|| SupervisorError::NotRunning(project_id.to_string()))?;
    agent.mark_user_stopped();
    agent.process.stop().await;
    Ok(())
  }

  /// Stop only if the agent is still on `task_number`. Refusing on mismatch
  /// prevents a completion event for task N from killing task N+1 after a
  /// chain transition.
  pub async fn stop_agent_for_task(
    &self,
    project_id: &str,
    task_number: u32,
  ) -> Result<(), SupervisorError> {
    let process = {
      let agents = self.agents.read();
      let agent = agents
        .get(project_id)
        .ok_or_else(|| SupervisorError::NotRunning(project_id.to_string()))?;
      if agent.task_number != task_number {
        return Err(SupervisorError::TaskMismatch {
          requested: task_number,
          actual: agent.task_number,
        });
      }
      Arc::clone(&agent.process)
    };
    process.stop().await;
    Ok(())
  }

  /// Mark every agent user-stopped and stop them all. Used on shutdown.
  pub async fn stop_all(&self) {
    let agents = self.list_agents();
    for agent in &agents {
      agent.mark_user_stopped();
    }
    for agent in agents {
      info!(event = "agent_stopping_for_shutdown", project_id = %agent.project_id);
      agent.process.stop().await;
    }
  }

  fn spawn_exit_monitor(self: &Arc<Self>, project_id: String, process: Arc<AgentProcess>) {
    let sup = Arc::clone(self);
    tokio::spawn(async move {
      sup.monitor_process(project_id, process).await;
    });
  }

  /// Wait for the process to exit, then: persist the session log, run the
  /// task-done handler, and either chain to the next session or clean up.
  async fn monitor_process(self: Arc<Self>, project_id: String, process: Arc<AgentProcess>) {
    let mut done = process.done();
    let _ = done.wait_for(|exited| *exited).await;

    // Verify the slot still points at this process; a racing start may have
    // replaced it already.
    let Some(agent) = self.slot_if_current(&project_id, &process) else {
      return;
    };

    info!(
      event = "agent_exited",
      project_id = %project_id,
      mode = %agent.mode,
      task_number = agent.task_number,
      user_stopped = agent.user_stopped(),
      "agent process exited"
    );

    self.write_session_log(&agent);

    // Post-task work (merge + workspace cleanup) happens in the handler,
    // outside any supervisor lock.
    let mut decision = ChainDecision::Continue;
    let task_done = self.hooks.read().task_done.clone();
    if agent.task_number > 0
      && let Some(hook) = task_done
    {
      let root = agent.project_root.clone();
      let task_number = agent.task_number;
      let workspace = agent.workspace_path.clone();
      decision = tokio::task::spawn_blocking(move || hook(&root, task_number, workspace.as_deref()))
        .await
        .unwrap_or(ChainDecision::Stop);

      if self.slot_if_current(&project_id, &process).is_none() {
        return;
      }
    }

    let next_task = self.hooks.read().next_task.clone();
    let should_chain = decision == ChainDecision::Continue
      && !agent.user_stopped()
      && agent.mode.is_chaining()
      && next_task.is_some();

    if should_chain {
      let (rows, cols) = process.terminal_size();
      process.cleanup();

      // Vacate the slot before starting the successor so the replacement
      // guard in start_agent does not trip over ourselves.
      {
        let mut agents = self.agents.write();
        match agents.get(&project_id) {
          Some(current) if Arc::ptr_eq(&current.process, &process) => {
            agents.remove(&project_id);
          }
          _ => return,
        }
        self.persist_state_locked(&agents);
      }
      self.fire_change();

      let hook = next_task.expect("checked above");
      let root = agent.project_root.clone();
      let (mode, phase) = (agent.mode, agent.wildfire_phase);
      let pid = project_id.clone();
      let next = tokio::task::spawn_blocking(move || hook(&pid, &root, mode, phase, rows, cols)).await;

      match next {
        Ok(Ok(Some(opts))) => {
          info!(
            event = "chain_next",
            project_id = %project_id,
            mode = %opts.mode,
            phase = ?opts.wildfire_phase,
            task_number = opts.task_number,
            "starting next chained session"
          );
          // Boxed to break the monitor -> start -> monitor future cycle.
          let start: std::pin::Pin<
            Box<dyn Future<Output = Result<Arc<RunningAgent>, SupervisorError>> + Send + '_>,
          > = Box::pin(self.start_agent(opts));
          if let Err(err) = start.await {
            error!(event = "chain_start_failed", project_id = %project_id, error = %err);
          }
        }
        Ok(Ok(None)) => {
          info!(event = "chain_complete", project_id = %project_id, "no more tasks; campaign over");
        }
        Ok(Err(err)) => {
          error!(event = "chain_lookup_failed", project_id = %project_id, error = %err);
        }
        Err(err) => {
          error!(event = "chain_lookup_panicked", project_id = %project_id, error = %err);
        }
      }
      return;
    }

    // Not chaining: release resources and vacate the slot.
    process.cleanup();
    {
      let mut agents = self.agents.write();
      if let Some(current) = agents.get(&project_id)
        && Arc::ptr_eq(&current.process, &process)
      {
        agents.remove(&project_id);
      }
      self.persist_state_locked(&agents);
    }
    self.fire_change();
  }

  fn slot_if_current(
    &self,
    project_id: &str,
    process: &Arc<AgentProcess>,
  ) -> Option<Arc<RunningAgent>> {
    let agents = self.agents.read();
    agents
      .get(project_id)
      .filter(|agent| Arc::ptr_eq(&agent.process, process))
      .cloned()
  }

  /// Safety net for missed watcher events: reload the task file every few
  /// seconds and stop the agent when its task goes done.
  fn spawn_task_poller(
    self: &Arc<Self>,
    project_id: String,
    project_root: PathBuf,
    task_number: u32,
    process: Arc<AgentProcess>,
  ) {
    let sup = Arc::clone(self);
    tokio::spawn(async move {
      let mut done = process.done();
      let mut ticker = tokio::time::interval(TASK_POLL_INTERVAL);
      ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
      loop {
        tokio::select! {
          _ = async { let _ = done.wait_for(|exited| *exited).await; } => return,
          _ = ticker.tick() => {
            let root = project_root.clone();
            let loaded =
              tokio::task::spawn_blocking(move || task_store::load_task(&root, task_number)).await;
            if let Ok(Ok(Some(task))) = loaded
              && task.status == TaskStatus::Done
            {
              info!(
                event = "task_poll_done",
                project_id = %project_id,
                task_number,
                "poller observed completed task; stopping agent"
              );
              if let Err(err) = sup.stop_agent_for_task(&project_id, task_number).await {
                debug!(event = "task_poll_stop_skipped", project_id = %project_id, error = %err);
              }
              return;
            }
          }
        }
      }
    });
  }

  /// Safety net for missed marker-file events in wildfire refine/generate.
  fn spawn_marker_poller(
    self: &Arc<Self>,
    project_id: String,
    project_root: PathBuf,
    phase: WildfirePhase,
    process: Arc<AgentProcess>,
  ) {
    let Some(marker) = marker_file_for_phase(phase) else {
      return;
    };
    let marker_path = project_dir(&project_root).join(marker);
    let sup = Arc::clone(self);
    tokio::spawn(async move {
      let mut done = process.done();
      let mut ticker = tokio::time::interval(MARKER_POLL_INTERVAL);
      ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
      loop {
        tokio::select! {
          _ = async { let _ = done.wait_for(|exited| *exited).await; } => return,
          _ = ticker.tick() => {
            if marker_path.exists() {
              info!(
                event = "marker_poll_hit",
                project_id = %project_id,
                marker = %marker_path.display(),
                "poller observed phase marker; stopping agent"
              );
              // Delete before stopping so the next phase does not re-fire.
              let _ = std::fs::remove_file(&marker_path);
              if let Err(err) = sup.stop_agent(&project_id).await {
                debug!(event = "marker_poll_stop_skipped", project_id = %project_id, error = %err);
              }
              return;
            }
          }
        }
      }
    });
  }

  fn write_session_log(&self, agent: &RunningAgent) {
    let scrollback = agent.process.full_scrollback();
    if scrollback.is_empty() {
      return;
    }
    let status = match agent.process.exit_success() {
      Some(true) => "completed",
      _ => "interrupted",
    };
    match logs::write_log(
      &agent.project_id,
      agent.task_number,
      0,
      "claude-code",
      agent.mode.as_str(),
      status,
      agent.process.started_at(),
      &scrollback,
    ) {
      Ok(entry) => {
        info!(event = "session_log_written", project_id = %agent.project_id, log_id = %entry.log_id);
      }
      Err(err) => {
        warn!(event = "session_log_failed", project_id = %agent.project_id, error = %err);
      }
    }
  }

  /// Persist the running-agent snapshot. Called with the map lock held so the
  /// snapshot is consistent with the map.
  fn persist_state_locked(&self, agents: &HashMap<String, Arc<RunningAgent>>) {
    let infos = agents
      .values()
      .map(|a| RunningAgentInfo {
        project_id: a.project_id.clone(),
        project_name: a.project_name.clone(),
        project_path: a.project_root.display().to_string(),
        mode: a.mode.as_str().to_string(),
        task_number: a.task_number,
        task_title: a.task_title.clone(),
      })
      .collect();
    if let Err(err) = state::save_agent_state(infos) {
      warn!(event = "agent_state_persist_failed", error = %err);
    }
  }

  fn fire_change(&self) {
    let hook = self.hooks.read().on_change.clone();
    if let Some(hook) = hook {
      tokio::spawn(async move {
        hook();
      });
    }
  }
}
