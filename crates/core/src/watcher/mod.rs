//! Debounced filesystem watching for task files and phase marker files.
//!
//! Raw notify events are funneled through a per-path 100 ms debounce (burst
//! writes collapse to one event) and synthesized into semantic events bound
//! to the project that owns the path. Rename events are treated exactly like
//! writes: atomic editors write to a temp file and rename over the target, so
//! distinguishing the two would miss most real edits.
//!
//! Watching alone is not enough — watch backends drop events under buffer
//! pressure and cannot see directories created after registration — so the
//! supervisor runs polling safety nets alongside this watcher; see
//! `agent::supervisor`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender, unbounded};
use notify::event::ModifyKind;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::agent::WildfirePhase;
use crate::config::paths::{PROJECT_FILE_NAME, PROJECTS_FILE_NAME, project_dir, tasks_dir};
use crate::domain::task::parse_task_file_name;

/// Marker files written by the agent into a project's hidden directory.
pub const REFINE_DONE_FILE: &str = "refine_done.yaml";
pub const GENERATE_DONE_FILE: &str = "generate_done.yaml";
pub const DEFINITION_DONE_FILE: &str = "definition_done.yaml";
pub const TASKS_DONE_FILE: &str = "tasks_done.yaml";

pub const DEBOUNCE: Duration = Duration::from_millis(100);

/// Marker watched for a wildfire phase, when that phase signals via marker.
pub fn marker_file_for_phase(phase: WildfirePhase) -> Option<&'static str> {
  match phase {
    WildfirePhase::Refine => Some(REFINE_DONE_FILE),
    WildfirePhase::Generate => Some(GENERATE_DONE_FILE),
    WildfirePhase::Execute => None,
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
  ProjectsIndexChanged,
  ProjectChanged,
  TaskChanged,
  TaskCreated,
  RefinePhaseEnded,
  GeneratePhaseEnded,
  DefinitionDone,
  TasksDone,
}

/// A semantic filesystem event bound to a registered project.
#[derive(Debug, Clone)]
pub struct WatchEvent {
  pub kind: WatchEventKind,
  /// Empty for global (index) events.
  pub project_id: String,
  /// Non-zero only for task events.
  pub task_number: u32,
  pub path: PathBuf,
}

struct RawChange {
  path: PathBuf,
  created: bool,
}

struct WatchShared {
  projects: RwLock<HashMap<String, PathBuf>>,
  events_tx: mpsc::UnboundedSender<WatchEvent>,
}

/// Watches registered projects plus the global directory.
pub struct ProjectWatcher {
  fs_watcher: Mutex<RecommendedWatcher>,
  shared: Arc<WatchShared>,
}

impl ProjectWatcher {
  /// Create the watcher and its outbound event stream.
  pub fn spawn() -> Result<(Arc<Self>, mpsc::UnboundedReceiver<WatchEvent>)> {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let shared = Arc::new(WatchShared {
      projects: RwLock::new(HashMap::new()),
      events_tx,
    });

    let (raw_tx, raw_rx) = unbounded::<RawChange>();
    let fs_watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
      let Ok(event) = res else { return };
      forward_raw(&raw_tx, &event);
    })
    .context("failed to create filesystem watcher")?;

    let debounce_shared = Arc::clone(&shared);
    thread::Builder::new()
      .name("watch-debounce".to_string())
      .spawn(move || debounce_loop(&raw_rx, &debounce_shared))
      .context("failed to start debounce thread")?;

    Ok((
      Arc::new(Self {
        fs_watcher: Mutex::new(fs_watcher),
        shared,
      }),
      events_rx,
    ))
  }

  /// Watch the global directory (projects index).
  pub fn watch_global(&self, global_dir: &Path) {
    if let Err(err) = self
      .fs_watcher
      .lock()
      .watch(global_dir, RecursiveMode::NonRecursive)
    {
      warn!(event = "watch_global_failed", path = %global_dir.display(), error = %err);
    }
  }

  /// Register (or refresh) a project. Safe to call repeatedly; chained starts
  /// call this so directories created after initial registration get picked
  /// up.
  pub fn watch_project(&self, project_id: &str, project_root: &Path) {
    {
      let mut projects = self.shared.projects.write();
      // Same path registered under a different id means the project was
      // re-initialized; drop the stale binding.
      projects.retain(|id, path| !(path.as_path() == project_root && id != project_id));
      projects.insert(project_id.to_string(), project_root.to_path_buf());
    }

    let hidden = project_dir(project_root);
    let tasks = tasks_dir(project_root);
    let mut watcher = self.fs_watcher.lock();
    if let Err(err) = watcher.watch(&hidden, RecursiveMode::NonRecursive) {
      warn!(event = "watch_project_failed", path = %hidden.display(), error = %err);
    }
    if let Err(err) = watcher.watch(&tasks, RecursiveMode::NonRecursive) {
      // The tasks directory may not exist yet; the next watch_project call
      // (on agent start) retries.
      debug!(event = "watch_tasks_missing", path = %tasks.display(), error = %err);
    }
    debug!(event = "project_watched", project_id, root = %project_root.display());
  }

  pub fn unwatch_project(&self, project_id: &str) {
    let Some(root) = self.shared.projects.write().remove(project_id) else {
      return;
    };
    let mut watcher = self.fs_watcher.lock();
    let _ = watcher.unwatch(&project_dir(&root));
    let _ = watcher.unwatch(&tasks_dir(&root));
  }
}

fn forward_raw(raw_tx: &Sender<RawChange>, event: &notify::Event) {
  // Writes, creates, and renames only. Renames matter because atomic editors
  // rename a temp file over the target.
  let created = match event.kind {
    EventKind::Create(_) => true,
    EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Name(_) | ModifyKind::Any) => false,
    _ => return,
  };
  for path in &event.paths {
    let _ = raw_tx.send(RawChange {
      path: path.clone(),
      created,
    });
  }
}

/// Per-path debounce: each raw event (re-)arms a deadline; the synthesized
/// event fires only when a path has been quiet for the full window.
fn debounce_loop(raw_rx: &Receiver<RawChange>, shared: &Arc<WatchShared>) {
  let mut pending: HashMap<PathBuf, (Instant, bool)> = HashMap::new();
  loop {
    let timeout = pending
      .values()
      .map(|(deadline, _)| deadline.saturating_duration_since(Instant::now()))
      .min()
      .unwrap_or(Duration::from_millis(250));

    match raw_rx.recv_timeout(timeout) {
      Ok(change) => {
        let entry = pending.entry(change.path).or_insert((Instant::now(), false));
        entry.0 = Instant::now() + DEBOUNCE;
        entry.1 |= change.created;
      }
      Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
      Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
        flush_due(&mut pending, shared, true);
        return;
      }
    }
    flush_due(&mut pending, shared, false);
  }
}

fn flush_due(
  pending: &mut HashMap<PathBuf, (Instant, bool)>,
  shared: &Arc<WatchShared>,
  all: bool,
) {
  let now = Instant::now();
  let due: Vec<PathBuf> = pending
    .iter()
    .filter(|(_, (deadline, _))| all || *deadline <= now)
    .map(|(path, _)| path.clone())
    .collect();
  for path in due {
    let (_, created) = pending.remove(&path).expect("path was just listed");
    if let Some(event) = synthesize(shared, &path, created) {
      debug!(event = "watch_event", kind = ?event.kind, path = %event.path.display());
      let _ = shared.events_tx.send(event);
    }
  }
}

/// Map a debounced path change to a semantic event, if the path is one we
/// understand for a registered project.
fn synthesize(shared: &Arc<WatchShared>, path: &Path, created: bool) -> Option<WatchEvent> {
  let name = path.file_name()?.to_string_lossy().into_owned();
  let dir = path.parent()?;

  if name == PROJECTS_FILE_NAME {
    return Some(WatchEvent {
      kind: WatchEventKind::ProjectsIndexChanged,
      project_id: String::new(),
      task_number: 0,
      path: path.to_path_buf(),
    });
  }

  let projects = shared.projects.read();
  for (project_id, root) in projects.iter() {
    let hidden = project_dir(root);
    if dir == hidden {
      let kind = match name.as_str() {
        PROJECT_FILE_NAME => Some(WatchEventKind::ProjectChanged),
        REFINE_DONE_FILE => Some(WatchEventKind::RefinePhaseEnded),
        GENERATE_DONE_FILE => Some(WatchEventKind::GeneratePhaseEnded),
        DEFINITION_DONE_FILE => Some(WatchEventKind::DefinitionDone),
        TASKS_DONE_FILE => Some(WatchEventKind::TasksDone),
        _ => None,
      };
      if let Some(kind) = kind {
        return Some(WatchEvent {
          kind,
          project_id: project_id.clone(),
          task_number: 0,
          path: path.to_path_buf(),
        });
      }
    }

    if dir == tasks_dir(root)
      && let Some(task_number) = parse_task_file_name(&name)
    {
      return Some(WatchEvent {
        kind: if created { WatchEventKind::TaskCreated } else { WatchEventKind::TaskChanged },
        project_id: project_id.clone(),
        task_number,
        path: path.to_path_buf(),
      });
    }
  }
  None
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::paths::ensure_project_dirs;

  async fn next_event(
    rx: &mut mpsc::UnboundedReceiver<WatchEvent>,
    within: Duration,
  ) -> Option<WatchEvent> {
    tokio::time::timeout(within, rx.recv()).await.ok().flatten()
  }

  fn setup() -> (tempfile::TempDir, Arc<ProjectWatcher>, mpsc::UnboundedReceiver<WatchEvent>) {
    let dir = tempfile::tempdir().unwrap();
    ensure_project_dirs(dir.path()).unwrap();
    let (watcher, rx) = ProjectWatcher::spawn().unwrap();
    watcher.watch_project("pid-1", dir.path());
    (dir, watcher, rx)
  }

  #[tokio::test]
  async fn task_file_write_produces_task_event() {
    let (dir, _watcher, mut rx) = setup();
    let path = tasks_dir(dir.path()).join("0003.yaml");
    std::fs::write(&path, "title: t\n").unwrap();

    let event = next_event(&mut rx, Duration::from_secs(3)).await.expect("task event");
    assert!(
      matches!(event.kind, WatchEventKind::TaskCreated | WatchEventKind::TaskChanged),
      "kind: {:?}",
      event.kind,
    );
    assert_eq!(event.project_id, "pid-1");
    assert_eq!(event.task_number, 3);
  }

  #[tokio::test]
  async fn rename_over_task_file_counts_as_change() {
    let (dir, _watcher, mut rx) = setup();
    let tasks = tasks_dir(dir.path());
    let target = tasks.join("0004.yaml");
    std::fs::write(&target, "v1\n").unwrap();
    // Drain the create event.
    while next_event(&mut rx, Duration::from_millis(400)).await.is_some() {}

    // Atomic editor pattern: temp write, rename over the target.
    let tmp = tasks.join(".0004.yaml.tmp");
    std::fs::write(&tmp, "v2\n").unwrap();
    std::fs::rename(&tmp, &target).unwrap();

    let event = loop {
      let ev = next_event(&mut rx, Duration::from_secs(3)).await.expect("rename event");
      if ev.task_number == 4 {
        break ev;
      }
    };
    assert!(matches!(event.kind, WatchEventKind::TaskChanged | WatchEventKind::TaskCreated));
  }

  #[tokio::test]
  async fn marker_files_map_to_phase_events() {
    let (dir, _watcher, mut rx) = setup();
    std::fs::write(project_dir(dir.path()).join(REFINE_DONE_FILE), "done\n").unwrap();

    let event = next_event(&mut rx, Duration::from_secs(3)).await.expect("marker event");
    assert_eq!(event.kind, WatchEventKind::RefinePhaseEnded);
    assert_eq!(event.project_id, "pid-1");
  }

  #[tokio::test]
  async fn burst_writes_collapse_to_few_events() {
    let (dir, _watcher, mut rx) = setup();
    let path = tasks_dir(dir.path()).join("0005.yaml");
    for i in 0..5 {
      std::fs::write(&path, format!("rev: {i}\n")).unwrap();
      tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let mut count = 0;
    while let Some(event) = next_event(&mut rx, Duration::from_millis(600)).await {
      if event.task_number == 5 {
        count += 1;
      }
    }
    assert!(count >= 1, "debounced event must fire");
    assert!(count <= 2, "5 rapid writes produced {count} events");
  }

  #[tokio::test]
  async fn unwatched_paths_are_ignored() {
    let (dir, watcher, mut rx) = setup();
    watcher.unwatch_project("pid-1");
    std::fs::write(tasks_dir(dir.path()).join("0006.yaml"), "x\n").unwrap();
    assert!(next_event(&mut rx, Duration::from_millis(500)).await.is_none());
  }

  #[test]
  fn phase_marker_mapping() {
    assert_eq!(marker_file_for_phase(WildfirePhase::Refine), Some(REFINE_DONE_FILE));
    assert_eq!(marker_file_for_phase(WildfirePhase::Generate), Some(GENERATE_DONE_FILE));
    assert_eq!(marker_file_for_phase(WildfirePhase::Execute), None);
  }
}
