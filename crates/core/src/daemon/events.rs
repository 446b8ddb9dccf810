//! The event router: converts watcher events into supervisor actions.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::agent::supervisor::AgentSupervisor;
use crate::agent::{Mode, WildfirePhase};
use crate::domain::task::TaskStatus;
use crate::store::projects::{project_path_for_id, sync_next_task_number};
use crate::store::tasks::load_task;
use crate::watcher::{WatchEvent, WatchEventKind};

/// Consume watcher events until the channel closes.
pub fn spawn_router(
  supervisor: Arc<AgentSupervisor>,
  mut events_rx: mpsc::UnboundedReceiver<WatchEvent>,
) -> JoinHandle<()> {
  tokio::spawn(async move {
    while let Some(event) = events_rx.recv().await {
      route(&supervisor, event).await;
    }
    debug!(event = "event_router_stopped", "watcher channel closed");
  })
}

async fn route(supervisor: &Arc<AgentSupervisor>, event: WatchEvent) {
  match event.kind {
    // Atomic writes surface as creates for existing files too, so both kinds
    // take the same path.
    WatchEventKind::TaskChanged | WatchEventKind::TaskCreated => {
      handle_task_event(supervisor, event).await;
    }
    WatchEventKind::RefinePhaseEnded => {
      handle_phase_ended(supervisor, event, WildfirePhase::Refine);
    }
    WatchEventKind::GeneratePhaseEnded => {
      handle_phase_ended(supervisor, event, WildfirePhase::Generate);
    }
    WatchEventKind::DefinitionDone => {
      handle_mode_ended(supervisor, event, Mode::GenerateDefinition);
    }
    WatchEventKind::TasksDone => {
      handle_mode_ended(supervisor, event, Mode::GenerateTasks);
    }
    // Index and project file changes are client-facing; the supervisor core
    // has nothing to do.
    WatchEventKind::ProjectsIndexChanged | WatchEventKind::ProjectChanged => {
      debug!(event = "project_metadata_changed", path = %event.path.display());
    }
  }
}

async fn handle_task_event(supervisor: &Arc<AgentSupervisor>, event: WatchEvent) {
  let Ok(root) = project_path_for_id(&event.project_id) else {
    debug!(event = "task_event_unknown_project", project_id = %event.project_id);
    return;
  };

  let task_number = event.task_number;
  let load_root = root.clone();
  let loaded = tokio::task::spawn_blocking(move || {
    // Agents author task files directly, bypassing the counter; reconcile it
    // on every task file event.
    if let Err(err) = sync_next_task_number(&load_root) {
      warn!(event = "next_task_number_sync_failed", error = %err);
    }
    load_task(&load_root, task_number)
  })
  .await;

  let task = match loaded {
    Ok(Ok(Some(task))) => task,
    Ok(Ok(None)) => {
      debug!(event = "task_event_missing_file", task_number, path = %event.path.display());
      return;
    }
    Ok(Err(err)) => {
      warn!(event = "task_event_load_failed", task_number, error = %err);
      return;
    }
    Err(err) => {
      warn!(event = "task_event_join_failed", error = %err);
      return;
    }
  };

  if task.status != TaskStatus::Done {
    return;
  }

  info!(
    event = "task_done_observed",
    project_id = %event.project_id,
    task_number,
    "task marked done; stopping its agent"
  );
  // Stop can block for seconds; keep the router loop responsive. The
  // task-number guard in the supervisor makes a stale stop harmless.
  let supervisor = Arc::clone(supervisor);
  tokio::spawn(async move {
    if let Err(err) = supervisor.stop_agent_for_task(&event.project_id, task_number).await {
      debug!(event = "task_stop_skipped", project_id = %event.project_id, task_number, error = %err);
    }
  });
}

fn handle_phase_ended(
  supervisor: &Arc<AgentSupervisor>,
  event: WatchEvent,
  expected_phase: WildfirePhase,
) {
  let agent = supervisor.get_agent(&event.project_id);
  let matches = agent
    .as_ref()
    .is_some_and(|a| a.mode == Mode::Wildfire && a.wildfire_phase == Some(expected_phase));

  // Delete the marker before stopping so the next phase does not re-fire on
  // a stale file; delete it even when nothing matches.
  if let Err(err) = std::fs::remove_file(&event.path) {
    debug!(event = "marker_remove_failed", path = %event.path.display(), error = %err);
  }

  if !matches {
    debug!(
      event = "phase_marker_ignored",
      project_id = %event.project_id,
      expected = %expected_phase,
      "no matching wildfire agent"
    );
    return;
  }

  info!(
    event = "phase_ended",
    project_id = %event.project_id,
    phase = %expected_phase,
    "wildfire phase complete; stopping agent"
  );
  let supervisor = Arc::clone(supervisor);
  tokio::spawn(async move {
    if let Err(err) = supervisor.stop_agent(&event.project_id).await {
      warn!(event = "phase_stop_failed", project_id = %event.project_id, error = %err);
    }
  });
}

fn handle_mode_ended(supervisor: &Arc<AgentSupervisor>, event: WatchEvent, expected_mode: Mode) {
  let agent = supervisor.get_agent(&event.project_id);
  let matches = agent.as_ref().is_some_and(|a| a.mode == expected_mode);

  if let Err(err) = std::fs::remove_file(&event.path) {
    debug!(event = "marker_remove_failed", path = %event.path.display(), error = %err);
  }

  if !matches {
    debug!(
      event = "mode_marker_ignored",
      project_id = %event.project_id,
      expected = %expected_mode,
      "no matching agent"
    );
    return;
  }

  info!(
    event = "generate_mode_ended",
    project_id = %event.project_id,
    mode = %expected_mode,
    "single-shot mode complete; stopping agent"
  );
  let supervisor = Arc::clone(supervisor);
  tokio::spawn(async move {
    if let Err(err) = supervisor.stop_agent(&event.project_id).await {
      warn!(event = "mode_stop_failed", project_id = %event.project_id, error = %err);
    }
  });
}
