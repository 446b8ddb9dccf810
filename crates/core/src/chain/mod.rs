//! The chain driver: decides what to start next when a chaining-mode agent
//! exits. Pure over the task store; holds no state of its own.
//!
//! Start-all walks ready tasks in order until none remain. Wildfire is a
//! three-phase machine: execute ready tasks, refine drafts, then generate new
//! drafts; a generate phase that produces nothing ends the campaign by
//! handing the user an ordinary chat session.

use std::path::Path;

use anyhow::{Context, Result};

use crate::agent::{Mode, StartOptions, WildfirePhase};
use crate::domain::project::Project;
use crate::domain::task::{Task, TaskStatus};
use crate::prompts;
use crate::store::projects::load_project;
use crate::tasks::{ListOptions, TaskManager};

/// Compute the next session after an agent exit (or for the initial start of
/// a chaining mode, with `prev_phase = None`).
///
/// Returns `Ok(None)` when the campaign is over and nothing should start.
pub fn next_start_options(
  project_id: &str,
  project_root: &Path,
  mode: Mode,
  prev_phase: Option<WildfirePhase>,
  rows: u16,
  cols: u16,
) -> Result<Option<StartOptions>> {
  let project = load_project(project_root)?
    .with_context(|| format!("project not initialized: {}", project_root.display()))?;

  match mode {
    Mode::StartAll => next_start_all(&project, project_id, project_root, rows, cols),
    Mode::Wildfire => next_wildfire(&project, project_id, project_root, prev_phase, rows, cols),
    _ => Ok(None),
  }
}

fn base_options(project: &Project, project_id: &str, project_root: &Path, rows: u16, cols: u16) -> StartOptions {
  StartOptions {
    project_id: project_id.to_string(),
    project_name: project.name.clone(),
    project_root: project_root.to_path_buf(),
    project_color: project.color.clone(),
    mode: Mode::Chat,
    wildfire_phase: None,
    task_number: 0,
    task_title: String::new(),
    task_prompt: String::new(),
    task_system_prompt: String::new(),
    rows,
    cols,
  }
}

fn first_with_status(project_root: &Path, status: TaskStatus) -> Result<Option<Task>> {
  let tasks = TaskManager::new().list_tasks(
    project_root,
    &ListOptions {
      status: Some(status),
      include_deleted: false,
    },
  )?;
  Ok(tasks.into_iter().next())
}

fn next_start_all(
  project: &Project,
  project_id: &str,
  project_root: &Path,
  rows: u16,
  cols: u16,
) -> Result<Option<StartOptions>> {
  let Some(task) = first_with_status(project_root, TaskStatus::Ready)? else {
    return Ok(None);
  };
  let mut opts = base_options(project, project_id, project_root, rows, cols);
  opts.mode = Mode::StartAll;
  opts.task_number = task.task_number;
  opts.task_title = task.title.clone();
  opts.task_prompt = prompts::compose_task_user_prompt(task.task_number, &task.title);
  opts.task_system_prompt = prompts::compose_task_system_prompt(
    project,
    task.task_number,
    &task.title,
    &task.prompt,
    &task.acceptance_criteria,
  );
  Ok(Some(opts))
}

fn next_wildfire(
  project: &Project,
  project_id: &str,
  project_root: &Path,
  prev_phase: Option<WildfirePhase>,
  rows: u16,
  cols: u16,
) -> Result<Option<StartOptions>> {
  // 1. Ready tasks take priority: execute them in a workspace.
  if let Some(task) = first_with_status(project_root, TaskStatus::Ready)? {
    let mut opts = base_options(project, project_id, project_root, rows, cols);
    opts.mode = Mode::Wildfire;
    opts.wildfire_phase = Some(WildfirePhase::Execute);
    opts.task_number = task.task_number;
    opts.task_title = task.title.clone();
    opts.task_prompt = prompts::compose_task_user_prompt(task.task_number, &task.title);
    opts.task_system_prompt = prompts::compose_task_system_prompt(
      project,
      task.task_number,
      &task.title,
      &task.prompt,
      &task.acceptance_criteria,
    );
    return Ok(Some(opts));
  }

  // 2. Drafts get refined at the project root.
  if let Some(task) = first_with_status(project_root, TaskStatus::Draft)? {
    let mut opts = base_options(project, project_id, project_root, rows, cols);
    opts.mode = Mode::Wildfire;
    opts.wildfire_phase = Some(WildfirePhase::Refine);
    opts.task_number = task.task_number;
    opts.task_title = task.title.clone();
    opts.task_prompt = prompts::compose_refine_user_prompt(task.task_number, &task.title);
    opts.task_system_prompt = prompts::compose_refine_system_prompt(
      project,
      task.task_number,
      &task.title,
      &task.prompt,
      &task.acceptance_criteria,
    );
    return Ok(Some(opts));
  }

  // 3. Generate produced nothing new: the campaign is complete. Leave the
  //    user an interactive chat session instead of another generate loop.
  if prev_phase == Some(WildfirePhase::Generate) {
    let mut opts = base_options(project, project_id, project_root, rows, cols);
    opts.mode = Mode::Chat;
    opts.task_system_prompt = prompts::compose_chat_prompt(project);
    return Ok(Some(opts));
  }

  // 4. Nothing to execute or refine: ask for new tasks.
  let mut opts = base_options(project, project_id, project_root, rows, cols);
  opts.mode = Mode::Wildfire;
  opts.wildfire_phase = Some(WildfirePhase::Generate);
  opts.task_prompt = prompts::compose_generate_user_prompt();
  opts.task_system_prompt = prompts::compose_generate_system_prompt(project);
  Ok(Some(opts))
}
