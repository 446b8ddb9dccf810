//! Task CRUD on top of the task file store.
//!
//! The manager itself is stateless; every operation reads and writes the task
//! files and the project's counter directly, so concurrent writers (agents
//! editing their own task files) stay visible.

use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::Utc;

use crate::domain::task::{Task, TaskStatus};
use crate::store::{projects, tasks as task_store};

#[derive(Debug, Clone, Default)]
pub struct ListOptions {
  pub status: Option<TaskStatus>,
  pub include_deleted: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
  pub title: String,
  pub prompt: String,
  pub acceptance_criteria: String,
  pub status: Option<TaskStatus>,
  pub position: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
  pub task_number: u32,
  pub title: Option<String>,
  pub prompt: Option<String>,
  pub acceptance_criteria: Option<String>,
  pub status: Option<TaskStatus>,
  pub success: Option<bool>,
  pub failure_reason: Option<String>,
  pub position: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TaskManager;

impl TaskManager {
  pub fn new() -> Self {
    Self
  }

  /// List tasks sorted by position, then task number.
  pub fn list_tasks(&self, project_root: &Path, opts: &ListOptions) -> Result<Vec<Task>> {
    let mut tasks = if opts.include_deleted {
      task_store::load_all_tasks(project_root)?
    } else {
      task_store::load_active_tasks(project_root)?
    };

    if let Some(status) = opts.status {
      tasks.retain(|t| t.status == status);
    }

    tasks.sort_by(|a, b| {
      a.position
        .cmp(&b.position)
        .then_with(|| a.task_number.cmp(&b.task_number))
    });
    Ok(tasks)
  }

  pub fn get_task(&self, project_root: &Path, task_number: u32) -> Result<Task> {
    task_store::load_task(project_root, task_number)?
      .with_context(|| format!("task not found: #{task_number:04}"))
  }

  /// Create a task, consuming the project's next task number.
  pub fn create_task(&self, project_root: &Path, opts: CreateOptions) -> Result<Task> {
    let Some(mut project) = projects::load_project(project_root)? else {
      bail!("project not initialized: {}", project_root.display());
    };

    let task_number = project.take_task_number();
    let mut task = Task::new(generate_task_id(), task_number, opts.title, opts.prompt);
    task.acceptance_criteria = opts.acceptance_criteria;
    if let Some(status) = opts.status {
      task.status = status;
    }
    if let Some(position) = opts.position {
      task.position = position;
    }

    task_store::save_task(project_root, &task)?;
    projects::save_project(project_root, &project)?;
    Ok(task)
  }

  pub fn update_task(&self, project_root: &Path, opts: UpdateOptions) -> Result<Task> {
    let mut task = self.get_task(project_root, opts.task_number)?;

    if let Some(title) = opts.title {
      task.title = title;
    }
    if let Some(prompt) = opts.prompt {
      task.prompt = prompt;
    }
    if let Some(criteria) = opts.acceptance_criteria {
      task.acceptance_criteria = criteria;
    }
    if let Some(status) = opts.status {
      task.status = status;
    }
    if let Some(success) = opts.success {
      task.success = Some(success);
    }
    if let Some(reason) = opts.failure_reason {
      task.failure_reason = reason;
    }
    if let Some(position) = opts.position {
      task.position = position;
    }
    task.updated_at = Utc::now();

    task_store::save_task(project_root, &task)?;
    Ok(task)
  }

  /// Soft-delete: the file stays on disk with a tombstone timestamp.
  pub fn delete_task(&self, project_root: &Path, task_number: u32) -> Result<Task> {
    let mut task = self.get_task(project_root, task_number)?;
    task.delete();
    task_store::save_task(project_root, &task)?;
    Ok(task)
  }

  pub fn restore_task(&self, project_root: &Path, task_number: u32) -> Result<Task> {
    let mut task = self.get_task(project_root, task_number)?;
    task.restore();
    task_store::save_task(project_root, &task)?;
    Ok(task)
  }

  /// Permanently remove every soft-deleted task file.
  pub fn empty_trash(&self, project_root: &Path) -> Result<()> {
    for task in task_store::load_deleted_tasks(project_root)? {
      task_store::delete_task_file(project_root, task.task_number)?;
    }
    Ok(())
  }

  /// Mark a task as picked up by an agent session: bump the session counter
  /// and promote drafts to ready.
  pub fn mark_task_started(&self, project_root: &Path, task_number: u32) -> Result<()> {
    let Some(mut task) = task_store::load_task(project_root, task_number)? else {
      return Ok(());
    };
    task.start();
    if task.status == TaskStatus::Draft {
      task.status = TaskStatus::Ready;
    }
    task_store::save_task(project_root, &task)
  }
}

/// 8-char lowercase alphanumeric id.
fn generate_task_id() -> String {
  const CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
  let id = uuid::Uuid::new_v4();
  id.as_bytes()
    .iter()
    .take(8)
    .map(|b| CHARS[(*b as usize) % CHARS.len()] as char)
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::project::Project;
  use crate::store::projects::{load_project, save_project};

  fn init_project(root: &Path) {
    save_project(root, &Project::new("pid-1", "demo")).unwrap();
  }

  #[test]
  fn create_assigns_sequential_numbers() {
    let dir = tempfile::tempdir().unwrap();
    init_project(dir.path());
    let mgr = TaskManager::new();
    let a = mgr
      .create_task(dir.path(), CreateOptions { title: "a".into(), ..Default::default() })
      .unwrap();
    let b = mgr
      .create_task(dir.path(), CreateOptions { title: "b".into(), ..Default::default() })
      .unwrap();
    assert_eq!(a.task_number, 1);
    assert_eq!(b.task_number, 2);
    assert_eq!(a.task_id.len(), 8);
    assert_ne!(a.task_id, b.task_id);
    assert_eq!(load_project(dir.path()).unwrap().unwrap().next_task_number, 3);
  }

  #[test]
  fn list_sorts_by_position_then_number() {
    let dir = tempfile::tempdir().unwrap();
    init_project(dir.path());
    let mgr = TaskManager::new();
    mgr
      .create_task(dir.path(), CreateOptions { title: "first".into(), position: Some(9), ..Default::default() })
      .unwrap();
    mgr
      .create_task(dir.path(), CreateOptions { title: "second".into(), position: Some(1), ..Default::default() })
      .unwrap();
    let listed = mgr.list_tasks(dir.path(), &ListOptions::default()).unwrap();
    assert_eq!(listed[0].title, "second");
    assert_eq!(listed[1].title, "first");
  }

  #[test]
  fn list_filters_by_status_and_hides_deleted() {
    let dir = tempfile::tempdir().unwrap();
    init_project(dir.path());
    let mgr = TaskManager::new();
    let ready = mgr
      .create_task(
        dir.path(),
        CreateOptions { title: "r".into(), status: Some(TaskStatus::Ready), ..Default::default() },
      )
      .unwrap();
    let draft = mgr
      .create_task(dir.path(), CreateOptions { title: "d".into(), ..Default::default() })
      .unwrap();
    mgr.delete_task(dir.path(), draft.task_number).unwrap();

    let readies = mgr
      .list_tasks(dir.path(), &ListOptions { status: Some(TaskStatus::Ready), ..Default::default() })
      .unwrap();
    assert_eq!(readies.len(), 1);
    assert_eq!(readies[0].task_number, ready.task_number);

    let all = mgr
      .list_tasks(dir.path(), &ListOptions { include_deleted: true, ..Default::default() })
      .unwrap();
    assert_eq!(all.len(), 2);
  }

  #[test]
  fn restore_and_empty_trash() {
    let dir = tempfile::tempdir().unwrap();
    init_project(dir.path());
    let mgr = TaskManager::new();
    let t = mgr
      .create_task(dir.path(), CreateOptions { title: "t".into(), ..Default::default() })
      .unwrap();
    mgr.delete_task(dir.path(), t.task_number).unwrap();
    mgr.restore_task(dir.path(), t.task_number).unwrap();
    assert_eq!(mgr.list_tasks(dir.path(), &ListOptions::default()).unwrap().len(), 1);

    mgr.delete_task(dir.path(), t.task_number).unwrap();
    mgr.empty_trash(dir.path()).unwrap();
    let all = mgr
      .list_tasks(dir.path(), &ListOptions { include_deleted: true, ..Default::default() })
      .unwrap();
    assert!(all.is_empty());
  }

  #[test]
  fn mark_started_promotes_draft_and_counts_sessions() {
    let dir = tempfile::tempdir().unwrap();
    init_project(dir.path());
    let mgr = TaskManager::new();
    let t = mgr
      .create_task(dir.path(), CreateOptions { title: "t".into(), ..Default::default() })
      .unwrap();
    mgr.mark_task_started(dir.path(), t.task_number).unwrap();
    let after = mgr.get_task(dir.path(), t.task_number).unwrap();
    assert_eq!(after.status, TaskStatus::Ready);
    assert_eq!(after.agent_sessions, 1);
    // unknown task is a no-op
    mgr.mark_task_started(dir.path(), 99).unwrap();
  }
}
