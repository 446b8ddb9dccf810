use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::info;

use crate::config::paths::{
  ensure_global_dir, ensure_project_dirs, global_projects_file, project_file,
};
use crate::domain::project::{Project, ProjectEntry, ProjectsIndex};

use super::tasks::max_task_number;
use super::yaml::{load_yaml, load_yaml_or_else, save_yaml};

/// Load the global projects index; an absent file is an empty index.
pub fn load_projects_index() -> Result<ProjectsIndex> {
  load_yaml_or_else(&global_projects_file()?, ProjectsIndex::default)
}

pub fn save_projects_index(index: &ProjectsIndex) -> Result<()> {
  ensure_global_dir()?;
  save_yaml(&global_projects_file()?, index)
}

/// Load a project's `.foreman/project.yaml`. `Ok(None)` when uninitialized.
pub fn load_project(project_root: &Path) -> Result<Option<Project>> {
  let path = project_file(project_root);
  if !path.exists() {
    return Ok(None);
  }
  Ok(Some(load_yaml(&path)?))
}

pub fn save_project(project_root: &Path, project: &Project) -> Result<()> {
  ensure_project_dirs(project_root)?;
  save_yaml(&project_file(project_root), project)
}

/// Insert a project into the global index, or refresh name/path when the id is
/// already registered.
pub fn register_project(project_id: &str, name: &str, path: &Path) -> Result<()> {
  let mut index = load_projects_index()?;
  let path_str = path.to_string_lossy().into_owned();

  if let Some(existing) = index.projects.iter_mut().find(|p| p.project_id == project_id) {
    existing.name = name.to_string();
    existing.path = path_str;
  } else {
    index.add(ProjectEntry {
      project_id: project_id.to_string(),
      name: name.to_string(),
      path: path_str,
      position: 0,
    });
  }
  save_projects_index(&index)
}

pub fn unregister_project(project_id: &str) -> Result<()> {
  let mut index = load_projects_index()?;
  if index.remove(project_id) {
    save_projects_index(&index)?;
  }
  Ok(())
}

/// Resolve a project id to its root path via the global index.
pub fn project_path_for_id(project_id: &str) -> Result<std::path::PathBuf> {
  let index = load_projects_index()?;
  let entry = index
    .find(project_id)
    .with_context(|| format!("project not found: {project_id}"))?;
  Ok(std::path::PathBuf::from(&entry.path))
}

/// Reconcile the project's task counter with the tasks directory.
///
/// Agents write task files directly, bypassing the counter, so after any
/// task-create or task-rename event the counter is recomputed as
/// `max(existing numbers) + 1`. Returns whether the counter changed.
pub fn sync_next_task_number(project_root: &Path) -> Result<bool> {
  let Some(mut project) = load_project(project_root)? else {
    return Ok(false);
  };
  let next = max_task_number(project_root)? + 1;
  if project.next_task_number >= next {
    return Ok(false);
  }
  info!(
    event = "next_task_number_synced",
    from = project.next_task_number,
    to = next,
    root = %project_root.display(),
    "task counter lagged behind tasks directory"
  );
  project.next_task_number = next;
  project.updated_at = Utc::now();
  save_project(project_root, &project)?;
  Ok(true)
}
