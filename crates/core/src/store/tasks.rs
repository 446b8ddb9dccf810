use std::fs;
use std::path::Path;

use anyhow::Result;

use crate::config::paths::{task_file, tasks_dir};
use crate::domain::task::{Task, parse_task_file_name};

use super::yaml::{load_yaml, save_yaml};

/// Load a task file. Returns `Ok(None)` when the file does not exist.
pub fn load_task(project_root: &Path, task_number: u32) -> Result<Option<Task>> {
  let path = task_file(project_root, task_number);
  if !path.exists() {
    return Ok(None);
  }
  Ok(Some(load_yaml(&path)?))
}

pub fn save_task(project_root: &Path, task: &Task) -> Result<()> {
  fs::create_dir_all(tasks_dir(project_root))?;
  save_yaml(&task_file(project_root, task.task_number), task)
}

/// Permanently delete a task file. Missing files are not an error.
pub fn delete_task_file(project_root: &Path, task_number: u32) -> Result<()> {
  let path = task_file(project_root, task_number);
  if path.exists() {
    fs::remove_file(&path)?;
  }
  Ok(())
}

/// Load every parseable task file in the project's tasks directory.
/// Files with non-numeric names are skipped.
pub fn load_all_tasks(project_root: &Path) -> Result<Vec<Task>> {
  let dir = tasks_dir(project_root);
  if !dir.exists() {
    return Ok(Vec::new());
  }

  let mut tasks = Vec::new();
  for entry in fs::read_dir(&dir)? {
    let entry = entry?;
    if entry.file_type()?.is_dir() {
      continue;
    }
    let name = entry.file_name();
    let Some(number) = parse_task_file_name(&name.to_string_lossy()) else {
      continue;
    };
    if let Some(task) = load_task(project_root, number)? {
      tasks.push(task);
    }
  }
  Ok(tasks)
}

pub fn load_active_tasks(project_root: &Path) -> Result<Vec<Task>> {
  Ok(
    load_all_tasks(project_root)?
      .into_iter()
      .filter(|t| !t.is_deleted())
      .collect(),
  )
}

pub fn load_deleted_tasks(project_root: &Path) -> Result<Vec<Task>> {
  Ok(
    load_all_tasks(project_root)?
      .into_iter()
      .filter(Task::is_deleted)
      .collect(),
  )
}

/// Highest task number present on disk, 0 when there are no task files.
/// Counts deleted tasks too: their numbers must never be reissued.
pub fn max_task_number(project_root: &Path) -> Result<u32> {
  let dir = tasks_dir(project_root);
  if !dir.exists() {
    return Ok(0);
  }
  let mut max = 0;
  for entry in fs::read_dir(&dir)? {
    let entry = entry?;
    if let Some(n) = parse_task_file_name(&entry.file_name().to_string_lossy()) {
      max = max.max(n);
    }
  }
  Ok(max)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn missing_task_loads_as_none() {
    let dir = tempfile::tempdir().unwrap();
    assert!(load_task(dir.path(), 1).unwrap().is_none());
  }

  #[test]
  fn save_load_delete_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let task = Task::new("abcd1234", 3, "Title", "Prompt");
    save_task(dir.path(), &task).unwrap();
    let back = load_task(dir.path(), 3).unwrap().expect("present");
    assert_eq!(back, task);
    delete_task_file(dir.path(), 3).unwrap();
    assert!(load_task(dir.path(), 3).unwrap().is_none());
    // deleting again is fine
    delete_task_file(dir.path(), 3).unwrap();
  }

  #[test]
  fn load_all_skips_non_task_files() {
    let dir = tempfile::tempdir().unwrap();
    save_task(dir.path(), &Task::new("a", 1, "one", "p")).unwrap();
    save_task(dir.path(), &Task::new("b", 2, "two", "p")).unwrap();
    fs::write(tasks_dir(dir.path()).join("notes.yaml"), "x: 1\n").unwrap();
    let all = load_all_tasks(dir.path()).unwrap();
    assert_eq!(all.len(), 2);
  }

  #[test]
  fn active_and_deleted_partition() {
    let dir = tempfile::tempdir().unwrap();
    let mut gone = Task::new("a", 1, "gone", "p");
    gone.delete();
    save_task(dir.path(), &gone).unwrap();
    save_task(dir.path(), &Task::new("b", 2, "kept", "p")).unwrap();

    let active = load_active_tasks(dir.path()).unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].task_number, 2);
    let deleted = load_deleted_tasks(dir.path()).unwrap();
    assert_eq!(deleted.len(), 1);
    assert_eq!(deleted[0].task_number, 1);
  }

  #[test]
  fn max_task_number_counts_tombstones() {
    let dir = tempfile::tempdir().unwrap();
    assert_eq!(max_task_number(dir.path()).unwrap(), 0);
    save_task(dir.path(), &Task::new("a", 2, "t", "p")).unwrap();
    let mut dead = Task::new("b", 9, "t", "p");
    dead.delete();
    save_task(dir.path(), &dead).unwrap();
    assert_eq!(max_task_number(dir.path()).unwrap(), 9);
  }
}
