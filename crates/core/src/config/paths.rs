use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::task::format_task_number;

use super::{ConfigError, Result};

/// Name of the global directory under the user home.
pub const GLOBAL_DIR_NAME: &str = ".foreman";
/// Name of the per-project hidden directory.
pub const PROJECT_DIR_NAME: &str = ".foreman";
pub const TASKS_DIR_NAME: &str = "tasks";
pub const WORKTREES_DIR_NAME: &str = "worktrees";
pub const LOGS_DIR_NAME: &str = "logs";

pub const DAEMON_FILE_NAME: &str = "daemon.yaml";
pub const PROJECTS_FILE_NAME: &str = "projects.yaml";
pub const SETTINGS_FILE_NAME: &str = "settings.yaml";
pub const PROJECT_FILE_NAME: &str = "project.yaml";
pub const AGENT_STATE_FILE_NAME: &str = "agents.yaml";
pub const TRACE_LOG_FILE_NAME: &str = "logs.jsonl";

/// Env var overriding the global directory location (tests, multi-instance).
pub const HOME_ENV: &str = "FOREMAN_HOME";

/// `~/.foreman/`, or `$FOREMAN_HOME` when set.
pub fn global_dir() -> Result<PathBuf> {
  if let Some(dir) = std::env::var_os(HOME_ENV) {
    return Ok(PathBuf::from(dir));
  }
  dirs::home_dir()
    .map(|home| home.join(GLOBAL_DIR_NAME))
    .ok_or(ConfigError::NoHomeDir)
}

pub fn global_daemon_file() -> Result<PathBuf> {
  Ok(global_dir()?.join(DAEMON_FILE_NAME))
}

pub fn global_projects_file() -> Result<PathBuf> {
  Ok(global_dir()?.join(PROJECTS_FILE_NAME))
}

pub fn global_settings_file() -> Result<PathBuf> {
  Ok(global_dir()?.join(SETTINGS_FILE_NAME))
}

pub fn global_agent_state_file() -> Result<PathBuf> {
  Ok(global_dir()?.join(AGENT_STATE_FILE_NAME))
}

pub fn global_logs_dir() -> Result<PathBuf> {
  Ok(global_dir()?.join(LOGS_DIR_NAME))
}

pub fn global_trace_log_file() -> Result<PathBuf> {
  Ok(global_dir()?.join(TRACE_LOG_FILE_NAME))
}

/// `<root>/.foreman/`
pub fn project_dir(project_root: &Path) -> PathBuf {
  project_root.join(PROJECT_DIR_NAME)
}

pub fn project_file(project_root: &Path) -> PathBuf {
  project_dir(project_root).join(PROJECT_FILE_NAME)
}

pub fn tasks_dir(project_root: &Path) -> PathBuf {
  project_dir(project_root).join(TASKS_DIR_NAME)
}

pub fn worktrees_dir(project_root: &Path) -> PathBuf {
  project_dir(project_root).join(WORKTREES_DIR_NAME)
}

/// `0007.yaml`
pub fn task_file_name(task_number: u32) -> String {
  format!("{}.yaml", format_task_number(task_number))
}

pub fn task_file(project_root: &Path, task_number: u32) -> PathBuf {
  tasks_dir(project_root).join(task_file_name(task_number))
}

pub fn ensure_global_dir() -> Result<()> {
  fs::create_dir_all(global_dir()?)?;
  Ok(())
}

pub fn ensure_global_logs_dir() -> Result<()> {
  fs::create_dir_all(global_logs_dir()?)?;
  Ok(())
}

/// Create the project's `.foreman/` layout (tasks + worktrees directories).
pub fn ensure_project_dirs(project_root: &Path) -> Result<()> {
  fs::create_dir_all(project_dir(project_root))?;
  fs::create_dir_all(tasks_dir(project_root))?;
  fs::create_dir_all(worktrees_dir(project_root))?;
  Ok(())
}
