use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-project configuration, persisted as `<root>/.foreman/project.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
  pub version: u32,
  pub project_id: String,
  pub name: String,
  /// "active" or "archived".
  pub status: String,
  /// Hex color used by GUI clients.
  pub color: String,
  pub default_branch: String,
  pub default_agent: String,
  /// Sandbox mode: "profile" wraps the agent, "none" runs it bare.
  pub sandbox: String,
  pub auto_merge: bool,
  pub auto_delete_workspace: bool,
  pub auto_start_tasks: bool,
  /// Free-form project definition text fed into prompts.
  #[serde(default)]
  pub definition: String,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  /// Monotonic counter consumed by task creation.
  pub next_task_number: u32,
}

impl Project {
  pub fn new(project_id: impl Into<String>, name: impl Into<String>) -> Self {
    let now = Utc::now();
    Self {
      version: 1,
      project_id: project_id.into(),
      name: name.into(),
      status: "active".into(),
      color: "#34d399".into(),
      default_branch: "main".into(),
      default_agent: "claude-code".into(),
      sandbox: "profile".into(),
      auto_merge: true,
      auto_delete_workspace: true,
      auto_start_tasks: true,
      definition: String::new(),
      created_at: now,
      updated_at: now,
      next_task_number: 1,
    }
  }

  /// Hand out the next task number and advance the counter.
  pub fn take_task_number(&mut self) -> u32 {
    let n = self.next_task_number;
    self.next_task_number += 1;
    self.updated_at = Utc::now();
    n
  }
}

/// An entry in the global `~/.foreman/projects.yaml` index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectEntry {
  pub project_id: String,
  pub name: String,
  pub path: String,
  #[serde(default)]
  pub position: u32,
}

/// The global projects index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectsIndex {
  pub version: u32,
  #[serde(default)]
  pub projects: Vec<ProjectEntry>,
}

impl Default for ProjectsIndex {
  fn default() -> Self {
    Self {
      version: 1,
      projects: Vec::new(),
    }
  }
}

impl ProjectsIndex {
  pub fn find(&self, project_id: &str) -> Option<&ProjectEntry> {
    self.projects.iter().find(|p| p.project_id == project_id)
  }

  pub fn find_by_path(&self, path: &str) -> Option<&ProjectEntry> {
    self.projects.iter().find(|p| p.path == path)
  }

  /// Append an entry at the end of the ordering.
  pub fn add(&mut self, mut entry: ProjectEntry) {
    entry.position = self.projects.len() as u32 + 1;
    self.projects.push(entry);
  }

  /// Remove an entry and close the position gap. Returns whether it existed.
  pub fn remove(&mut self, project_id: &str) -> bool {
    let Some(idx) = self.projects.iter().position(|p| p.project_id == project_id) else {
      return false;
    };
    self.projects.remove(idx);
    for (i, p) in self.projects.iter_mut().enumerate() {
      p.position = i as u32 + 1;
    }
    true
  }
}
