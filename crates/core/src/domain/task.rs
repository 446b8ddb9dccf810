use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a task.
///
/// Agents move tasks to `Done` by rewriting the task file themselves; the
/// wildfire refine phase promotes `Draft` tasks to `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
  Draft,
  Ready,
  Done,
}

impl TaskStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      TaskStatus::Draft => "draft",
      TaskStatus::Ready => "ready",
      TaskStatus::Done => "done",
    }
  }

}

impl fmt::Display for TaskStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A task definition, persisted as `.foreman/tasks/NNNN.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
  pub version: u32,
  /// Opaque 8-char alphanumeric id, internal only.
  pub task_id: String,
  /// Sequential within the project, user-facing.
  pub task_number: u32,
  pub title: String,
  #[serde(default)]
  pub prompt: String,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub acceptance_criteria: String,
  pub status: TaskStatus,
  /// Only meaningful when status is done.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub success: Option<bool>,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub failure_reason: String,
  /// Display and work ordering; defaults to the task number.
  pub position: u32,
  #[serde(default)]
  pub agent_sessions: u32,
  pub created_at: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub started_at: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub completed_at: Option<DateTime<Utc>>,
  pub updated_at: DateTime<Utc>,
  /// Soft-delete tombstone.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub deleted_at: Option<DateTime<Utc>>,
}

impl Task {
  pub fn new(
    task_id: impl Into<String>,
    task_number: u32,
    title: impl Into<String>,
    prompt: impl Into<String>,
  ) -> Self {
    let now = Utc::now();
    Self {
      version: 1,
      task_id: task_id.into(),
      task_number,
      title: title.into(),
      prompt: prompt.into(),
      acceptance_criteria: String::new(),
      status: TaskStatus::Draft,
      success: None,
      failure_reason: String::new(),
      position: task_number,
      agent_sessions: 0,
      created_at: now,
      started_at: None,
      completed_at: None,
      updated_at: now,
      deleted_at: None,
    }
  }

  pub fn is_deleted(&self) -> bool {
    self.deleted_at.is_some()
  }

  /// Soft-delete: leave the file in place with a tombstone timestamp.
  pub fn delete(&mut self) {
    let now = Utc::now();
    self.deleted_at = Some(now);
    self.updated_at = now;
  }

  pub fn restore(&mut self) {
    self.deleted_at = None;
    self.updated_at = Utc::now();
  }

  pub fn mark_done(&mut self, success: bool, failure_reason: impl Into<String>) {
    let now = Utc::now();
    self.status = TaskStatus::Done;
    self.success = Some(success);
    if !success {
      self.failure_reason = failure_reason.into();
    }
    self.completed_at = Some(now);
    self.updated_at = now;
  }

  /// Record that an agent session picked this task up. The start timestamp is
  /// set on the first session only.
  pub fn start(&mut self) {
    let now = Utc::now();
    if self.started_at.is_none() {
      self.started_at = Some(now);
    }
    self.agent_sessions += 1;
    self.updated_at = now;
  }
}

/// Zero-padded 4-digit rendering used in filenames, branch names, and logs.
pub fn format_task_number(n: u32) -> String {
  format!("{n:04}")
}

/// Parse a task number out of a `NNNN.yaml` basename. Returns `None` for
/// anything that is not purely digits before the extension.
pub fn parse_task_file_name(name: &str) -> Option<u32> {
  let stem = name.strip_suffix(".yaml")?;
  if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
    return None;
  }
  stem.parse().ok()
}
