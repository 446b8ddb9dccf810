//! DTOs for the JSON-RPC surface. Everything is snake_case on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::issue::AgentIssue;
use crate::agent::supervisor::RunningAgent;
use crate::domain::log::LogEntry;
use crate::domain::task::{Task, TaskStatus};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ProjectParams {
  pub project_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct StartAgentParams {
  pub project_id: String,
  /// One of chat | task | start-all | wildfire | generate-definition |
  /// generate-tasks. Empty means chat.
  #[serde(default)]
  pub mode: String,
  #[serde(default)]
  pub task_number: u32,
  #[serde(default)]
  pub rows: u16,
  #[serde(default)]
  pub cols: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct AgentStatusDto {
  pub project_id: String,
  #[serde(default)]
  pub project_name: String,
  #[serde(default)]
  pub mode: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub wildfire_phase: Option<String>,
  #[serde(default)]
  pub task_number: u32,
  #[serde(default)]
  pub task_title: String,
  pub is_running: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub issue: Option<AgentIssue>,
}

impl AgentStatusDto {
  pub fn not_running(project_id: &str) -> Self {
    Self {
      project_id: project_id.to_string(),
      project_name: String::new(),
      mode: String::new(),
      wildfire_phase: None,
      task_number: 0,
      task_title: String::new(),
      is_running: false,
      issue: None,
    }
  }

  pub fn from_agent(agent: &RunningAgent) -> Self {
    Self {
      project_id: agent.project_id.clone(),
      project_name: agent.project_name.clone(),
      mode: agent.mode.as_str().to_string(),
      wildfire_phase: agent.wildfire_phase.map(|p| p.as_str().to_string()),
      task_number: agent.task_number,
      task_title: agent.task_title.clone(),
      is_running: true,
      issue: agent.process.current_issue(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SendInputParams {
  pub project_id: String,
  pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ResizeParams {
  pub project_id: String,
  pub rows: u16,
  pub cols: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ScrollbackParams {
  pub project_id: String,
  #[serde(default)]
  pub offset: usize,
  #[serde(default)]
  pub limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ScrollbackResult {
  pub lines: Vec<String>,
  pub total: usize,
}

/// One chunk of raw PTY output on the raw subscription.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RawOutputChunk {
  pub project_id: String,
  pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct DaemonStatusDto {
  pub host: String,
  pub port: u16,
  pub pid: u32,
  pub started_at: DateTime<Utc>,
  pub active_agents: usize,
  pub active_projects: Vec<String>,
  pub update_available: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub update_version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct TaskDto {
  pub project_id: String,
  #[serde(flatten)]
  pub task: Task,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TaskListParams {
  pub project_id: String,
  #[serde(default)]
  pub status: Option<TaskStatus>,
  #[serde(default)]
  pub include_deleted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TaskIdParams {
  pub project_id: String,
  pub task_number: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TaskCreateParams {
  pub project_id: String,
  pub title: String,
  #[serde(default)]
  pub prompt: String,
  #[serde(default)]
  pub acceptance_criteria: String,
  #[serde(default)]
  pub status: Option<TaskStatus>,
  #[serde(default)]
  pub position: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TaskUpdateParams {
  pub project_id: String,
  pub task_number: u32,
  #[serde(default)]
  pub title: Option<String>,
  #[serde(default)]
  pub prompt: Option<String>,
  #[serde(default)]
  pub acceptance_criteria: Option<String>,
  #[serde(default)]
  pub status: Option<TaskStatus>,
  #[serde(default)]
  pub success: Option<bool>,
  #[serde(default)]
  pub failure_reason: Option<String>,
  #[serde(default)]
  pub position: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct LogGetParams {
  pub project_id: String,
  pub log_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct LogContentDto {
  pub entry: LogEntry,
  pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct WorkspaceBranchDto {
  pub name: String,
  pub task_number: u32,
  /// merged | unmerged | orphaned
  pub state: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub workspace_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct WorkspaceMergeParams {
  pub project_id: String,
  pub task_number: u32,
  /// Remove the workspace and branch after a successful merge.
  #[serde(default)]
  pub delete_after_merge: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct WorkspaceMergeResult {
  pub merged: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ProjectRegisterParams {
  /// Absolute path to the project root.
  pub path: String,
  #[serde(default)]
  pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ProjectInfoDto {
  pub project_id: String,
  pub name: String,
  pub path: String,
  pub position: u32,
}
