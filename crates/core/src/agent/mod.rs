//! Agent lifecycle: the PTY process, issue detection, sandboxing, and the
//! supervisor owning the {project -> running agent} map.

pub mod issue;
pub mod process;
pub mod resolve;
pub mod sandbox;
pub mod screen;
pub mod supervisor;

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// The mode an agent runs in. `StartAll` and `Wildfire` are chaining modes:
/// on exit the supervisor consults the chain driver instead of going idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
  Chat,
  Task,
  StartAll,
  Wildfire,
  GenerateDefinition,
  GenerateTasks,
}

impl Mode {
  pub fn as_str(&self) -> &'static str {
    match self {
      Mode::Chat => "chat",
      Mode::Task => "task",
      Mode::StartAll => "start-all",
      Mode::Wildfire => "wildfire",
      Mode::GenerateDefinition => "generate-definition",
      Mode::GenerateTasks => "generate-tasks",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "chat" | "" => Some(Mode::Chat),
      "task" => Some(Mode::Task),
      "start-all" => Some(Mode::StartAll),
      "wildfire" => Some(Mode::Wildfire),
      "generate-definition" => Some(Mode::GenerateDefinition),
      "generate-tasks" => Some(Mode::GenerateTasks),
      _ => None,
    }
  }

  pub fn is_chaining(&self) -> bool {
    matches!(self, Mode::StartAll | Mode::Wildfire)
  }
}

impl fmt::Display for Mode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Phase within wildfire mode. Execute runs inside a task workspace; refine
/// and generate run at the project root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WildfirePhase {
  Execute,
  Refine,
  Generate,
}

impl WildfirePhase {
  pub fn as_str(&self) -> &'static str {
    match self {
      WildfirePhase::Execute => "execute",
      WildfirePhase::Refine => "refine",
      WildfirePhase::Generate => "generate",
    }
  }
}

impl fmt::Display for WildfirePhase {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Everything needed to start one agent session.
#[derive(Debug, Clone)]
pub struct StartOptions {
  pub project_id: String,
  pub project_name: String,
  pub project_root: PathBuf,
  pub project_color: String,
  pub mode: Mode,
  pub wildfire_phase: Option<WildfirePhase>,
  /// 0 means no task (chat, generate phases and modes).
  pub task_number: u32,
  pub task_title: String,
  /// Short positional user prompt, e.g. `Implement Task #0001: ...`.
  pub task_prompt: String,
  /// Full composed system prompt; the supervisor treats it as opaque.
  pub task_system_prompt: String,
  pub rows: u16,
  pub cols: u16,
}

impl StartOptions {
  /// Does this start require an isolated task workspace?
  pub fn needs_workspace(&self) -> bool {
    self.task_number > 0
      && matches!(
        (self.mode, self.wildfire_phase),
        (Mode::Task, _) | (Mode::StartAll, _) | (Mode::Wildfire, Some(WildfirePhase::Execute)),
      )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn opts(mode: Mode, phase: Option<WildfirePhase>, task_number: u32) -> StartOptions {
    StartOptions {
      project_id: "p".into(),
      project_name: "p".into(),
      project_root: "/tmp/p".into(),
      project_color: String::new(),
      mode,
      wildfire_phase: phase,
      task_number,
      task_title: String::new(),
      task_prompt: String::new(),
      task_system_prompt: String::new(),
      rows: 24,
      cols: 80,
    }
  }

  #[test]
  fn workspace_is_required_exactly_for_isolating_modes() {
    assert!(opts(Mode::Task, None, 1).needs_workspace());
    assert!(opts(Mode::StartAll, None, 1).needs_workspace());
    assert!(opts(Mode::Wildfire, Some(WildfirePhase::Execute), 1).needs_workspace());
    assert!(!opts(Mode::Wildfire, Some(WildfirePhase::Refine), 1).needs_workspace());
    assert!(!opts(Mode::Wildfire, Some(WildfirePhase::Generate), 0).needs_workspace());
    assert!(!opts(Mode::Chat, None, 0).needs_workspace());
    assert!(!opts(Mode::Task, None, 0).needs_workspace());
  }

  #[test]
  fn mode_string_round_trip() {
    for mode in [
      Mode::Chat,
      Mode::Task,
      Mode::StartAll,
      Mode::Wildfire,
      Mode::GenerateDefinition,
      Mode::GenerateTasks,
    ] {
      assert_eq!(Mode::parse(mode.as_str()), Some(mode));
    }
    assert_eq!(Mode::parse(""), Some(Mode::Chat));
    assert_eq!(Mode::parse("bogus"), None);
  }
}
