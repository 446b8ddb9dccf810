use std::collections::BTreeMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::store::yaml::{load_yaml_or_else, save_yaml};

use super::paths::{ensure_global_dir, global_settings_file};

/// Launch configuration for one coding agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentBinaryConfig {
  /// Absolute binary path; empty means look the agent up on PATH.
  #[serde(default)]
  pub path: String,
}

/// Defaults applied to newly created projects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultsConfig {
  pub auto_merge: bool,
  pub auto_delete_workspace: bool,
  pub auto_start_tasks: bool,
  pub default_branch: String,
  pub default_sandbox: String,
  pub default_agent: String,
}

impl Default for DefaultsConfig {
  fn default() -> Self {
    Self {
      auto_merge: true,
      auto_delete_workspace: true,
      auto_start_tasks: true,
      default_branch: "main".into(),
      default_sandbox: "profile".into(),
      default_agent: "claude-code".into(),
    }
  }
}

/// Global settings, persisted as `~/.foreman/settings.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
  pub version: u32,
  #[serde(default)]
  pub agents: BTreeMap<String, AgentBinaryConfig>,
  #[serde(default)]
  pub defaults: DefaultsConfig,
}

impl Default for Settings {
  fn default() -> Self {
    let mut agents = BTreeMap::new();
    agents.insert("claude-code".to_string(), AgentBinaryConfig::default());
    Self {
      version: 1,
      agents,
      defaults: DefaultsConfig::default(),
    }
  }
}

impl Settings {
  /// Load settings, falling back to defaults when no file exists yet.
  pub fn load() -> Result<Self> {
    let path = global_settings_file()?;
    load_yaml_or_else(&path, Settings::default)
  }

  pub fn save(&self) -> Result<()> {
    ensure_global_dir()?;
    save_yaml(&global_settings_file()?, self)
  }

  /// Configured binary path for an agent, if one is set and non-empty.
  pub fn agent_path(&self, agent: &str) -> Option<&str> {
    self
      .agents
      .get(agent)
      .map(|cfg| cfg.path.as_str())
      .filter(|p| !p.is_empty())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_include_claude_code() {
    let s = Settings::default();
    assert!(s.agents.contains_key("claude-code"));
    assert_eq!(s.defaults.default_branch, "main");
    assert!(s.agent_path("claude-code").is_none(), "empty path means PATH lookup");
  }

  #[test]
  fn agent_path_returns_configured_value() {
    let mut s = Settings::default();
    s.agents.insert(
      "claude-code".into(),
      AgentBinaryConfig {
        path: "/opt/agents/claude".into(),
      },
    );
    assert_eq!(s.agent_path("claude-code"), Some("/opt/agents/claude"));
  }
}
