use std::path::{Path, PathBuf};

use crate::config::settings::Settings;

/// Resolve the agent binary: configured path first, then PATH, then
/// well-known install locations.
pub fn resolve_agent_binary(settings: &Settings, agent: &str) -> Option<PathBuf> {
  if let Some(configured) = settings.agent_path(agent) {
    let candidate = PathBuf::from(configured);
    if is_executable(&candidate) {
      return Some(candidate);
    }
  }

  let program = binary_name(agent);
  if let Some(found) = which(program) {
    return Some(found);
  }

  let home = dirs::home_dir()?;
  let mut fallbacks = vec![home.join(".claude/local/claude")];
  if cfg!(target_os = "macos") {
    fallbacks.push(PathBuf::from("/opt/homebrew/bin/claude"));
    fallbacks.push(PathBuf::from("/usr/local/bin/claude"));
  }
  fallbacks.into_iter().find(|p| is_executable(p))
}

fn binary_name(agent: &str) -> &str {
  match agent {
    "claude-code" | "" => "claude",
    other => other,
  }
}

/// Walk PATH entries looking for an executable named `program`.
fn which(program: &str) -> Option<PathBuf> {
  if program.contains(std::path::MAIN_SEPARATOR) {
    let candidate = PathBuf::from(program);
    return is_executable(&candidate).then_some(candidate);
  }
  let paths = std::env::var_os("PATH")?;
  std::env::split_paths(&paths)
    .map(|dir| dir.join(program))
    .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
  if !path.is_file() {
    return false;
  }
  #[cfg(unix)]
  {
    use std::os::unix::fs::PermissionsExt as _;
    std::fs::metadata(path)
      .map(|meta| meta.permissions().mode() & 0o111 != 0)
      .unwrap_or(false)
  }
  #[cfg(not(unix))]
  {
    true
  }
}
