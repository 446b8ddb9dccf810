//! Filesystem sandboxing for the agent child process.
//!
//! On macOS the agent is wrapped with `sandbox-exec` and a generated profile:
//! reads are broad but credential directories and protected user folders are
//! denied, writes are confined to the project, agent config, temp, and
//! package-manager caches. On other hosts there is no equivalent profile
//! language, so the wrap is an explicit no-sandbox fallback that logs a
//! warning rather than silently claiming coverage.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::warn;

/// Env var that enables trace logging of denied operations.
pub const TRACE_ENV: &str = "FOREMAN_SANDBOX_TRACE";

/// A command transformed for sandboxed execution.
#[derive(Debug, Clone)]
pub struct WrappedCommand {
  pub program: String,
  pub args: Vec<String>,
  pub env: Vec<(String, String)>,
  /// Generated profile file to delete on process cleanup, when one exists.
  pub profile_path: Option<PathBuf>,
  /// "profile" on macOS, "none" elsewhere. Reported, never implied.
  pub sandbox: &'static str,
}

/// Generate the sandbox profile text for the given home and project dirs.
pub fn generate_profile(home_dir: &Path, project_dir: &Path, trace: bool) -> String {
  let home = home_dir.display();
  let project = project_dir.display();
  let mut p = String::new();

  if trace {
    p.push_str("(trace \"/tmp/foreman-sandbox-trace.sb\")\n");
  }
  p.push_str("(version 1)\n(deny default)\n\n");

  p.push_str("; Reads: allow broadly, deny credentials\n");
  p.push_str("(allow file-read* (subpath \"/\"))\n");
  for dir in [".ssh", ".aws", ".gnupg", ".config/gcloud", ".kube"] {
    p.push_str(&format!("(deny file-read* (subpath \"{home}/{dir}\"))\n"));
  }
  for file in [".netrc", ".npmrc"] {
    p.push_str(&format!("(deny file-read* (literal \"{home}/{file}\"))\n"));
  }

  p.push_str("\n; Protected user folders\n");
  for dir in ["Desktop", "Documents", "Downloads", "Music", "Movies", "Pictures"] {
    p.push_str(&format!("(deny file-read* (subpath \"{home}/{dir}\"))\n"));
  }

  p.push_str("\n; Writes: project, agent config, temp\n");
  p.push_str(&format!("(allow file-write* (subpath \"{project}\"))\n"));
  p.push_str(&format!("(allow file-write* (subpath \"{home}/.claude\"))\n"));
  p.push_str(&format!("(allow file-write* (literal \"{home}/.claude.json\"))\n"));
  p.push_str(&format!("(allow file-write* (subpath \"{home}/Library/Caches/claude-cli-nodejs\"))\n"));
  for dir in ["/tmp", "/private/tmp", "/var/folders", "/private/var/folders"] {
    p.push_str(&format!("(allow file-write* (subpath \"{dir}\"))\n"));
  }

  p.push_str("\n; Package manager caches\n");
  for dir in [".npm", ".yarn", ".pnpm-store", ".cache", ".local/share/pnpm"] {
    p.push_str(&format!("(allow file-write* (subpath \"{home}/{dir}\"))\n"));
  }
  for dir in ["Library/Caches/npm", "Library/Caches/yarn"] {
    p.push_str(&format!("(allow file-write* (subpath \"{home}/{dir}\"))\n"));
  }

  p.push_str("\n; Dev tool caches\n");
  for dir in [".cargo", "go", ".rustup"] {
    p.push_str(&format!("(allow file-write* (subpath \"{home}/{dir}\"))\n"));
  }

  p.push_str("\n; Denied even inside the project\n");
  p.push_str("(deny file-write* (regex #\"/\\.env($|[^/]*)\"))\n");
  p.push_str(&format!("(deny file-write* (subpath \"{project}/.git/hooks\"))\n"));

  p.push_str("\n; Network, processes, devices\n");
  p.push_str("(allow network*)\n");
  p.push_str("(allow file-read* (subpath \"/dev\"))\n");
  p.push_str("(allow file-write* (subpath \"/dev\"))\n");
  p.push_str("(allow process-exec*)\n(allow process-fork)\n(allow process-info*)\n");
  p.push_str("(allow signal)\n(allow mach*)\n(allow sysctl*)\n(allow ipc*)\n(allow file-ioctl)\n");

  p
}

fn base_env() -> Vec<(String, String)> {
  let mut env: Vec<(String, String)> = std::env::vars().collect();
  set_env(&mut env, "TERM", "xterm-256color");
  set_env(&mut env, "COLORTERM", "truecolor");

  // Common tool prefixes that launchd sessions miss.
  let mut path = std::env::var("PATH").unwrap_or_default();
  for p in ["/opt/homebrew/bin", "/usr/local/bin"] {
    if !path.split(':').any(|seg| seg == p) {
      path = format!("{p}:{path}");
    }
  }
  set_env(&mut env, "PATH", &path);
  env
}

fn set_env(env: &mut Vec<(String, String)>, key: &str, value: &str) {
  if let Some(slot) = env.iter_mut().find(|(k, _)| k == key) {
    slot.1 = value.to_string();
  } else {
    env.push((key.to_string(), value.to_string()));
  }
}

/// Wrap `program args...` for sandboxed execution in `project_dir`.
///
/// On macOS this writes the profile to a temp file and prefixes the command
/// with `sandbox-exec -f <profile>`; the caller owns deleting the profile via
/// [`WrappedCommand::profile_path`] on cleanup.
pub fn wrap_command(
  home_dir: &Path,
  project_dir: &Path,
  program: &str,
  args: &[String],
) -> Result<WrappedCommand> {
  let env = base_env();

  if cfg!(target_os = "macos") {
    let trace = std::env::var(TRACE_ENV).is_ok_and(|v| v == "1");
    let profile = generate_profile(home_dir, project_dir, trace);

    let tmp = tempfile::Builder::new()
      .prefix("foreman-sandbox-")
      .suffix(".sb")
      .tempfile()
      .context("failed to create sandbox profile file")?;
    tmp
      .as_file()
      .write_all(profile.as_bytes())
      .context("failed to write sandbox profile")?;
    let (_file, path) = tmp.keep().context("failed to persist sandbox profile")?;

    let mut wrapped_args = vec!["-f".to_string(), path.display().to_string(), program.to_string()];
    wrapped_args.extend(args.iter().cloned());
    return Ok(WrappedCommand {
      program: "sandbox-exec".to_string(),
      args: wrapped_args,
      env,
      profile_path: Some(path),
      sandbox: "profile",
    });
  }

  warn!(
    event = "sandbox_unavailable",
    os = std::env::consts::OS,
    "no sandbox profile support on this host; agent runs unsandboxed"
  );
  Ok(WrappedCommand {
    program: program.to_string(),
    args: args.to_vec(),
    env,
    profile_path: None,
    sandbox: "none",
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn profile_denies_credentials_and_allows_project_writes() {
    let p = generate_profile(Path::new("/Users/dev"), Path::new("/Users/dev/proj"), false);
    assert!(p.starts_with("(version 1)"));
    assert!(p.contains("(deny default)"));
    assert!(p.contains("(deny file-read* (subpath \"/Users/dev/.ssh\"))"));
    assert!(p.contains("(deny file-read* (literal \"/Users/dev/.netrc\"))"));
    assert!(p.contains("(deny file-read* (subpath \"/Users/dev/Documents\"))"));
    assert!(p.contains("(allow file-write* (subpath \"/Users/dev/proj\"))"));
    assert!(p.contains("(deny file-write* (subpath \"/Users/dev/proj/.git/hooks\"))"));
    assert!(p.contains("(allow file-write* (subpath \"/Users/dev/.cargo\"))"));
    assert!(p.contains("(allow network*)"));
  }

  #[test]
  fn trace_directive_is_prepended_only_on_request() {
    let quiet = generate_profile(Path::new("/h"), Path::new("/p"), false);
    assert!(!quiet.contains("(trace"));
    let traced = generate_profile(Path::new("/h"), Path::new("/p"), true);
    assert!(traced.starts_with("(trace"));
  }

  #[test]
  fn env_always_carries_terminal_vars() {
    let mut env = vec![("PATH".to_string(), "/usr/bin".to_string())];
    set_env(&mut env, "TERM", "xterm-256color");
    set_env(&mut env, "PATH", "/opt/homebrew/bin:/usr/bin");
    assert!(env.iter().any(|(k, v)| k == "TERM" && v == "xterm-256color"));
    assert_eq!(env.iter().filter(|(k, _)| k == "PATH").count(), 1);
  }

  #[cfg(not(target_os = "macos"))]
  #[test]
  fn non_macos_wrap_is_an_explicit_no_sandbox() {
    let wrapped =
      wrap_command(Path::new("/home/dev"), Path::new("/home/dev/p"), "agent", &["--x".into()])
        .unwrap();
    assert_eq!(wrapped.program, "agent");
    assert_eq!(wrapped.sandbox, "none");
    assert!(wrapped.profile_path.is_none());
  }
}
