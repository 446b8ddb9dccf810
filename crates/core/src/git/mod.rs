//! Thin wrappers around the `git` CLI plus the per-task workspace manager.
//!
//! Mutating operations (worktree add/remove, merge, branch delete) shell out
//! to `git`; read-only queries that have a cheap in-process answer go through
//! `gix`.

pub mod worktree;

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{Context, Result, bail};

use gix as git;

/// Run a git command quietly, failing on non-zero exit.
pub fn run_git(args: &[&str], cwd: &Path) -> Result<()> {
  let status = Command::new("git")
    .current_dir(cwd)
    .args(args)
    .stdout(Stdio::null())
    .stderr(Stdio::null())
    .status()
    .with_context(|| format!("failed to run git {}", args.join(" ")))?;
  if !status.success() {
    bail!("git {} exited with status {}", args.join(" "), status);
  }
  Ok(())
}

/// Run a git command and capture combined stdout+stderr for error reporting.
/// Returns `(success, output)`.
pub fn git_combined(args: &[&str], cwd: &Path) -> Result<(bool, String)> {
  let out = Command::new("git")
    .current_dir(cwd)
    .args(args)
    .output()
    .with_context(|| format!("failed to run git {}", args.join(" ")))?;
  let mut text = String::from_utf8_lossy(&out.stdout).into_owned();
  text.push_str(&String::from_utf8_lossy(&out.stderr));
  Ok((out.status.success(), text))
}

/// Run a git command and capture trimmed stdout, failing on non-zero exit.
pub fn git_output(args: &[&str], cwd: &Path) -> Result<String> {
  let out = Command::new("git")
    .current_dir(cwd)
    .args(args)
    .stdout(Stdio::piped())
    .stderr(Stdio::null())
    .output()
    .with_context(|| format!("failed to run git {}", args.join(" ")))?;
  if !out.status.success() {
    bail!("git {} exited with status {}", args.join(" "), out.status);
  }
  Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
}

/// Currently checked-out branch name at `cwd`, resolved through gix.
/// Returns `None` on a detached HEAD.
pub fn current_branch(cwd: &Path) -> Result<Option<String>> {
  let repo = git::discover(cwd).with_context(|| format!("not a git repository: {}", cwd.display()))?;
  let Some(name) = repo.head_name().context("failed to read HEAD")? else {
    return Ok(None);
  };
  Ok(Some(name.shorten().to_string()))
}

/// Main repository workdir for `cwd`, following linked worktrees back to the
/// primary checkout. Falls back to `cwd` outside any repository.
pub fn resolve_main_workdir(cwd: &Path) -> PathBuf {
  match git::discover(cwd) {
    Ok(repo) => {
      let workdir = match repo.work_dir() {
        Some(dir) => dir.to_path_buf(),
        None => return cwd.to_path_buf(),
      };
      match repo.kind() {
        git::repository::Kind::WorkTree { is_linked } if is_linked => repo
          .main_repo()
          .ok()
          .and_then(|r| r.work_dir().map(Path::to_path_buf))
          .unwrap_or(workdir),
        _ => workdir,
      }
    }
    Err(_) => cwd.to_path_buf(),
  }
}
