use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use crate::config::paths::worktrees_dir;
use crate::domain::task::format_task_number;

use super::{git_combined, git_output, run_git};

/// Branch namespace for task workspaces.
pub const BRANCH_PREFIX: &str = "foreman";

/// `foreman/0007`
pub fn workspace_branch(task_number: u32) -> String {
  format!("{}/{}", BRANCH_PREFIX, format_task_number(task_number))
}

/// `<root>/.foreman/worktrees/0007`
pub fn workspace_path(project_root: &Path, task_number: u32) -> PathBuf {
  worktrees_dir(project_root).join(format_task_number(task_number))
}

/// Task number encoded in a `foreman/NNNN` branch name, if any.
pub fn task_number_from_branch(branch: &str) -> Option<u32> {
  let rest = branch.strip_prefix(BRANCH_PREFIX)?.strip_prefix('/')?;
  rest.parse().ok()
}

/// Create (or reuse) the isolated working tree for a task.
///
/// The branch is always created fresh from the current HEAD; a stale branch
/// left over from an earlier run is force-deleted first, because reusing it
/// would resurrect old work.
pub fn ensure_workspace(project_root: &Path, task_number: u32) -> Result<PathBuf> {
  let path = workspace_path(project_root, task_number);
  let branch = workspace_branch(task_number);

  if path.is_dir() {
    return Ok(path);
  }

  fs::create_dir_all(worktrees_dir(project_root))
    .context("failed to create worktrees directory")?;

  // Stale registrations from manually deleted directories would block the add.
  let _ = run_git(&["worktree", "prune"], project_root);

  let path_str = path.to_string_lossy().into_owned();
  let (ok, output) = git_combined(&["worktree", "add", &path_str, "-b", &branch], project_root)?;
  if ok {
    info!(event = "workspace_created", branch = %branch, path = %path.display(), "workspace ready");
    return Ok(path);
  }

  if !output.contains("already exists") {
    bail!("failed to create workspace for #{}: {}", format_task_number(task_number), output.trim());
  }

  warn!(
    event = "workspace_stale_branch",
    branch = %branch,
    "branch exists from a previous run; recreating from HEAD"
  );
  let (deleted, del_out) = git_combined(&["branch", "-D", &branch], project_root)?;
  if !deleted {
    bail!("failed to delete stale branch {}: {}", branch, del_out.trim());
  }
  let (ok, output) = git_combined(&["worktree", "add", &path_str, "-b", &branch], project_root)?;
  if !ok {
    bail!("failed to create workspace after branch delete: {}", output.trim());
  }
  info!(event = "workspace_created", branch = %branch, path = %path.display(), "workspace ready");
  Ok(path)
}

/// Merge a task branch into `target_branch` from the project root.
///
/// Returns `Ok(true)` when a merge commit was made, `Ok(false)` when the
/// branch has no file-level differences against the target (a diff check, not
/// an ancestry check: cherry-picks and rebases can leave identical trees with
/// divergent history). On conflict the merge is aborted so the project tree
/// stays clean, and the error is returned.
pub fn merge_workspace(project_root: &Path, task_number: u32, target_branch: &str) -> Result<bool> {
  let branch = workspace_branch(task_number);

  let current = super::current_branch(project_root)
    .context("failed to determine current branch")?
    .unwrap_or_default();
  if current != target_branch {
    let (ok, out) = git_combined(&["checkout", target_branch], project_root)?;
    if !ok {
      bail!("failed to checkout {}: {}", target_branch, out.trim());
    }
  }

  let diff = git_output(&["diff", "--stat", target_branch, &branch], project_root)
    .context("failed to diff branch against target")?;
  if diff.is_empty() {
    info!(event = "merge_skipped", branch = %branch, target = %target_branch, "no file differences");
    return Ok(false);
  }

  let message = format!("Merge {branch}");
  let (ok, out) = git_combined(&["merge", "--no-ff", &branch, "-m", &message], project_root)?;
  if !ok {
    let (aborted, abort_out) = git_combined(&["merge", "--abort"], project_root)?;
    if aborted {
      info!(event = "merge_aborted", branch = %branch, "working tree restored after failed merge");
    } else {
      warn!(event = "merge_abort_failed", branch = %branch, output = %abort_out.trim(), "merge --abort failed");
    }
    bail!("merge of {} into {} failed: {}", branch, target_branch, out.trim());
  }

  // The checkout in the main tree can be stale after the merge commit.
  if let Err(err) = run_git(&["reset", "--hard", "HEAD"], project_root) {
    warn!(event = "merge_refresh_failed", error = %err, "hard reset after merge failed");
  }

  info!(event = "merge_completed", branch = %branch, target = %target_branch, "workspace merged");
  Ok(true)
}

/// Remove a task workspace directory and its branch.
///
/// The branch delete is forced only when the merge landed; otherwise a safe
/// delete is attempted, which refuses and thereby preserves unmerged work.
pub fn remove_workspace(project_root: &Path, task_number: u32, was_merged: bool) -> Result<()> {
  let path = workspace_path(project_root, task_number);
  let branch = workspace_branch(task_number);
  let path_str = path.to_string_lossy().into_owned();

  // --force tolerates untracked build artifacts inside the workspace.
  let (removed, out) = git_combined(&["worktree", "remove", "--force", &path_str], project_root)?;
  if !removed {
    warn!(event = "workspace_remove_failed", path = %path.display(), output = %out.trim(), "falling back to direct removal");
    let _ = run_git(&["worktree", "prune"], project_root);
    if path.exists() {
      if let Err(err) = fs::remove_dir_all(&path) {
        warn!(event = "workspace_rmdir_failed", path = %path.display(), error = %err, "directory left behind");
      }
      let _ = run_git(&["worktree", "prune"], project_root);
    }
  }

  let delete_flag = if was_merged { "-D" } else { "-d" };
  let (deleted, out) = git_combined(&["branch", delete_flag, &branch], project_root)?;
  if !deleted {
    if was_merged {
      warn!(event = "branch_delete_failed", branch = %branch, output = %out.trim(), "force delete failed");
    } else {
      warn!(event = "branch_kept", branch = %branch, "branch has unmerged changes; keeping it");
    }
  } else {
    info!(event = "branch_deleted", branch = %branch, forced = was_merged, "workspace branch removed");
  }

  Ok(())
}

/// Merge state of a task branch relative to the integration branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchState {
  Merged,
  Unmerged,
  /// Unmerged, no workspace directory, and no task file: nothing owns it.
  Orphaned,
}

impl BranchState {
  pub fn as_str(&self) -> &'static str {
    match self {
      BranchState::Merged => "merged",
      BranchState::Unmerged => "unmerged",
      BranchState::Orphaned => "orphaned",
    }
  }
}

/// One `foreman/NNNN` branch and what is known about it.
#[derive(Debug, Clone)]
pub struct WorkspaceBranch {
  pub name: String,
  pub task_number: u32,
  pub state: BranchState,
  /// Present when the workspace directory still exists.
  pub workspace_path: Option<PathBuf>,
}

/// List every task branch in the repository with its merge state.
pub fn list_workspace_branches(
  project_root: &Path,
  target_branch: &str,
) -> Result<Vec<WorkspaceBranch>> {
  let pattern = format!("{BRANCH_PREFIX}/*");
  let out = git_output(
    &["branch", "--list", &pattern, "--format=%(refname:short)"],
    project_root,
  )
  .context("failed to list workspace branches")?;

  let mut branches = Vec::new();
  for line in out.lines().map(str::trim).filter(|l| !l.is_empty()) {
    let Some(task_number) = task_number_from_branch(line) else {
      continue;
    };
    let path = workspace_path(project_root, task_number);
    let workspace_exists = path.is_dir();

    let merged = git_output(
      &["branch", "--merged", target_branch, "--list", line],
      project_root,
    )
    .map(|s| !s.is_empty())
    .unwrap_or(false);

    let state = if merged {
      BranchState::Merged
    } else if !workspace_exists
      && !crate::config::paths::task_file(project_root, task_number).exists()
    {
      BranchState::Orphaned
    } else {
      BranchState::Unmerged
    };

    branches.push(WorkspaceBranch {
      name: line.to_string(),
      task_number,
      state,
      workspace_path: workspace_exists.then_some(path),
    });
  }
  Ok(branches)
}
