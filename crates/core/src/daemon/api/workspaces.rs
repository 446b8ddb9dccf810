use jsonrpsee::core::RpcResult;
use jsonrpsee::server::RpcModule;
use tracing::info;

use crate::git::worktree::{list_workspace_branches, merge_workspace, remove_workspace};
use crate::rpc::{TaskIdParams, WorkspaceBranchDto, WorkspaceMergeParams, WorkspaceMergeResult};
use crate::store::projects::{load_project, project_path_for_id};

use super::super::DaemonState;
use super::{internal_err, not_found_err};

/// Register workspace branch maintenance: list, merge, remove.
///
/// These mirror what the supervisor does automatically after a task, for
/// projects with auto-merge or auto-delete disabled (or after a failed merge
/// was resolved by hand).
pub fn register(module: &mut RpcModule<DaemonState>) {
  module
    .register_method("workspace.list", |params, _ctx, _ext| -> RpcResult<serde_json::Value> {
      let p: crate::rpc::ProjectParams = params.parse()?;
      let root = project_path_for_id(&p.project_id).map_err(not_found_err)?;
      let project = load_project(&root)
        .map_err(internal_err)?
        .ok_or_else(|| not_found_err("project not initialized"))?;

      let branches = list_workspace_branches(&root, &project.default_branch)
        .map_err(internal_err)?;
      let dtos: Vec<WorkspaceBranchDto> = branches
        .into_iter()
        .map(|b| WorkspaceBranchDto {
          name: b.name,
          task_number: b.task_number,
          state: b.state.as_str().to_string(),
          workspace_path: b.workspace_path.map(|p| p.display().to_string()),
        })
        .collect();
      Ok(serde_json::json!(dtos))
    })
    .expect("register workspace.list");

  module
    .register_async_method("workspace.merge", |params, _ctx, _ext| async move {
      let p: WorkspaceMergeParams = params.parse()?;
      let root = project_path_for_id(&p.project_id).map_err(not_found_err)?;
      let project = load_project(&root)
        .map_err(internal_err)?
        .ok_or_else(|| not_found_err("project not initialized"))?;

      // Git work happens off the async executor.
      let task_number = p.task_number;
      let delete_after = p.delete_after_merge;
      let merged = tokio::task::spawn_blocking(move || {
        let merged = merge_workspace(&root, task_number, &project.default_branch)?;
        if delete_after && merged {
          remove_workspace(&root, task_number, true)?;
        }
        anyhow::Ok(merged)
      })
      .await
      .map_err(internal_err)?
      .map_err(internal_err)?;

      info!(
        event = "workspace_merge_rpc",
        project_id = %p.project_id,
        task_number,
        merged,
        "manual workspace merge"
      );
      Ok::<_, jsonrpsee::types::ErrorObjectOwned>(serde_json::json!(WorkspaceMergeResult { merged }))
    })
    .expect("register workspace.merge");

  module
    .register_async_method("workspace.remove", |params, _ctx, _ext| async move {
      let p: TaskIdParams = params.parse()?;
      let root = project_path_for_id(&p.project_id).map_err(not_found_err)?;

      // Unmerged work is protected by the safe branch delete inside.
      let task_number = p.task_number;
      tokio::task::spawn_blocking(move || remove_workspace(&root, task_number, false))
        .await
        .map_err(internal_err)?
        .map_err(internal_err)?;

      info!(
        event = "workspace_remove_rpc",
        project_id = %p.project_id,
        task_number,
        "manual workspace removal"
      );
      Ok::<_, jsonrpsee::types::ErrorObjectOwned>(serde_json::json!(true))
    })
    .expect("register workspace.remove");
}
