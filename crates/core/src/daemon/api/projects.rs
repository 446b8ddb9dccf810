use std::path::PathBuf;

use jsonrpsee::core::RpcResult;
use jsonrpsee::server::RpcModule;
use tracing::info;

use crate::config::paths::ensure_project_dirs;
use crate::domain::project::Project;
use crate::rpc::{ProjectInfoDto, ProjectRegisterParams};
use crate::store::projects::{load_project, load_projects_index, register_project, save_project};

use super::super::DaemonState;
use super::{internal_err, not_found_err};

/// Register project index maintenance: register (init + index) and list.
pub fn register(module: &mut RpcModule<DaemonState>) {
  module
    .register_method("project.register", |params, ctx, _ext| -> RpcResult<serde_json::Value> {
      let p: ProjectRegisterParams = params.parse()?;
      let given = PathBuf::from(&p.path);
      if !given.is_dir() {
        return Err(not_found_err(format!("project path does not exist: {}", p.path)));
      }
      // Registering from a subdirectory or linked worktree binds the project
      // to the main checkout.
      let root = crate::git::resolve_main_workdir(&given);

      // Initialize on first contact, reuse the existing file otherwise.
      let project = match load_project(&root).map_err(internal_err)? {
        Some(existing) => existing,
        None => {
          let name = p
            .name
            .clone()
            .or_else(|| root.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "project".to_string());
          let project = Project::new(uuid::Uuid::new_v4().to_string(), name);
          ensure_project_dirs(&root).map_err(internal_err)?;
          save_project(&root, &project).map_err(internal_err)?;
          info!(event = "project_initialized", project_id = %project.project_id, root = %root.display());
          project
        }
      };

      register_project(&project.project_id, &project.name, &root).map_err(internal_err)?;
      ctx.watcher.watch_project(&project.project_id, &root);

      let index = load_projects_index().map_err(internal_err)?;
      let entry = index
        .find(&project.project_id)
        .ok_or_else(|| internal_err("project vanished from index"))?;
      Ok(serde_json::json!(ProjectInfoDto {
        project_id: entry.project_id.clone(),
        name: entry.name.clone(),
        path: entry.path.clone(),
        position: entry.position,
      }))
    })
    .expect("register project.register");

  module
    .register_method("project.list", |_params, _ctx, _ext| -> RpcResult<serde_json::Value> {
      let index = load_projects_index().map_err(internal_err)?;
      let projects: Vec<ProjectInfoDto> = index
        .projects
        .iter()
        .map(|entry| ProjectInfoDto {
          project_id: entry.project_id.clone(),
          name: entry.name.clone(),
          path: entry.path.clone(),
          position: entry.position,
        })
        .collect();
      Ok(serde_json::json!(projects))
    })
    .expect("register project.list");
}
