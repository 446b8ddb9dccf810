use jsonrpsee::core::RpcResult;
use jsonrpsee::server::RpcModule;
use tracing::info;

use crate::rpc::{TaskCreateParams, TaskDto, TaskIdParams, TaskListParams, TaskUpdateParams};
use crate::store::projects::project_path_for_id;
use crate::tasks::{CreateOptions, ListOptions, UpdateOptions};

use super::super::DaemonState;
use super::{internal_err, not_found_err};

/// Register project-scoped task CRUD.
pub fn register(module: &mut RpcModule<DaemonState>) {
  module
    .register_method("task.list", |params, ctx, _ext| -> RpcResult<serde_json::Value> {
      let p: TaskListParams = params.parse()?;
      let root = project_path_for_id(&p.project_id).map_err(not_found_err)?;
      let tasks = ctx
        .tasks
        .list_tasks(
          &root,
          &ListOptions {
            status: p.status,
            include_deleted: p.include_deleted,
          },
        )
        .map_err(internal_err)?;
      let dtos: Vec<TaskDto> = tasks
        .into_iter()
        .map(|task| TaskDto {
          project_id: p.project_id.clone(),
          task,
        })
        .collect();
      Ok(serde_json::json!(dtos))
    })
    .expect("register task.list");

  module
    .register_method("task.get", |params, ctx, _ext| -> RpcResult<serde_json::Value> {
      let p: TaskIdParams = params.parse()?;
      let root = project_path_for_id(&p.project_id).map_err(not_found_err)?;
      let task = ctx.tasks.get_task(&root, p.task_number).map_err(not_found_err)?;
      Ok(serde_json::json!(TaskDto { project_id: p.project_id, task }))
    })
    .expect("register task.get");

  module
    .register_method("task.create", |params, ctx, _ext| -> RpcResult<serde_json::Value> {
      let p: TaskCreateParams = params.parse()?;
      let root = project_path_for_id(&p.project_id).map_err(not_found_err)?;
      let task = ctx
        .tasks
        .create_task(
          &root,
          CreateOptions {
            title: p.title,
            prompt: p.prompt,
            acceptance_criteria: p.acceptance_criteria,
            status: p.status,
            position: p.position,
          },
        )
        .map_err(internal_err)?;
      info!(event = "task_created", project_id = %p.project_id, task_number = task.task_number);
      Ok(serde_json::json!(TaskDto { project_id: p.project_id, task }))
    })
    .expect("register task.create");

  module
    .register_method("task.update", |params, ctx, _ext| -> RpcResult<serde_json::Value> {
      let p: TaskUpdateParams = params.parse()?;
      let root = project_path_for_id(&p.project_id).map_err(not_found_err)?;
      let task = ctx
        .tasks
        .update_task(
          &root,
          UpdateOptions {
            task_number: p.task_number,
            title: p.title,
            prompt: p.prompt,
            acceptance_criteria: p.acceptance_criteria,
            status: p.status,
            success: p.success,
            failure_reason: p.failure_reason,
            position: p.position,
          },
        )
        .map_err(internal_err)?;
      Ok(serde_json::json!(TaskDto { project_id: p.project_id, task }))
    })
    .expect("register task.update");

  module
    .register_method("task.delete", |params, ctx, _ext| -> RpcResult<serde_json::Value> {
      let p: TaskIdParams = params.parse()?;
      let root = project_path_for_id(&p.project_id).map_err(not_found_err)?;
      let task = ctx.tasks.delete_task(&root, p.task_number).map_err(not_found_err)?;
      Ok(serde_json::json!(TaskDto { project_id: p.project_id, task }))
    })
    .expect("register task.delete");

  module
    .register_method("task.restore", |params, ctx, _ext| -> RpcResult<serde_json::Value> {
      let p: TaskIdParams = params.parse()?;
      let root = project_path_for_id(&p.project_id).map_err(not_found_err)?;
      let task = ctx.tasks.restore_task(&root, p.task_number).map_err(not_found_err)?;
      Ok(serde_json::json!(TaskDto { project_id: p.project_id, task }))
    })
    .expect("register task.restore");

  module
    .register_method("task.empty_trash", |params, ctx, _ext| -> RpcResult<serde_json::Value> {
      let p: crate::rpc::ProjectParams = params.parse()?;
      let root = project_path_for_id(&p.project_id).map_err(not_found_err)?;
      ctx.tasks.empty_trash(&root).map_err(internal_err)?;
      Ok(serde_json::json!(true))
    })
    .expect("register task.empty_trash");
}
