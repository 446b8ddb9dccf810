use jsonrpsee::core::RpcResult;
use jsonrpsee::server::RpcModule;

use crate::rpc::{LogContentDto, LogGetParams, ProjectParams};
use crate::store::logs::{list_logs, read_log};

use super::super::DaemonState;
use super::internal_err;

/// Register the session log service.
pub fn register(module: &mut RpcModule<DaemonState>) {
  module
    .register_method("log.list", |params, _ctx, _ext| -> RpcResult<serde_json::Value> {
      let p: ProjectParams = params.parse()?;
      let logs = list_logs(&p.project_id).map_err(internal_err)?;
      Ok(serde_json::json!(logs))
    })
    .expect("register log.list");

  module
    .register_method("log.get", |params, _ctx, _ext| -> RpcResult<serde_json::Value> {
      let p: LogGetParams = params.parse()?;
      let (entry, content) = read_log(&p.project_id, &p.log_id).map_err(internal_err)?;
      Ok(serde_json::json!(LogContentDto { entry, content }))
    })
    .expect("register log.get");
}
