use std::time::Duration;

use jsonrpsee::core::RpcResult;
use jsonrpsee::server::RpcModule;
use tracing::info;

use crate::rpc::DaemonStatusDto;

use super::super::DaemonState;

/// Register daemon introspection and shutdown.
pub fn register(module: &mut RpcModule<DaemonState>) {
  module
    .register_method("daemon.status", |_params, ctx, _ext| -> RpcResult<serde_json::Value> {
      let agents = ctx.supervisor.list_agents();
      let active_projects: Vec<String> = agents.iter().map(|a| a.project_id.clone()).collect();
      // Self-update is handled out of process; the fields stay for clients.
      let status = DaemonStatusDto {
        host: ctx.host.clone(),
        port: ctx.port,
        pid: std::process::id(),
        started_at: ctx.started_at,
        active_agents: agents.len(),
        active_projects,
        update_available: false,
        update_version: None,
      };
      Ok(serde_json::json!(status))
    })
    .expect("register daemon.status");

  module
    .register_method("daemon.shutdown", |_params, ctx, _ext| -> RpcResult<serde_json::Value> {
      info!(event = "daemon_shutdown_requested", "shutdown requested over RPC");
      let tx = ctx.shutdown_tx.clone();
      // Give the response a moment to flush before tearing the server down.
      tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let _ = tx.send(true);
      });
      Ok(serde_json::json!(true))
    })
    .expect("register daemon.shutdown");
}
