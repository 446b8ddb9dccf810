use std::net::SocketAddr;

use anyhow::{Context, Result};
use jsonrpsee::server::{RpcModule, Server, ServerHandle};
use tracing::info;

use super::{DaemonState, api};

/// Bind the RPC server to the loopback interface. Port 0 asks the kernel for
/// a free port; the actual address is returned.
pub async fn bind(port: u16) -> Result<(Server, SocketAddr)> {
  let server = Server::builder()
    .build(format!("127.0.0.1:{port}"))
    .await
    .with_context(|| format!("failed to bind 127.0.0.1:{port}"))?;
  let addr = server.local_addr().context("failed to read local address")?;
  Ok((server, addr))
}

/// Assemble the full method surface and start serving. HTTP requests and
/// WebSocket upgrades (for subscriptions) share the port.
pub fn start(server: Server, state: DaemonState) -> ServerHandle {
  let mut module = RpcModule::new(state);
  api::agent::register(&mut module);
  api::tasks::register(&mut module);
  api::projects::register(&mut module);
  api::workspaces::register(&mut module);
  api::logs::register(&mut module);
  api::daemon::register(&mut module);

  let handle = server.start(module);
  info!(event = "rpc_server_started", "rpc server accepting connections");
  handle
}
