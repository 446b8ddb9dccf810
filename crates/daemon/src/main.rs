//! `foremand` — the foreman daemon.
//!
//! Binds the JSON-RPC server on a loopback port, writes the discovery file,
//! and runs until SIGINT or a `daemon.shutdown` RPC.

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use foreman_core::config::paths::{ensure_global_dir, global_trace_log_file};
use foreman_core::store::state::is_daemon_running;
use foreman_core::{daemon, logging};

#[derive(Debug, Parser)]
#[command(name = "foremand", about = "Local orchestrator daemon for coding agents")]
struct Args {
  /// Port to listen on; 0 picks a free port.
  #[arg(long, default_value_t = 0)]
  port: u16,

  /// Log filter directive (e.g. "info" or "foreman_core=debug").
  #[arg(long, default_value = "info")]
  log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
  let args = Args::parse();
  ensure_global_dir()?;
  logging::init(&global_trace_log_file()?, &args.log_level);

  match is_daemon_running() {
    Ok((true, Some(info))) => {
      eprintln!(
        "foremand is already running (pid {}, port {}); stop it first",
        info.pid, info.port,
      );
      std::process::exit(1);
    }
    Ok(_) => {}
    Err(err) => error!(event = "daemon_liveness_check_failed", error = %err),
  }

  let handle = daemon::start(args.port).await?;
  // Stdout carries the bound port for scripts; everything else goes to logs.
  println!("{}", handle.port());
  info!(event = "foremand_ready", port = handle.port());

  tokio::select! {
    _ = tokio::signal::ctrl_c() => {
      info!(event = "interrupt_received", "SIGINT; shutting down");
    }
    _ = handle.wait_shutdown() => {
      info!(event = "shutdown_rpc_received", "shutdown requested; shutting down");
    }
  }

  handle.shutdown().await;
  Ok(())
}
