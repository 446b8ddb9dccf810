//! Daemon round-trip over the real RPC transport: boot on a dynamic port,
//! drive the surface with an HTTP JSON-RPC client, shut down over RPC.

use std::time::Duration;

use jsonrpsee::core::client::ClientT;
use jsonrpsee::core::params::ObjectParams;
use jsonrpsee::http_client::HttpClient;
use serde_json::json;

use foreman_core::domain::task::TaskStatus;
use foreman_core::rpc::{DaemonStatusDto, ProjectInfoDto, TaskDto};
use foreman_core::store::state::load_daemon_info;

fn params_of(value: serde_json::Value) -> ObjectParams {
  let mut params = ObjectParams::new();
  if let serde_json::Value::Object(map) = value {
    for (key, val) in map {
      params.insert(&key, val).expect("serializable param");
    }
  }
  params
}

fn run_git(cwd: &std::path::Path, args: &[&str]) {
  let status = std::process::Command::new("git")
    .current_dir(cwd)
    .args(args)
    .stdout(std::process::Stdio::null())
    .stderr(std::process::Stdio::null())
    .status()
    .expect("spawn git");
  assert!(status.success(), "git {args:?} failed");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn daemon_rpc_round_trip() {
  let home = tempfile::tempdir().unwrap();
  unsafe { std::env::set_var("FOREMAN_HOME", home.path()) };

  let handle = foreman_core::daemon::start(0).await.expect("start daemon");
  let port = handle.port();
  assert_ne!(port, 0, "dynamic port resolved");

  // The discovery file lets sibling CLIs find the server.
  let info = load_daemon_info().expect("read daemon.yaml").expect("daemon.yaml written");
  assert_eq!(info.port, port);
  assert_eq!(info.pid, std::process::id());

  let client = HttpClient::builder()
    .build(format!("http://127.0.0.1:{port}"))
    .expect("client");

  let status: DaemonStatusDto = client
    .request("daemon.status", ObjectParams::new())
    .await
    .expect("daemon.status");
  assert_eq!(status.port, port);
  assert_eq!(status.pid, std::process::id());
  assert_eq!(status.active_agents, 0);
  assert!(!status.update_available);

  // Register a project and walk the task CRUD surface.
  let project_dir = tempfile::tempdir().unwrap();
  run_git(project_dir.path(), &["init", "-b", "main"]);
  let registered: ProjectInfoDto = client
    .request(
      "project.register",
      params_of(json!({ "path": project_dir.path(), "name": "demo" })),
    )
    .await
    .expect("project.register");
  assert_eq!(registered.name, "demo");

  let created: TaskDto = client
    .request(
      "task.create",
      params_of(json!({
        "project_id": registered.project_id,
        "title": "write the parser",
        "prompt": "parse all the things",
        "status": "ready",
      })),
    )
    .await
    .expect("task.create");
  assert_eq!(created.task.task_number, 1);
  assert_eq!(created.task.status, TaskStatus::Ready);

  let listed: Vec<TaskDto> = client
    .request(
      "task.list",
      params_of(json!({ "project_id": registered.project_id, "status": "ready" })),
    )
    .await
    .expect("task.list");
  assert_eq!(listed.len(), 1);
  assert_eq!(listed[0].task.title, "write the parser");

  let _deleted: TaskDto = client
    .request(
      "task.delete",
      params_of(json!({ "project_id": registered.project_id, "task_number": 1 })),
    )
    .await
    .expect("task.delete");
  let after_delete: Vec<TaskDto> = client
    .request("task.list", params_of(json!({ "project_id": registered.project_id })))
    .await
    .expect("task.list after delete");
  assert!(after_delete.is_empty(), "soft-deleted tasks are hidden");

  // No task branches yet: the workspace listing is empty, not an error.
  let workspaces: Vec<serde_json::Value> = client
    .request("workspace.list", params_of(json!({ "project_id": registered.project_id })))
    .await
    .expect("workspace.list");
  assert!(workspaces.is_empty());

  // Status for a project with no agent reports not-running, not an error.
  let agent_status: serde_json::Value = client
    .request("agent.status", params_of(json!({ "project_id": registered.project_id })))
    .await
    .expect("agent.status");
  assert_eq!(agent_status["is_running"], json!(false));

  // Unknown project ids are a clean RPC error.
  let missing: Result<Vec<TaskDto>, _> = client
    .request("task.list", params_of(json!({ "project_id": "no-such-project" })))
    .await;
  assert!(missing.is_err());

  // Shutdown over RPC resolves the handle's wait.
  let _ok: bool = client
    .request("daemon.shutdown", ObjectParams::new())
    .await
    .expect("daemon.shutdown");
  tokio::time::timeout(Duration::from_secs(5), handle.wait_shutdown())
    .await
    .expect("shutdown signal");
  handle.shutdown().await;

  assert!(
    load_daemon_info().expect("read after shutdown").is_none(),
    "daemon.yaml removed on clean shutdown"
  );
}
