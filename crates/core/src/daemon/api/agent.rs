use jsonrpsee::SubscriptionMessage;
use jsonrpsee::core::RpcResult;
use jsonrpsee::server::RpcModule;
use tracing::info;

use crate::agent::{Mode, StartOptions};
use crate::chain;
use crate::domain::project::Project;
use crate::domain::task::TaskStatus;
use crate::prompts;
use crate::rpc::{
  AgentStatusDto, ProjectParams, RawOutputChunk, ResizeParams, ScrollbackParams, ScrollbackResult,
  SendInputParams, StartAgentParams,
};
use crate::store::projects::{load_project, project_path_for_id};

use super::super::DaemonState;
use super::{agent_err, internal_err, not_found_err};

/// Register the agent service: lifecycle, terminal I/O, and the three
/// subscription streams.
pub fn register(module: &mut RpcModule<DaemonState>) {
  module
    .register_async_method("agent.start", |params, ctx, _ext| async move {
      let p: StartAgentParams = params.parse()?;
      let opts = resolve_start_options(&p)?;
      let agent = ctx
        .supervisor
        .start_agent(opts)
        .await
        .map_err(agent_err)?;
      Ok::<_, jsonrpsee::types::ErrorObjectOwned>(serde_json::json!(AgentStatusDto::from_agent(
        &agent
      )))
    })
    .expect("register agent.start");

  module
    .register_async_method("agent.stop", |params, ctx, _ext| async move {
      let p: ProjectParams = params.parse()?;
      ctx
        .supervisor
        .stop_agent_by_user(&p.project_id)
        .await
        .map_err(agent_err)?;
      Ok::<_, jsonrpsee::types::ErrorObjectOwned>(serde_json::json!(true))
    })
    .expect("register agent.stop");

  module
    .register_method("agent.status", |params, ctx, _ext| -> RpcResult<serde_json::Value> {
      let p: ProjectParams = params.parse()?;
      let dto = match ctx.supervisor.get_agent(&p.project_id) {
        Some(agent) => AgentStatusDto::from_agent(&agent),
        None => AgentStatusDto::not_running(&p.project_id),
      };
      Ok(serde_json::json!(dto))
    })
    .expect("register agent.status");

  module
    .register_method("agent.input", |params, ctx, _ext| -> RpcResult<serde_json::Value> {
      let p: SendInputParams = params.parse()?;
      let agent = ctx
        .supervisor
        .get_agent(&p.project_id)
        .ok_or_else(|| not_found_err(format!("no agent running for project: {}", p.project_id)))?;
      agent.process.send_input(p.data.as_bytes()).map_err(internal_err)?;
      Ok(serde_json::json!(true))
    })
    .expect("register agent.input");

  module
    .register_method("agent.resize", |params, ctx, _ext| -> RpcResult<serde_json::Value> {
      let p: ResizeParams = params.parse()?;
      let agent = ctx
        .supervisor
        .get_agent(&p.project_id)
        .ok_or_else(|| not_found_err(format!("no agent running for project: {}", p.project_id)))?;
      agent.process.resize(p.rows, p.cols).map_err(internal_err)?;
      Ok(serde_json::json!(true))
    })
    .expect("register agent.resize");

  module
    .register_method("agent.scrollback", |params, ctx, _ext| -> RpcResult<serde_json::Value> {
      let p: ScrollbackParams = params.parse()?;
      let agent = ctx
        .supervisor
        .get_agent(&p.project_id)
        .ok_or_else(|| not_found_err(format!("no agent running for project: {}", p.project_id)))?;
      let limit = if p.limit == 0 { usize::MAX } else { p.limit };
      let (lines, total) = agent.process.scrollback(p.offset, limit);
      Ok(serde_json::json!(ScrollbackResult { lines, total }))
    })
    .expect("register agent.scrollback");

  module
    .register_method("agent.resume", |params, ctx, _ext| -> RpcResult<serde_json::Value> {
      let p: ProjectParams = params.parse()?;
      let agent = ctx
        .supervisor
        .get_agent(&p.project_id)
        .ok_or_else(|| not_found_err(format!("no agent running for project: {}", p.project_id)))?;
      agent.process.clear_issue();
      info!(event = "agent_resumed", project_id = %p.project_id, "issue cleared by client");
      Ok(serde_json::json!(AgentStatusDto::from_agent(&agent)))
    })
    .expect("register agent.resume");

  register_subscriptions(module);
}

/// Resolve a start request into full StartOptions, composing prompts for the
/// requested mode.
fn resolve_start_options(
  p: &StartAgentParams,
) -> Result<StartOptions, jsonrpsee::types::ErrorObjectOwned> {
  let root = project_path_for_id(&p.project_id).map_err(not_found_err)?;
  let project = load_project(&root)
    .map_err(internal_err)?
    .ok_or_else(|| not_found_err(format!("project not initialized: {}", root.display())))?;
  let mode = Mode::parse(&p.mode)
    .ok_or_else(|| internal_err(format!("unknown agent mode: {}", p.mode)))?;

  let base = |project: &Project| StartOptions {
    project_id: p.project_id.clone(),
    project_name: project.name.clone(),
    project_root: root.clone(),
    project_color: project.color.clone(),
    mode,
    wildfire_phase: None,
    task_number: 0,
    task_title: String::new(),
    task_prompt: String::new(),
    task_system_prompt: String::new(),
    rows: p.rows,
    cols: p.cols,
  };

  match mode {
    Mode::Chat => {
      let mut opts = base(&project);
      opts.task_system_prompt = prompts::compose_chat_prompt(&project);
      Ok(opts)
    }
    Mode::Task => {
      let task = crate::tasks::TaskManager::new()
        .get_task(&root, p.task_number)
        .map_err(not_found_err)?;
      if task.status == TaskStatus::Done {
        return Err(agent_err(format!("task #{:04} is already done", p.task_number)));
      }
      let mut opts = base(&project);
      opts.task_number = task.task_number;
      opts.task_title = task.title.clone();
      opts.task_prompt = prompts::compose_task_user_prompt(task.task_number, &task.title);
      opts.task_system_prompt = prompts::compose_task_system_prompt(
        &project,
        task.task_number,
        &task.title,
        &task.prompt,
        &task.acceptance_criteria,
      );
      Ok(opts)
    }
    Mode::StartAll | Mode::Wildfire => {
      chain::next_start_options(&p.project_id, &root, mode, None, p.rows, p.cols)
        .map_err(internal_err)?
        .ok_or_else(|| agent_err("no ready tasks to start"))
    }
    Mode::GenerateDefinition => {
      let mut opts = base(&project);
      opts.task_prompt = prompts::compose_definition_user_prompt();
      opts.task_system_prompt = prompts::compose_definition_system_prompt(&project);
      Ok(opts)
    }
    Mode::GenerateTasks => {
      let mut opts = base(&project);
      opts.task_prompt = prompts::compose_tasks_user_prompt();
      opts.task_system_prompt = prompts::compose_tasks_system_prompt(&project);
      Ok(opts)
    }
  }
}

fn register_subscriptions(module: &mut RpcModule<DaemonState>) {
  module
    .register_subscription(
      "agent.subscribe_raw",
      "agent.raw_output",
      "agent.unsubscribe_raw",
      |params, pending, ctx, _ext| async move {
        let Ok(p) = params.parse::<ProjectParams>() else {
          pending.reject(internal_err("invalid params")).await;
          return Ok(());
        };
        let Some(agent) = ctx.supervisor.get_agent(&p.project_id) else {
          pending
            .reject(not_found_err(format!("no agent running for project: {}", p.project_id)))
            .await;
          return Ok(());
        };
        let process = agent.process.clone();
        let (sub_id, mut rx) = process.subscribe_raw();
        let Ok(sink) = pending.accept().await else {
          process.unsubscribe_raw(sub_id);
          return Ok(());
        };

        let mut done = process.done();
        loop {
          tokio::select! {
            _ = sink.closed() => break,
            _ = async { let _ = done.wait_for(|exited| *exited).await; } => break,
            item = rx.recv() => {
              let Some(chunk) = item else { break };
              let payload = RawOutputChunk {
                project_id: p.project_id.clone(),
                data: String::from_utf8_lossy(&chunk).into_owned(),
              };
              let Ok(msg) = SubscriptionMessage::from_json(&payload) else { break };
              if sink.send(msg).await.is_err() {
                break;
              }
            }
          }
        }
        process.unsubscribe_raw(sub_id);
        Ok::<(), jsonrpsee::core::StringError>(())
      },
    )
    .expect("register agent.subscribe_raw");

  module
    .register_subscription(
      "agent.subscribe_screen",
      "agent.screen",
      "agent.unsubscribe_screen",
      |params, pending, ctx, _ext| async move {
        let Ok(p) = params.parse::<ProjectParams>() else {
          pending.reject(internal_err("invalid params")).await;
          return Ok(());
        };
        let Some(agent) = ctx.supervisor.get_agent(&p.project_id) else {
          pending
            .reject(not_found_err(format!("no agent running for project: {}", p.project_id)))
            .await;
          return Ok(());
        };
        let process = agent.process.clone();
        let (sub_id, mut rx) = process.subscribe_screen();
        let Ok(sink) = pending.accept().await else {
          process.unsubscribe_screen(sub_id);
          return Ok(());
        };

        // Prime the stream: a late joiner sees the current screen without
        // replaying history.
        let snapshot = process.snapshot_screen();
        if let Ok(msg) = SubscriptionMessage::from_json(&snapshot)
          && sink.send(msg).await.is_err()
        {
          process.unsubscribe_screen(sub_id);
          return Ok(());
        }

        let mut done = process.done();
        loop {
          tokio::select! {
            _ = sink.closed() => break,
            _ = async { let _ = done.wait_for(|exited| *exited).await; } => break,
            item = rx.recv() => {
              let Some(update) = item else { break };
              let Ok(msg) = SubscriptionMessage::from_json(&update) else { break };
              if sink.send(msg).await.is_err() {
                break;
              }
            }
          }
        }
        process.unsubscribe_screen(sub_id);
        Ok::<(), jsonrpsee::core::StringError>(())
      },
    )
    .expect("register agent.subscribe_screen");

  module
    .register_subscription(
      "agent.subscribe_issues",
      "agent.issue",
      "agent.unsubscribe_issues",
      |params, pending, ctx, _ext| async move {
        let Ok(p) = params.parse::<ProjectParams>() else {
          pending.reject(internal_err("invalid params")).await;
          return Ok(());
        };
        let Some(agent) = ctx.supervisor.get_agent(&p.project_id) else {
          pending
            .reject(not_found_err(format!("no agent running for project: {}", p.project_id)))
            .await;
          return Ok(());
        };
        let process = agent.process.clone();
        // The channel is primed with the current issue (or null) on
        // subscribe, so the first frame is always the present state.
        let (sub_id, mut rx) = process.subscribe_issues();
        let Ok(sink) = pending.accept().await else {
          process.unsubscribe_issues(sub_id);
          return Ok(());
        };

        let mut done = process.done();
        loop {
          tokio::select! {
            _ = sink.closed() => break,
            _ = async { let _ = done.wait_for(|exited| *exited).await; } => break,
            item = rx.recv() => {
              let Some(issue) = item else { break };
              let Ok(msg) = SubscriptionMessage::from_json(&issue) else { break };
              if sink.send(msg).await.is_err() {
                break;
              }
            }
          }
        }
        process.unsubscribe_issues(sub_id);
        Ok::<(), jsonrpsee::core::StringError>(())
      },
    )
    .expect("register agent.subscribe_issues");
}
