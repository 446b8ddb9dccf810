use std::fs;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, SecondsFormat, Utc};

use crate::config::paths::{ensure_global_logs_dir, global_logs_dir};
use crate::domain::log::LogEntry;
use crate::domain::task::format_task_number;

/// Persist an agent session's scrollback under
/// `~/.foreman/logs/<project_id>/<log_id>.log`.
///
/// The file starts with a `---`-fenced header followed by the raw scrollback
/// lines. `status` is "completed" or "interrupted".
#[allow(clippy::too_many_arguments)]
pub fn write_log(
  project_id: &str,
  task_number: u32,
  session_number: u32,
  agent: &str,
  mode: &str,
  status: &str,
  started_at: DateTime<Utc>,
  scrollback: &[String],
) -> Result<LogEntry> {
  ensure_global_logs_dir()?;
  let logs_root = global_logs_dir()?;
  write_log_at(
    &logs_root,
    project_id,
    task_number,
    session_number,
    agent,
    mode,
    status,
    started_at,
    scrollback,
  )
}

/// List log metadata for a project, newest first.
pub fn list_logs(project_id: &str) -> Result<Vec<LogEntry>> {
  list_logs_at(&global_logs_dir()?, project_id)
}

/// Read one log: header metadata plus the scrollback content after the fence.
pub fn read_log(project_id: &str, log_id: &str) -> Result<(LogEntry, String)> {
  read_log_at(&global_logs_dir()?, project_id, log_id)
}

#[allow(clippy::too_many_arguments)]
pub fn write_log_at(
  logs_root: &Path,
  project_id: &str,
  task_number: u32,
  session_number: u32,
  agent: &str,
  mode: &str,
  status: &str,
  started_at: DateTime<Utc>,
  scrollback: &[String],
) -> Result<LogEntry> {
  let project_logs_dir = logs_root.join(project_id);
  fs::create_dir_all(&project_logs_dir)
    .with_context(|| format!("failed to create {}", project_logs_dir.display()))?;

  let ended_at = Utc::now();
  let timestamp = started_at.format("%Y-%m-%dT%H-%M-%S");
  let log_id = if task_number > 0 {
    format!("{}-{}-{}", format_task_number(task_number), session_number, timestamp)
  } else {
    format!("{mode}-{session_number}-{timestamp}")
  };

  let entry = LogEntry {
    log_id: log_id.clone(),
    project_id: project_id.to_string(),
    task_number,
    session_number,
    agent: agent.to_string(),
    mode: mode.to_string(),
    started_at: started_at.to_rfc3339_opts(SecondsFormat::Secs, true),
    ended_at: ended_at.to_rfc3339_opts(SecondsFormat::Secs, true),
    status: status.to_string(),
  };

  let path = project_logs_dir.join(format!("{log_id}.log"));
  let file =
    fs::File::create(&path).with_context(|| format!("failed to create {}", path.display()))?;
  let mut w = BufWriter::new(file);
  writeln!(w, "---")?;
  writeln!(w, "project_id: {}", entry.project_id)?;
  writeln!(w, "task_number: {}", entry.task_number)?;
  writeln!(w, "session_number: {}", entry.session_number)?;
  writeln!(w, "agent: {}", entry.agent)?;
  writeln!(w, "mode: {}", entry.mode)?;
  writeln!(w, "started_at: {}", entry.started_at)?;
  writeln!(w, "ended_at: {}", entry.ended_at)?;
  writeln!(w, "status: {}", entry.status)?;
  writeln!(w, "---")?;
  for line in scrollback {
    writeln!(w, "{line}")?;
  }
  w.flush()?;

  Ok(entry)
}

pub fn list_logs_at(logs_root: &Path, project_id: &str) -> Result<Vec<LogEntry>> {
  let project_logs_dir = logs_root.join(project_id);
  if !project_logs_dir.exists() {
    return Ok(Vec::new());
  }

  let mut logs = Vec::new();
  for entry in fs::read_dir(&project_logs_dir)? {
    let entry = entry?;
    let path = entry.path();
    if path.extension().and_then(|e| e.to_str()) != Some("log") {
      continue;
    }
    // Unparseable logs are skipped rather than failing the listing.
    if let Ok(meta) = parse_log_header(&path) {
      logs.push(meta);
    }
  }
  logs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
  Ok(logs)
}

pub fn read_log_at(logs_root: &Path, project_id: &str, log_id: &str) -> Result<(LogEntry, String)> {
  let path = logs_root.join(project_id).join(format!("{log_id}.log"));
  let entry = parse_log_header(&path)?;
  let raw = fs::read_to_string(&path)?;
  let content = match split_after_header(&raw) {
    Some(body) => body.to_string(),
    None => raw,
  };
  Ok((entry, content))
}

fn split_after_header(raw: &str) -> Option<&str> {
  let rest = raw.strip_prefix("---\n")?;
  let end = rest.find("\n---\n")?;
  Some(&rest[end + 5..])
}

fn parse_log_header(path: &Path) -> Result<LogEntry> {
  let file = fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
  let mut lines = BufReader::new(file).lines();

  match lines.next() {
    Some(Ok(first)) if first.trim() == "---" => {}
    _ => bail!("log {} has no header fence", path.display()),
  }

  let mut entry = LogEntry {
    log_id: path
      .file_stem()
      .map(|s| s.to_string_lossy().into_owned())
      .unwrap_or_default(),
    project_id: String::new(),
    task_number: 0,
    session_number: 0,
    agent: String::new(),
    mode: String::new(),
    started_at: String::new(),
    ended_at: String::new(),
    status: String::new(),
  };

  for line in lines {
    let line = line?;
    if line.trim() == "---" {
      return Ok(entry);
    }
    let Some((key, value)) = line.split_once(':') else {
      continue;
    };
    let value = value.trim();
    match key.trim() {
      "project_id" => entry.project_id = value.to_string(),
      "task_number" => entry.task_number = value.parse().unwrap_or(0),
      "session_number" => entry.session_number = value.parse().unwrap_or(0),
      "agent" => entry.agent = value.to_string(),
      "mode" => entry.mode = value.to_string(),
      "started_at" => entry.started_at = value.to_string(),
      "ended_at" => entry.ended_at = value.to_string(),
      "status" => entry.status = value.to_string(),
      _ => {}
    }
  }
  bail!("log {} header is not terminated", path.display())
}
