use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::OnceLock;

use tracing::{info, subscriber::set_global_default};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::{EnvFilter, Registry, fmt, layer::SubscriberExt};

static WORKER_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Initialize JSON-lines logging to `log_path`.
///
/// `level` is an EnvFilter directive ("info", "foreman_core=debug", ...);
/// anything unparseable falls back to "info". Repeated calls are harmless:
/// the second `set_global_default` fails and is ignored.
pub fn init(log_path: &Path, level: &str) {
  if let Some(parent) = log_path.parent() {
    let _ = fs::create_dir_all(parent);
  }

  let Ok(file) = OpenOptions::new().create(true).append(true).open(log_path) else {
    eprintln!("warning: could not open log file {}", log_path.display());
    return;
  };

  // Non-blocking writer so slow disks never stall the PTY pumps. The guard
  // must live for the process lifetime or buffered lines are lost.
  let (writer, guard) = tracing_appender::non_blocking(file);
  let _ = WORKER_GUARD.set(guard);

  let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

  let json_layer = fmt::layer()
    .with_timer(ChronoUtc::rfc_3339())
    .json()
    .with_level(true)
    .with_target(false)
    .with_writer(move || writer.clone());

  let subscriber = Registry::default().with(filter).with(json_layer);
  let _ = set_global_default(subscriber);

  info!(event = "logging_initialized", path = %log_path.display(), level, "logging ready");
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::{thread, time::Duration};

  #[test]
  fn writes_json_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("logs.jsonl");
    init(&path, "info");
    info!(event = "probe", answer = 42, "probe line");

    // Let the non-blocking worker flush.
    thread::sleep(Duration::from_millis(80));

    let content = fs::read_to_string(&path).expect("log file");
    let mut saw_probe = false;
    for line in content.lines() {
      let value: serde_json::Value = serde_json::from_str(line).expect("valid json line");
      assert!(value.get("timestamp").is_some());
      assert!(value.get("level").is_some());
      if value
        .get("fields")
        .and_then(|f| f.get("event"))
        .and_then(|e| e.as_str())
        == Some("probe")
      {
        saw_probe = true;
      }
    }
    assert!(saw_probe, "probe event missing from {content}");
  }
}
