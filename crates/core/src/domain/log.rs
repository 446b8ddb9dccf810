use serde::{Deserialize, Serialize};

/// Metadata for one persisted agent session log.
///
/// Stored as a `---`-fenced header at the top of the log file; timestamps are
/// RFC 3339 strings so the header stays greppable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
  pub log_id: String,
  pub project_id: String,
  pub task_number: u32,
  pub session_number: u32,
  pub agent: String,
  pub mode: String,
  pub started_at: String,
  pub ended_at: String,
  /// "completed" or "interrupted".
  pub status: String,
}
