//! Detection of embedded agent-level errors in PTY output.
//!
//! The agent keeps running through auth failures and rate limits; it just
//! stops making progress. This scanner recognizes those conditions in the
//! output stream so the host can surface an issue banner and a resume action.

use chrono::{DateTime, Duration, FixedOffset, Local, NaiveTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// How many consecutive clean, non-empty line batches clear an active issue.
pub const CLEAN_BATCHES_TO_CLEAR: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
  AuthRequired,
  RateLimited,
}

/// A recognized out-of-band condition blocking the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentIssue {
  pub kind: IssueKind,
  pub detected_at: DateTime<Utc>,
  /// The original matching line, ANSI-stripped.
  pub message: String,
  /// Parsed reset instant for rate limits, when the line carried one.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub reset_at: Option<DateTime<Utc>>,
}

/// State change produced by feeding a chunk to the detector.
#[derive(Debug, Clone, PartialEq)]
pub enum IssueEvent {
  Detected(AgentIssue),
  Cleared,
}

static AUTH_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
  [
    r"(?i)API Error:\s*401.*authentication_error",
    r"(?i)OAuth token has expired",
    r"(?i)Please run /login",
    r"(?i)authentication_error.*OAuth token",
    r"(?i)invalid.*token",
    r"(?i)token.*expired",
  ]
  .iter()
  .map(|p| Regex::new(p).expect("valid auth pattern"))
  .collect()
});

static RATE_LIMIT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
  [
    r"(?i)You've hit your limit",
    r"(?i)rate limit",
    r"(?i)too many requests",
    r"(?i)API Error:\s*429",
  ]
  .iter()
  .map(|p| Regex::new(p).expect("valid rate limit pattern"))
  .collect()
});

/// `resets 4am (Europe/Lisbon)`, `reset 16:30`, ...
static RESET_PATTERN: Lazy<Regex> = Lazy::new(|| {
  Regex::new(r"(?i)resets?\s+(\d+(?::\d+)?(?:\s*(?:am|pm))?)\s*(?:\(([^)]+)\))?")
    .expect("valid reset pattern")
});

static ANSI_PATTERN: Lazy<Regex> = Lazy::new(|| {
  Regex::new(r"\x1b\[[0-9;?]*[a-zA-Z]|\x1b\][^\x07]*\x07").expect("valid ansi pattern")
});

/// Remove ANSI escape sequences and surrounding whitespace.
pub fn strip_ansi(s: &str) -> String {
  ANSI_PATTERN.replace_all(s, "").trim().to_string()
}

pub fn detect_auth_error(line: &str) -> bool {
  AUTH_PATTERNS.iter().any(|p| p.is_match(line))
}

/// Returns whether the line is a rate limit, and the parsed reset instant if
/// the line carried one.
pub fn detect_rate_limit(line: &str) -> (bool, Option<DateTime<Utc>>) {
  if !RATE_LIMIT_PATTERNS.iter().any(|p| p.is_match(line)) {
    return (false, None);
  }
  let reset = RESET_PATTERN.captures(line).and_then(|caps| {
    let time_str = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
    let tz_str = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
    parse_reset_time(time_str, tz_str, Utc::now())
  });
  (true, reset)
}

/// Check one clean line for any known issue. Auth wins over rate limit when a
/// line matches both.
pub fn detect_issue(line: &str) -> Option<AgentIssue> {
  if detect_auth_error(line) {
    return Some(AgentIssue {
      kind: IssueKind::AuthRequired,
      detected_at: Utc::now(),
      message: line.to_string(),
      reset_at: None,
    });
  }
  let (limited, reset_at) = detect_rate_limit(line);
  if limited {
    return Some(AgentIssue {
      kind: IssueKind::RateLimited,
      detected_at: Utc::now(),
      message: line.to_string(),
      reset_at,
    });
  }
  None
}

/// Fixed offsets for the timezone hints the agent emits. Standard-time and
/// daylight-time abbreviations name different offsets, so each gets its own
/// arm. Unknown hints fall back to the daemon's local offset.
fn offset_for_hint(hint: &str) -> Option<FixedOffset> {
  let secs = match hint.to_ascii_lowercase().as_str() {
    "utc" | "gmt" => 0,
    "europe/lisbon" | "lisbon" => 3600,
    "pt" | "pst" => -8 * 3600,
    "pdt" => -7 * 3600,
    "est" => -5 * 3600,
    "edt" => -4 * 3600,
    _ => return None,
  };
  FixedOffset::east_opt(secs)
}

/// Parse a wall-clock reset time like `4am`, `4:30 PM`, `16:30`, or a bare
/// hour, relative to `now`. A parsed instant in the past shifts forward one
/// day. Returns `None` when nothing parses.
pub fn parse_reset_time(time_str: &str, tz_hint: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
  let time_str = time_str.trim().to_ascii_lowercase();
  if time_str.is_empty() {
    return None;
  }

  let offset = offset_for_hint(tz_hint.trim()).unwrap_or_else(|| *Local::now().offset());
  let local_now = now.with_timezone(&offset);

  let time = parse_wall_clock(&time_str)?;
  let mut candidate = offset
    .from_local_datetime(&local_now.date_naive().and_time(time))
    .single()?;
  if candidate < local_now {
    candidate = candidate + Duration::days(1);
  }
  Some(candidate.with_timezone(&Utc))
}

fn parse_wall_clock(s: &str) -> Option<NaiveTime> {
  const FORMATS: &[&str] = &["%l%P", "%l:%M%P", "%l %P", "%l:%M %P", "%H:%M"];
  for fmt in FORMATS {
    if let Ok(t) = NaiveTime::parse_from_str(s, fmt) {
      return Some(t);
    }
  }
  // Bare hour like "4" or "16".
  if let Ok(h) = s.parse::<u32>()
    && h <= 23
  {
    return NaiveTime::from_hms_opt(h, 0, 0);
  }
  None
}

/// Stateful line scanner: buffers partial lines across chunks, detects issues
/// in complete lines, and auto-clears an active issue after
/// [`CLEAN_BATCHES_TO_CLEAR`] consecutive clean non-empty batches.
#[derive(Debug, Default)]
pub struct IssueDetector {
  partial: String,
  clean_batches: u32,
  current: Option<AgentIssue>,
}

impl IssueDetector {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn current(&self) -> Option<&AgentIssue> {
    self.current.as_ref()
  }

  /// Explicit clear (the Resume action). Returns whether an issue was active.
  pub fn clear(&mut self) -> bool {
    self.clean_batches = 0;
    self.current.take().is_some()
  }

  /// Feed a chunk of raw output. At most one state change is reported per
  /// chunk, and issue publication follows complete-line extraction order.
  pub fn feed(&mut self, data: &[u8]) -> Option<IssueEvent> {
    self.partial.push_str(&String::from_utf8_lossy(data));

    let mut lines: Vec<String> = self.partial.split('\n').map(str::to_string).collect();
    // The final element is the still-incomplete tail.
    self.partial = lines.pop().unwrap_or_default();

    let mut saw_non_empty = false;
    for line in &lines {
      let clean = strip_ansi(line);
      if clean.is_empty() {
        continue;
      }
      saw_non_empty = true;
      if let Some(issue) = detect_issue(&clean) {
        self.clean_batches = 0;
        self.current = Some(issue.clone());
        return Some(IssueEvent::Detected(issue));
      }
    }

    // The agent is producing ordinary output again: clear a stale banner.
    if saw_non_empty && self.current.is_some() {
      self.clean_batches += 1;
      if self.clean_batches >= CLEAN_BATCHES_TO_CLEAR {
        self.clean_batches = 0;
        self.current = None;
        return Some(IssueEvent::Cleared);
      }
    }
    None
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn auth_patterns_match_known_failures() {
    let cases = [
      (
        r#"API Error: 401 {"type":"error","error":{"type":"authentication_error","message":"OAuth token has expired"}}"#,
        true,
      ),
      ("Your OAuth token has expired. Please run /login to re-authenticate.", true),
      ("Authentication required. Please run /login", true),
      ("Error: invalid token provided", true),
      ("Your token has expired", true),
      ("Building project...", false),
      ("", false),
    ];
    for (line, expected) in cases {
      assert_eq!(detect_auth_error(line), expected, "line: {line}");
    }
  }

  #[test]
  fn rate_limit_patterns_and_reset_extraction() {
    let (detected, reset) = detect_rate_limit("You've hit your limit · resets 4am (Europe/Lisbon)");
    assert!(detected);
    assert!(reset.is_some());

    let (detected, reset) = detect_rate_limit("You've hit your limit, please wait");
    assert!(detected);
    assert!(reset.is_none());

    assert!(detect_rate_limit("Error: too many requests").0);
    assert!(detect_rate_limit("API Error: 429 Rate limit exceeded").0);
    assert!(!detect_rate_limit("Compiling foreman-core v0.2.0").0);
  }

  #[test]
  fn auth_wins_when_both_families_match() {
    let issue = detect_issue("API Error: 401 authentication_error after rate limit").expect("issue");
    assert_eq!(issue.kind, IssueKind::AuthRequired);
  }

  #[test]
  fn detect_issue_kinds() {
    assert_eq!(
      detect_issue("API Error: 401 authentication_error").map(|i| i.kind),
      Some(IssueKind::AuthRequired),
    );
    assert_eq!(
      detect_issue("You've hit your limit · resets 4am").map(|i| i.kind),
      Some(IssueKind::RateLimited),
    );
    assert!(detect_issue("Everything is fine").is_none());
  }

  #[test]
  fn reset_time_formats_parse_and_land_in_future() {
    let now = Utc.with_ymd_and_hms(2026, 8, 2, 12, 0, 0).unwrap();
    for (s, tz) in [
      ("4am", "Europe/Lisbon"),
      ("4pm", ""),
      ("12:30pm", ""),
      ("14:00", ""),
      ("4", "UTC"),
    ] {
      let parsed = parse_reset_time(s, tz, now).unwrap_or_else(|| panic!("{s} should parse"));
      assert!(parsed > now, "{s} ({tz}) should be in the future, got {parsed}");
      assert!(parsed - now <= Duration::days(1), "{s} shifted too far");
    }
    assert!(parse_reset_time("invalid", "", now).is_none());
    assert!(parse_reset_time("", "", now).is_none());
    assert!(parse_reset_time("99", "", now).is_none());
  }

  #[test]
  fn standard_and_daylight_abbreviations_use_distinct_offsets() {
    let now = Utc.with_ymd_and_hms(2026, 1, 15, 0, 0, 0).unwrap();
    // 4am PST is UTC-8 -> 12:00 UTC; 4am PDT is UTC-7 -> 11:00 UTC.
    let pst = parse_reset_time("4am", "PST", now).expect("pst");
    let pdt = parse_reset_time("4am", "PDT", now).expect("pdt");
    assert_eq!(pst, Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap());
    assert_eq!(pdt, Utc.with_ymd_and_hms(2026, 1, 15, 11, 0, 0).unwrap());
    assert_eq!(pst - pdt, Duration::hours(1));

    // 4am EST is UTC-5 -> 9:00 UTC; 4am EDT is UTC-4 -> 8:00 UTC.
    let est = parse_reset_time("4am", "EST", now).expect("est");
    let edt = parse_reset_time("4am", "EDT", now).expect("edt");
    assert_eq!(est, Utc.with_ymd_and_hms(2026, 1, 15, 9, 0, 0).unwrap());
    assert_eq!(edt, Utc.with_ymd_and_hms(2026, 1, 15, 8, 0, 0).unwrap());
    assert_eq!(est - edt, Duration::hours(1));
  }

  #[test]
  fn past_instant_shifts_forward_one_day() {
    // 4am UTC is already past a 12:00 UTC "now", so it must mean tomorrow.
    let now = Utc.with_ymd_and_hms(2026, 8, 2, 12, 0, 0).unwrap();
    let parsed = parse_reset_time("4am", "UTC", now).expect("parse");
    assert_eq!(parsed, Utc.with_ymd_and_hms(2026, 8, 3, 4, 0, 0).unwrap());

    // 14:00 UTC is still ahead: same day.
    let parsed = parse_reset_time("14:00", "UTC", now).expect("parse");
    assert_eq!(parsed, Utc.with_ymd_and_hms(2026, 8, 2, 14, 0, 0).unwrap());
  }

  #[test]
  fn detector_buffers_partial_lines_across_chunks() {
    let mut det = IssueDetector::new();
    assert_eq!(det.feed(b"API Error: 401 authen"), None, "incomplete line");
    let event = det.feed(b"tication_error\n").expect("event");
    match event {
      IssueEvent::Detected(issue) => assert_eq!(issue.kind, IssueKind::AuthRequired),
      other => panic!("unexpected event: {other:?}"),
    }
    assert!(det.current().is_some());
  }

  #[test]
  fn detector_strips_ansi_before_matching() {
    let mut det = IssueDetector::new();
    let event = det.feed(b"\x1b[31mAPI Error: 429\x1b[0m\n").expect("event");
    assert!(matches!(event, IssueEvent::Detected(i) if i.kind == IssueKind::RateLimited));
  }

  #[test]
  fn detector_auto_clears_after_three_clean_batches() {
    let mut det = IssueDetector::new();
    det.feed(b"rate limit reached\n").expect("detected");

    assert_eq!(det.feed(b"compiling...\n"), None);
    assert_eq!(det.feed(b"\n\n"), None, "empty batches do not count");
    assert_eq!(det.feed(b"linking...\n"), None);
    let event = det.feed(b"done\n").expect("third clean batch clears");
    assert_eq!(event, IssueEvent::Cleared);
    assert!(det.current().is_none());
  }

  #[test]
  fn new_issue_resets_clean_counter() {
    let mut det = IssueDetector::new();
    det.feed(b"rate limit reached\n").expect("detected");
    assert_eq!(det.feed(b"ok\n"), None);
    assert_eq!(det.feed(b"ok\n"), None);
    // A repeat match restarts the clear countdown.
    assert!(matches!(det.feed(b"rate limit reached\n"), Some(IssueEvent::Detected(_))));
    assert_eq!(det.feed(b"ok\n"), None);
    assert_eq!(det.feed(b"ok\n"), None);
    assert!(matches!(det.feed(b"ok\n"), Some(IssueEvent::Cleared)));
  }

  #[test]
  fn explicit_clear_reports_whether_issue_was_active() {
    let mut det = IssueDetector::new();
    assert!(!det.clear());
    det.feed(b"too many requests\n").expect("detected");
    assert!(det.clear());
    assert!(det.current().is_none());
  }
}
