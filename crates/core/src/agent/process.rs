//! One agent child process attached to a pseudo-terminal.
//!
//! A dedicated reader thread pumps PTY output through the issue detector, the
//! terminal emulator, the subscriber tables, and the scrollback buffer. All
//! subscriber sends are non-blocking: a slow client drops frames instead of
//! stalling the pump.

use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use portable_pty::{CommandBuilder, ExitStatus, PtySize, native_pty_system};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::issue::{AgentIssue, IssueDetector, IssueEvent};
use super::screen::{ScreenUpdate, snapshot};

const READ_CHUNK_BYTES: usize = 32 * 1024;
/// Per-subscriber channel depths. Raw output is chattiest, issues rarest.
pub const RAW_CHANNEL_DEPTH: usize = 256;
pub const SCREEN_CHANNEL_DEPTH: usize = 64;
pub const ISSUE_CHANNEL_DEPTH: usize = 16;
/// Scrollback cap; the oldest lines fall off first.
pub const SCROLLBACK_MAX_LINES: usize = 20_000;
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Inputs for spawning one agent process.
#[derive(Debug, Clone)]
pub struct ProcessOptions {
  pub project_id: String,
  pub program: String,
  pub args: Vec<String>,
  pub env: Vec<(String, String)>,
  pub cwd: PathBuf,
  pub rows: u16,
  pub cols: u16,
  /// Sandbox profile temp file to delete on cleanup.
  pub sandbox_profile: Option<PathBuf>,
}

#[derive(Default)]
struct Subscribers {
  raw: HashMap<Uuid, mpsc::Sender<Vec<u8>>>,
  screen: HashMap<Uuid, mpsc::Sender<ScreenUpdate>>,
  issue: HashMap<Uuid, mpsc::Sender<Option<AgentIssue>>>,
}

#[derive(Default)]
struct Scrollback {
  lines: Vec<String>,
  partial: String,
}

impl Scrollback {
  fn push_chunk(&mut self, data: &[u8]) {
    self.partial.push_str(&String::from_utf8_lossy(data));
    while let Some(pos) = self.partial.find('\n') {
      let mut line: String = self.partial.drain(..=pos).collect();
      line.pop();
      if line.ends_with('\r') {
        line.pop();
      }
      if !line.is_empty() {
        self.lines.push(line);
      }
    }
    if self.lines.len() > SCROLLBACK_MAX_LINES {
      let excess = self.lines.len() - SCROLLBACK_MAX_LINES;
      self.lines.drain(..excess);
    }
  }

  fn flush_partial(&mut self) {
    if !self.partial.is_empty() {
      let line = std::mem::take(&mut self.partial);
      self.lines.push(line);
    }
  }
}

/// A child process in a PTY with an emulated screen and fan-out buses.
pub struct AgentProcess {
  project_id: String,
  pid: u32,
  started_at: DateTime<Utc>,
  dims: Mutex<(u16, u16)>,
  master: Mutex<Option<Box<dyn portable_pty::MasterPty + Send>>>,
  writer: Mutex<Option<Box<dyn Write + Send>>>,
  parser: Mutex<vt100::Parser>,
  scrollback: Mutex<Scrollback>,
  subs: RwLock<Subscribers>,
  detector: Mutex<IssueDetector>,
  exit: Mutex<Option<ExitStatus>>,
  done_tx: watch::Sender<bool>,
  done_rx: watch::Receiver<bool>,
  sandbox_profile: Mutex<Option<PathBuf>>,
}

impl AgentProcess {
  /// Spawn the child in a fresh PTY and start the read pump.
  pub fn spawn(opts: ProcessOptions) -> Result<Arc<Self>> {
    let rows = if opts.rows == 0 { 24 } else { opts.rows };
    let cols = if opts.cols == 0 { 80 } else { opts.cols };

    let pty_system = native_pty_system();
    let pair = pty_system
      .openpty(PtySize { rows, cols, pixel_width: 0, pixel_height: 0 })
      .with_context(|| format!("failed to allocate PTY for project {}", opts.project_id))?;

    let mut cmd = CommandBuilder::new(&opts.program);
    cmd.cwd(&opts.cwd);
    for arg in &opts.args {
      cmd.arg(arg);
    }
    for (key, value) in &opts.env {
      cmd.env(key, value);
    }

    let child = pair
      .slave
      .spawn_command(cmd)
      .with_context(|| format!("failed to spawn '{}' in {}", opts.program, opts.cwd.display()))?;
    drop(pair.slave);

    let pid = child.process_id().unwrap_or(0);
    let reader = pair
      .master
      .try_clone_reader()
      .context("failed to clone PTY reader")?;
    let writer = pair.master.take_writer().context("failed to take PTY writer")?;

    let (done_tx, done_rx) = watch::channel(false);
    let process = Arc::new(Self {
      project_id: opts.project_id.clone(),
      pid,
      started_at: Utc::now(),
      dims: Mutex::new((rows, cols)),
      master: Mutex::new(Some(pair.master)),
      writer: Mutex::new(Some(writer)),
      parser: Mutex::new(vt100::Parser::new(rows, cols, 0)),
      scrollback: Mutex::new(Scrollback::default()),
      subs: RwLock::new(Subscribers::default()),
      detector: Mutex::new(IssueDetector::new()),
      exit: Mutex::new(None),
      done_tx,
      done_rx,
      sandbox_profile: Mutex::new(opts.sandbox_profile),
    });

    info!(
      event = "agent_process_spawned",
      project_id = %opts.project_id,
      pid,
      program = %opts.program,
      rows,
      cols,
      cwd = %opts.cwd.display(),
      "agent process started"
    );

    let pump = Arc::clone(&process);
    thread::Builder::new()
      .name(format!("pty-pump-{}", opts.project_id))
      .spawn(move || pump.read_pump(reader, child))
      .context("failed to start PTY read pump")?;

    Ok(process)
  }

  fn read_pump(
    self: Arc<Self>,
    mut reader: Box<dyn Read + Send>,
    mut child: Box<dyn portable_pty::Child + Send + Sync>,
  ) {
    let mut buf = vec![0u8; READ_CHUNK_BYTES];
    loop {
      match reader.read(&mut buf) {
        Ok(0) => break,
        Ok(n) => self.dispatch_chunk(&buf[..n]),
        Err(err) => {
          debug!(event = "pty_read_error", project_id = %self.project_id, error = %err);
          break;
        }
      }
    }

    self.scrollback.lock().flush_partial();

    let status = child.wait();
    match &status {
      Ok(s) => {
        info!(event = "agent_process_exited", project_id = %self.project_id, success = s.success());
      }
      Err(err) => {
        warn!(event = "agent_process_wait_failed", project_id = %self.project_id, error = %err);
      }
    }
    *self.exit.lock() = status.ok();
    let _ = self.done_tx.send(true);
  }

  fn dispatch_chunk(&self, data: &[u8]) {
    // Issue detection first so a blocked agent stays visible even when every
    // screen subscriber is saturated.
    let event = self.detector.lock().feed(data);
    match event {
      Some(IssueEvent::Detected(issue)) => {
        info!(
          event = "agent_issue_detected",
          project_id = %self.project_id,
          kind = ?issue.kind,
          message = %issue.message,
          "issue detected in agent output"
        );
        self.broadcast_issue(Some(issue));
      }
      Some(IssueEvent::Cleared) => {
        info!(event = "agent_issue_autocleared", project_id = %self.project_id, "agent resumed; issue cleared");
        self.broadcast_issue(None);
      }
      None => {}
    }

    {
      let subs = self.subs.read();
      for tx in subs.raw.values() {
        // Full channel: drop for that subscriber, favoring liveness.
        let _ = tx.try_send(data.to_vec());
      }
    }

    let update = {
      let mut parser = self.parser.lock();
      parser.process(data);
      snapshot(&self.project_id, &parser)
    };
    {
      let subs = self.subs.read();
      for tx in subs.screen.values() {
        let _ = tx.try_send(update.clone());
      }
    }

    self.scrollback.lock().push_chunk(data);
  }

  fn broadcast_issue(&self, issue: Option<AgentIssue>) {
    let subs = self.subs.read();
    for tx in subs.issue.values() {
      let _ = tx.try_send(issue.clone());
    }
  }

  /// Write raw bytes (user input) to the PTY.
  pub fn send_input(&self, data: &[u8]) -> Result<()> {
    let mut writer = self.writer.lock();
    let writer = writer.as_mut().context("process is closed")?;
    writer.write_all(data).context("failed to write to PTY")?;
    writer.flush().context("failed to flush PTY")?;
    Ok(())
  }

  /// Resize the PTY and the emulator.
  pub fn resize(&self, rows: u16, cols: u16) -> Result<()> {
    let rows = if rows == 0 { 24 } else { rows };
    let cols = if cols == 0 { 80 } else { cols };
    {
      let master = self.master.lock();
      let master = master.as_ref().context("process is closed")?;
      master
        .resize(PtySize { rows, cols, pixel_width: 0, pixel_height: 0 })
        .context("failed to resize PTY")?;
    }
    self.parser.lock().set_size(rows, cols);
    *self.dims.lock() = (rows, cols);
    debug!(event = "agent_process_resized", project_id = %self.project_id, rows, cols);
    Ok(())
  }

  /// Consistent rendering of the current grid, used to prime late joiners.
  pub fn snapshot_screen(&self) -> ScreenUpdate {
    let parser = self.parser.lock();
    snapshot(&self.project_id, &parser)
  }

  pub fn subscribe_raw(&self) -> (Uuid, mpsc::Receiver<Vec<u8>>) {
    let (tx, rx) = mpsc::channel(RAW_CHANNEL_DEPTH);
    let id = Uuid::new_v4();
    self.subs.write().raw.insert(id, tx);
    (id, rx)
  }

  pub fn unsubscribe_raw(&self, id: Uuid) {
    self.subs.write().raw.remove(&id);
  }

  pub fn subscribe_screen(&self) -> (Uuid, mpsc::Receiver<ScreenUpdate>) {
    let (tx, rx) = mpsc::channel(SCREEN_CHANNEL_DEPTH);
    let id = Uuid::new_v4();
    self.subs.write().screen.insert(id, tx);
    (id, rx)
  }

  pub fn unsubscribe_screen(&self, id: Uuid) {
    self.subs.write().screen.remove(&id);
  }

  /// Subscribe to issue transitions. The first message is the current issue,
  /// or `None` when there is none.
  pub fn subscribe_issues(&self) -> (Uuid, mpsc::Receiver<Option<AgentIssue>>) {
    let (tx, rx) = mpsc::channel(ISSUE_CHANNEL_DEPTH);
    let id = Uuid::new_v4();
    let current = self.current_issue();
    let _ = tx.try_send(current);
    self.subs.write().issue.insert(id, tx);
    (id, rx)
  }

  pub fn unsubscribe_issues(&self, id: Uuid) {
    self.subs.write().issue.remove(&id);
  }

  pub fn current_issue(&self) -> Option<AgentIssue> {
    self.detector.lock().current().cloned()
  }

  /// Explicitly clear the active issue (the Resume action).
  pub fn clear_issue(&self) {
    if self.detector.lock().clear() {
      info!(event = "agent_issue_cleared", project_id = %self.project_id, "issue cleared by resume");
      self.broadcast_issue(None);
    }
  }

  /// A page of scrollback plus the total line count.
  pub fn scrollback(&self, offset: usize, limit: usize) -> (Vec<String>, usize) {
    let sb = self.scrollback.lock();
    let total = sb.lines.len();
    if offset >= total {
      return (Vec::new(), total);
    }
    let end = offset.saturating_add(limit).min(total);
    (sb.lines[offset..end].to_vec(), total)
  }

  pub fn full_scrollback(&self) -> Vec<String> {
    self.scrollback.lock().lines.clone()
  }

  pub fn is_running(&self) -> bool {
    !*self.done_rx.borrow()
  }

  /// A watch receiver that flips to `true` when the child exits.
  pub fn done(&self) -> watch::Receiver<bool> {
    self.done_rx.clone()
  }

  /// Exit outcome: `None` while running or when wait failed, otherwise
  /// whether the child exited cleanly.
  pub fn exit_success(&self) -> Option<bool> {
    self.exit.lock().as_ref().map(ExitStatus::success)
  }

  pub fn started_at(&self) -> DateTime<Utc> {
    self.started_at
  }

  pub fn terminal_size(&self) -> (u16, u16) {
    *self.dims.lock()
  }

  pub fn project_id(&self) -> &str {
    &self.project_id
  }

  /// Cooperative stop: SIGTERM, a 5 second grace period, then SIGKILL.
  /// Blocks until the child is gone, then releases resources.
  pub async fn stop(&self) {
    if self.is_running() && self.pid != 0 {
      info!(event = "agent_process_stopping", project_id = %self.project_id, pid = self.pid);
      unsafe {
        libc::kill(self.pid as libc::pid_t, libc::SIGTERM);
      }
      let mut rx = self.done_rx.clone();
      let graceful = tokio::time::timeout(STOP_GRACE, rx.wait_for(|done| *done))
        .await
        .is_err();
      if graceful {
        warn!(event = "agent_process_killing", project_id = %self.project_id, pid = self.pid, "grace period expired");
        unsafe {
          libc::kill(self.pid as libc::pid_t, libc::SIGKILL);
        }
        let _ = rx.wait_for(|done| *done).await;
      }
    } else if self.is_running() {
      // No PID to signal; closing the master below forces EOF on the pump.
      let mut rx = self.done_rx.clone();
      self.cleanup();
      let _ = tokio::time::timeout(STOP_GRACE, rx.wait_for(|done| *done)).await;
    }
    self.cleanup();
  }

  /// Release the PTY and the sandbox profile. Safe to call repeatedly.
  pub fn cleanup(&self) {
    if let Some(master) = self.master.lock().take() {
      drop(master);
    }
    if let Some(writer) = self.writer.lock().take() {
      drop(writer);
    }
    if let Some(profile) = self.sandbox_profile.lock().take() {
      if let Err(err) = fs::remove_file(&profile) {
        debug!(event = "sandbox_profile_remove_failed", path = %profile.display(), error = %err);
      }
    }
  }
}

#[cfg(all(test, unix))]
mod tests {
  use super::*;

  fn spawn_cat() -> Arc<AgentProcess> {
    AgentProcess::spawn(ProcessOptions {
      project_id: "test-project".into(),
      program: "cat".into(),
      args: vec![],
      env: vec![("TERM".into(), "xterm-256color".into())],
      cwd: std::env::temp_dir(),
      rows: 10,
      cols: 40,
      sandbox_profile: None,
    })
    .expect("spawn cat")
  }

  async fn recv_until(rx: &mut mpsc::Receiver<Vec<u8>>, needle: &str) -> String {
    let mut collected = String::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !collected.contains(needle) {
      let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
      let chunk = tokio::time::timeout(remaining, rx.recv())
        .await
        .expect("timed out waiting for output")
        .expect("stream ended early");
      collected.push_str(&String::from_utf8_lossy(&chunk));
    }
    collected
  }

  #[tokio::test]
  async fn raw_subscribers_see_output_in_order() {
    let proc = spawn_cat();
    let (id, mut rx) = proc.subscribe_raw();
    proc.send_input(b"hello pty\n").expect("input");
    let seen = recv_until(&mut rx, "hello pty").await;
    assert!(seen.contains("hello pty"));
    proc.unsubscribe_raw(id);
    proc.stop().await;
  }

  #[tokio::test]
  async fn screen_snapshot_primes_late_joiners() {
    let proc = spawn_cat();
    let (_id, mut raw) = proc.subscribe_raw();
    proc.send_input(b"banner\n").expect("input");
    recv_until(&mut raw, "banner").await;

    // A client subscribing now still sees the current grid via snapshot.
    let snap = proc.snapshot_screen();
    assert!(snap.lines.iter().any(|l| l.contains("banner")), "snapshot: {:?}", snap.lines);
    proc.stop().await;
  }

  #[tokio::test]
  async fn scrollback_accumulates_lines() {
    let proc = spawn_cat();
    let (_id, mut raw) = proc.subscribe_raw();
    proc.send_input(b"first\nsecond\n").expect("input");
    recv_until(&mut raw, "second").await;

    let (lines, total) = proc.scrollback(0, 100);
    assert!(total >= 2, "scrollback total: {total}");
    assert!(lines.iter().any(|l| l.contains("first")));
    let (page, total2) = proc.scrollback(total, 10);
    assert!(page.is_empty());
    assert_eq!(total, total2);
    proc.stop().await;
  }

  #[tokio::test]
  async fn stop_terminates_and_reports_done() {
    let proc = spawn_cat();
    assert!(proc.is_running());
    proc.stop().await;
    assert!(!proc.is_running());
    // Idempotent cleanup and repeated stop are fine.
    proc.stop().await;
    assert!(proc.send_input(b"late").is_err(), "input after close must fail");
  }

  #[tokio::test]
  async fn issue_subscription_leads_with_current_state() {
    let proc = spawn_cat();
    let (_id, mut rx) = proc.subscribe_issues();
    let first = tokio::time::timeout(Duration::from_secs(1), rx.recv())
      .await
      .expect("initial frame")
      .expect("open");
    assert!(first.is_none(), "no issue at start");
    proc.stop().await;
  }

  #[tokio::test]
  async fn resize_updates_dimensions() {
    let proc = spawn_cat();
    proc.resize(30, 100).expect("resize");
    assert_eq!(proc.terminal_size(), (30, 100));
    let snap = proc.snapshot_screen();
    assert_eq!((snap.rows, snap.cols), (30, 100));
    proc.stop().await;
  }

  #[test]
  fn scrollback_caps_and_carries_partials() {
    let mut sb = Scrollback::default();
    sb.push_chunk(b"one\ntwo\npart");
    assert_eq!(sb.lines, vec!["one".to_string(), "two".to_string()]);
    sb.push_chunk(b"ial\n");
    assert_eq!(sb.lines.last().unwrap(), "partial");
    sb.push_chunk(b"tail-no-newline");
    sb.flush_partial();
    assert_eq!(sb.lines.last().unwrap(), "tail-no-newline");

    let mut big = Scrollback::default();
    for i in 0..(SCROLLBACK_MAX_LINES + 50) {
      big.push_chunk(format!("line {i}\n").as_bytes());
    }
    assert_eq!(big.lines.len(), SCROLLBACK_MAX_LINES);
    assert!(big.lines[0].contains("line 50"));
  }
}
