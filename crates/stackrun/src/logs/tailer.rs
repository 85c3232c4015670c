use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::task::{Poll, Waker};
use std::time::{Duration, Instant};
use tokio_stream::Stream;

pub(super) struct TailState {
  pub path: PathBuf,
  pub offset: u64,
  pub partial: String,
  pub lines: VecDeque<String>,
  pub appeared: bool,
  pub sentinel_seen: bool,
  pub last_activity: Instant,
  pub created: Instant,
  pub appearance_timeout: Duration,
  pub inactivity_timeout: Duration,
  pub waker: Option<Waker>,
}

impl TailState {
  pub fn new(path: PathBuf, appearance_timeout: Duration, inactivity_timeout: Duration) -> Self {
    let now = Instant::now();
    TailState {
      path,
      offset: 0,
      partial: String::new(),
      lines: VecDeque::new(),
      appeared: false,
      sentinel_seen: false,
      last_activity: now,
      created: now,
      appearance_timeout,
      inactivity_timeout,
      waker: None,
    }
  }

  pub fn wake(&mut self) {
    if let Some(waker) = self.waker.take() {
      waker.wake();
    }
  }

  /// Whether the poller can stop touching this watch.
  pub fn done(&self) -> bool {
    self.sentinel_seen || self.timed_out()
  }

  pub fn timed_out(&self) -> bool {
    if !self.appeared {
      self.created.elapsed() > self.appearance_timeout
    } else {
      self.last_activity.elapsed() > self.inactivity_timeout
    }
  }
}

/// Lazy finite sequence of log lines for one job.
///
/// Ends when the writer's sentinel is observed, when the file never appears
/// within the appearance timeout, or after the inactivity timeout. Dropping
/// the tailer unsubscribes it from the watcher.
pub struct LogTailer {
  state: Arc<Mutex<TailState>>,
}

impl LogTailer {
  pub(super) fn new(state: Arc<Mutex<TailState>>) -> Self {
    LogTailer { state }
  }
}

impl Stream for LogTailer {
  type Item = String;

  fn poll_next(
    self: std::pin::Pin<&mut Self>,
    cx: &mut std::task::Context<'_>,
  ) -> Poll<Option<Self::Item>> {
    let mut state = self.state.lock();

    if let Some(line) = state.lines.pop_front() {
      return Poll::Ready(Some(line));
    }

    if state.sentinel_seen || state.timed_out() {
      return Poll::Ready(None);
    }

    state.waker = Some(cx.waker().clone());
    Poll::Pending
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::logs::{LogWatcher, LogWriter};
  use tokio_stream::StreamExt;

  fn tail(
    watcher: &LogWatcher,
    path: PathBuf,
    appearance: Duration,
    inactivity: Duration,
  ) -> LogTailer {
    watcher.watch(path, appearance, inactivity)
  }

  #[tokio::test]
  async fn test_tail_reads_lines_until_sentinel() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("job.log");
    let watcher = LogWatcher::spawn();

    let writer = LogWriter::create(path.clone()).unwrap();
    writer.write_line("L1").unwrap();
    writer.write_line("L2").unwrap();

    // reader attaches mid-stream and still observes earlier lines
    let mut tailer = tail(
      &watcher,
      path.clone(),
      Duration::from_secs(5),
      Duration::from_secs(5),
    );

    writer.write_line("L3").unwrap();
    writer.finish();

    let mut lines = Vec::new();
    while let Some(line) = tailer.next().await {
      lines.push(line);
    }

    assert_eq!(lines, vec!["L1", "L2", "L3"]);
  }

  #[tokio::test]
  async fn test_tail_ends_when_file_never_appears() {
    let dir = tempfile::tempdir().unwrap();
    let watcher = LogWatcher::spawn();

    let mut tailer = tail(
      &watcher,
      dir.path().join("missing.log"),
      Duration::from_millis(300),
      Duration::from_secs(5),
    );

    assert_eq!(tailer.next().await, None);
  }

  #[tokio::test]
  async fn test_tail_ends_on_inactivity() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("job.log");
    let watcher = LogWatcher::spawn();

    let writer = LogWriter::create(path.clone()).unwrap();
    writer.write_line("only").unwrap();

    let mut tailer = tail(
      &watcher,
      path,
      Duration::from_secs(5),
      Duration::from_millis(500),
    );

    assert_eq!(tailer.next().await.as_deref(), Some("only"));
    // writer goes silent without a sentinel
    assert_eq!(tailer.next().await, None);
  }

  #[tokio::test]
  async fn test_multiple_readers_share_the_watcher() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("job.log");
    let watcher = LogWatcher::spawn();

    let mut a = tail(
      &watcher,
      path.clone(),
      Duration::from_secs(5),
      Duration::from_secs(5),
    );
    let mut b = tail(
      &watcher,
      path.clone(),
      Duration::from_secs(5),
      Duration::from_secs(5),
    );

    let writer = LogWriter::create(path).unwrap();
    writer.write_line("hello").unwrap();
    writer.finish();

    assert_eq!(a.next().await.as_deref(), Some("hello"));
    assert_eq!(a.next().await, None);
    assert_eq!(b.next().await.as_deref(), Some("hello"));
    assert_eq!(b.next().await, None);
  }
}
