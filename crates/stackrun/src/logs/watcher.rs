use super::tailer::{LogTailer, TailState};
use super::LOG_SENTINEL;
use parking_lot::Mutex;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Process-wide filesystem poller feeding every in-process tail reader.
///
/// One background task polls the watched files for growth; readers
/// subscribe and unsubscribe individually under the registry lock. Ticks
/// never block on a reader: appended bytes are pushed into each reader's
/// buffer and its waker fired.
pub struct LogWatcher {
  watches: Arc<Mutex<Vec<Weak<Mutex<TailState>>>>>,
  handle: tokio::task::JoinHandle<()>,
}

impl LogWatcher {
  /// Spawns the poll loop. Must be called from within a tokio runtime.
  pub fn spawn() -> Arc<Self> {
    let watches: Arc<Mutex<Vec<Weak<Mutex<TailState>>>>> = Arc::new(Mutex::new(Vec::new()));

    let registry = watches.clone();
    let handle = tokio::spawn(async move {
      let mut interval = tokio::time::interval(POLL_INTERVAL);
      loop {
        interval.tick().await;
        tick(&registry);
      }
    });

    Arc::new(LogWatcher { watches, handle })
  }

  pub fn watch(
    &self,
    path: PathBuf,
    appearance_timeout: Duration,
    inactivity_timeout: Duration,
  ) -> LogTailer {
    let state = Arc::new(Mutex::new(TailState::new(
      path,
      appearance_timeout,
      inactivity_timeout,
    )));

    let mut watches = self.watches.lock();
    watches.push(Arc::downgrade(&state));

    LogTailer::new(state)
  }
}

impl Drop for LogWatcher {
  fn drop(&mut self) {
    self.handle.abort();
  }
}

fn tick(registry: &Mutex<Vec<Weak<Mutex<TailState>>>>) {
  let watches: Vec<Arc<Mutex<TailState>>> = {
    let mut watches = registry.lock();
    watches.retain(|weak| weak.strong_count() > 0);
    watches.iter().filter_map(Weak::upgrade).collect()
  };

  for watch in watches {
    poll_watch(&watch);
  }
}

fn poll_watch(watch: &Mutex<TailState>) {
  let (path, offset, done) = {
    let state = watch.lock();
    (state.path.clone(), state.offset, state.done())
  };

  if done {
    // still wake so a pending reader can observe the end of stream
    watch.lock().wake();
    return;
  }

  let mut appended = String::new();
  let new_offset = match read_appended(&path, offset, &mut appended) {
    Ok(Some(new_offset)) => Some(new_offset),
    Ok(None) => None,
    Err(err) => {
      log::warn!("Log poll failed for {}: {}", path.display(), err);
      None
    }
  };

  let mut state = watch.lock();

  if let Some(new_offset) = new_offset {
    if !state.appeared {
      state.appeared = true;
      state.last_activity = Instant::now();
    }
    if new_offset > state.offset {
      state.offset = new_offset;
      state.last_activity = Instant::now();
      push_lines(&mut state, &appended);
    }
  }

  // wake unconditionally so pending readers re-evaluate their deadlines
  state.wake();
}

fn read_appended(path: &PathBuf, offset: u64, into: &mut String) -> std::io::Result<Option<u64>> {
  let mut file = match std::fs::File::open(path) {
    Ok(file) => file,
    Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
    Err(err) => return Err(err),
  };

  let len = file.metadata()?.len();
  if len <= offset {
    return Ok(Some(offset));
  }

  file.seek(SeekFrom::Start(offset))?;
  file.take(len - offset).read_to_string(into)?;

  Ok(Some(len))
}

fn push_lines(state: &mut TailState, appended: &str) {
  state.partial.push_str(appended);

  while let Some(newline) = state.partial.find('\n') {
    let line: String = state.partial.drain(..=newline).collect();
    let line = line.trim_end_matches('\n');

    if line == LOG_SENTINEL {
      state.sentinel_seen = true;
      state.partial.clear();
      return;
    }

    state.lines.push_back(line.to_string());
  }
}
