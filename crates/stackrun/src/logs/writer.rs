use super::LOG_SENTINEL;
use crate::Result;
use parking_lot::Mutex;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

/// Single writer for one job's log file.
///
/// Every line is written through a fresh append-mode open so that size
/// changes are visible to pollers immediately, even on hosts that coalesce
/// filesystem notifications. The sentinel is emitted exactly once, on drop
/// if the owner did not finish explicitly.
pub struct LogWriter {
  path: PathBuf,
  ended: Mutex<bool>,
}

impl LogWriter {
  pub(crate) fn create(path: PathBuf) -> Result<Self> {
    // touch the file so tailers see it before the first line arrives
    OpenOptions::new().append(true).create(true).open(&path)?;

    Ok(LogWriter {
      path,
      ended: Mutex::new(false),
    })
  }

  pub fn path(&self) -> &PathBuf {
    &self.path
  }

  pub fn write_line(&self, line: &str) -> Result<()> {
    if *self.ended.lock() {
      return Ok(());
    }

    self.append(line)
  }

  /// Emits the sentinel. Safe to call more than once.
  pub fn finish(&self) {
    let mut ended = self.ended.lock();
    if *ended {
      return;
    }
    *ended = true;

    if let Err(err) = self.append(LOG_SENTINEL) {
      log::error!(
        "Failed to write log sentinel to {}: {}",
        self.path.display(),
        err
      );
    }
  }

  fn append(&self, line: &str) -> Result<()> {
    let mut file = OpenOptions::new().append(true).create(true).open(&self.path)?;
    writeln!(file, "{}", line.trim_end_matches('\n'))?;
    file.flush()?;

    Ok(())
  }
}

impl Drop for LogWriter {
  fn drop(&mut self) {
    self.finish();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_sentinel_written_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("job.log");

    {
      let writer = LogWriter::create(path.clone()).unwrap();
      writer.write_line("one").unwrap();
      writer.write_line("two\n").unwrap();
      writer.finish();
      writer.finish();
      // drop must not add a second sentinel
    }

    let contents = std::fs::read_to_string(&path).unwrap();
    assert_eq!(contents, "one\ntwo\nEND\n");
  }

  #[test]
  fn test_drop_emits_sentinel() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("job.log");

    {
      let writer = LogWriter::create(path.clone()).unwrap();
      writer.write_line("only").unwrap();
    }

    let contents = std::fs::read_to_string(&path).unwrap();
    assert_eq!(contents, "only\nEND\n");
  }

  #[test]
  fn test_writes_after_finish_are_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("job.log");

    let writer = LogWriter::create(path.clone()).unwrap();
    writer.finish();
    writer.write_line("late").unwrap();

    let contents = std::fs::read_to_string(&path).unwrap();
    assert_eq!(contents, "END\n");
  }
}
