mod tailer;
mod watcher;
mod writer;

pub use tailer::LogTailer;
pub use watcher::LogWatcher;
pub use writer::LogWriter;

use crate::{AppId, ProjectId, Result, RunKey};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Log file stem for one job. A run touches each app at most once, so the
/// app id alone is unique within the run's log directory.
pub fn job_log_name(app_id: &AppId) -> String {
  app_id.to_string()
}

/// Final line of every completed per-job log.
pub const LOG_SENTINEL: &str = "END";

/// How long a tail reader waits for the log file to appear.
pub const APPEARANCE_TIMEOUT: Duration = Duration::from_secs(120);

/// How long a tail reader tolerates silence before ending the stream.
pub const INACTIVITY_TIMEOUT: Duration = Duration::from_secs(600);

/// Per-job append-only log files on a shared filesystem, laid out as
/// `{root}/{project_id}/{run}/{job_log_name}.log` with a `latest` symlink
/// per project pointing at the most recent run's directory.
#[derive(Clone)]
pub struct LogStore {
  root: PathBuf,
  watcher: Arc<LogWatcher>,
}

impl LogStore {
  pub fn new(root: impl Into<PathBuf>, watcher: Arc<LogWatcher>) -> Self {
    LogStore {
      root: root.into(),
      watcher,
    }
  }

  pub fn log_path(&self, project_id: &ProjectId, run: &RunKey, job_log_name: &str) -> PathBuf {
    self
      .root
      .join(project_id.inner())
      .join(run.log_dir_name())
      .join(format!("{}.log", job_log_name))
  }

  /// Opens a writer for the job's log, creating the run directory and
  /// repointing the project's `latest` symlink.
  pub fn writer(
    &self,
    project_id: &ProjectId,
    run: &RunKey,
    job_log_name: &str,
  ) -> Result<LogWriter> {
    let run_dir = self
      .root
      .join(project_id.inner())
      .join(run.log_dir_name());
    std::fs::create_dir_all(&run_dir)?;
    let path = run_dir.join(format!("{}.log", job_log_name));

    #[cfg(unix)]
    {
      let latest = self.root.join(project_id.inner()).join("latest");
      if latest.symlink_metadata().is_ok() {
        std::fs::remove_file(&latest)?;
      }
      std::os::unix::fs::symlink(run_dir, &latest)?;
    }

    LogWriter::create(path)
  }

  /// Tails the job's log. The returned stream ends on the sentinel, on the
  /// appearance/inactivity timeouts, or when dropped by the consumer.
  pub fn tail(&self, project_id: &ProjectId, run: &RunKey, job_log_name: &str) -> LogTailer {
    let path = self.log_path(project_id, run, job_log_name);
    self
      .watcher
      .watch(path, APPEARANCE_TIMEOUT, INACTIVITY_TIMEOUT)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::WorkflowType;

  #[tokio::test]
  async fn test_log_path_is_named_after_the_app() {
    let store = LogStore::new("/var/deploy-logs", LogWatcher::spawn());
    let run = RunKey::new(ProjectId::new("p1"), WorkflowType::Deploy, None, 1);

    let path = store.log_path(
      &ProjectId::new("p1"),
      &run,
      &job_log_name(&AppId::new("web")),
    );
    assert_eq!(path, PathBuf::from("/var/deploy-logs/p1/DEPLOY##1/web.log"));
  }
}
