use std::env;
use std::path::PathBuf;

/// What to do with job working directories on exit.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum KeepTmp {
  #[default]
  Discard,
  Keep,
  /// Move into this directory instead of deleting.
  KeepAt(PathBuf),
}

impl KeepTmp {
  pub fn from_env_value(value: Option<String>) -> Self {
    match value.as_deref() {
      None | Some("") | Some("false") => KeepTmp::Discard,
      Some("true") => KeepTmp::Keep,
      Some(path) => KeepTmp::KeepAt(PathBuf::from(path)),
    }
  }
}

/// Process-wide configuration, read from the environment once at startup.
#[derive(Debug, Clone)]
pub struct Config {
  /// Root directory for per-job logs (`DEPLOY_LOG_DIR`).
  pub log_dir: PathBuf,
  /// File-store root (`STACKRUN_STORE_DIR`); in-memory store when unset.
  pub store_dir: Option<PathBuf>,
  /// State backend for the IaC tool (`PULUMI_STATE_BUCKET_NAME`).
  pub state_bucket: Option<String>,
  /// `KEEP_TMP` - "true" or a path preserves job working directories.
  pub keep_tmp: KeepTmp,
  /// When set, deploy runs are scheduled on the external backend.
  pub deploy_state_machine_arn: Option<String>,
  /// When set, destroy runs are scheduled on the external backend.
  pub destroy_state_machine_arn: Option<String>,
  /// Worker pool size for concurrent task runners.
  pub workers: usize,
  /// HTTP listen port (`PORT`).
  pub port: u16,
}

impl Config {
  pub fn from_env() -> Self {
    let workers = env::var("STACKRUN_WORKERS")
      .ok()
      .and_then(|value| value.parse().ok())
      .unwrap_or_else(|| {
        std::thread::available_parallelism()
          .map(|n| n.get())
          .unwrap_or(4)
      });

    Config {
      log_dir: env::var("DEPLOY_LOG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("deployments")),
      store_dir: env::var("STACKRUN_STORE_DIR").ok().map(PathBuf::from),
      state_bucket: env::var("PULUMI_STATE_BUCKET_NAME").ok(),
      keep_tmp: KeepTmp::from_env_value(env::var("KEEP_TMP").ok()),
      deploy_state_machine_arn: env::var("DEPLOY_STEP_FUNCTION_ARN").ok(),
      destroy_state_machine_arn: env::var("DESTROY_STEP_FUNCTION_ARN").ok(),
      workers,
      port: env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(3000),
    }
  }
}

impl Default for Config {
  fn default() -> Self {
    Config {
      log_dir: PathBuf::from("deployments"),
      store_dir: None,
      state_bucket: None,
      keep_tmp: KeepTmp::Discard,
      deploy_state_machine_arn: None,
      destroy_state_machine_arn: None,
      workers: 4,
      port: 3000,
    }
  }
}
