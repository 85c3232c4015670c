use serde::{Deserialize, Serialize};

/// Shared status codomain for runs and jobs.
///
/// `Skipped` is only ever assigned to jobs whose dependencies were not
/// satisfied; runs never carry it.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
  New,
  Pending,
  InProgress,
  Succeeded,
  Failed,
  Cancelled,
  Skipped,
}

impl JobStatus {
  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled | JobStatus::Skipped
    )
  }

  pub fn is_running(&self) -> bool {
    matches!(
      self,
      JobStatus::New | JobStatus::Pending | JobStatus::InProgress
    )
  }

  /// Whether a transition from `self` to `next` is legal.
  pub fn can_transition_to(&self, next: JobStatus) -> bool {
    match self {
      JobStatus::New => matches!(
        next,
        JobStatus::Pending | JobStatus::Cancelled | JobStatus::Skipped
      ),
      JobStatus::Pending => matches!(
        next,
        JobStatus::InProgress | JobStatus::Cancelled | JobStatus::Skipped
      ),
      JobStatus::InProgress => next.is_terminal(),
      _ => false,
    }
  }
}

impl std::fmt::Display for JobStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
    let s = match self {
      JobStatus::New => "NEW",
      JobStatus::Pending => "PENDING",
      JobStatus::InProgress => "IN_PROGRESS",
      JobStatus::Succeeded => "SUCCEEDED",
      JobStatus::Failed => "FAILED",
      JobStatus::Cancelled => "CANCELED",
      JobStatus::Skipped => "SKIPPED",
    };
    write!(f, "{}", s)
  }
}
