use super::{WorkflowJob, WorkflowRun};
use crate::{Error, JobStatus, Result};

/// Reason recorded on jobs cancelled because their run ended before they ran.
pub const REASON_RUN_TERMINATED: &str = "run terminated early";

/// Marks the run `InProgress` and promotes every `New` job to `Pending`.
pub fn start_run(run: &mut WorkflowRun, jobs: &mut [WorkflowJob]) -> Result<()> {
  run.start();

  for job in jobs.iter_mut() {
    if job.status == JobStatus::New {
      job.transition(JobStatus::Pending, None)?;
    }
  }

  Ok(())
}

/// Cancels every job that has not started; `InProgress` jobs are cancelled
/// only when `cancel_in_progress` is set. When no `InProgress` jobs remain,
/// the run itself is reconciled to `Failed` if any job failed, otherwise to
/// `default_status`. Idempotent.
pub fn abort_run(
  run: &mut WorkflowRun,
  jobs: &mut [WorkflowJob],
  cancel_in_progress: bool,
  default_status: JobStatus,
) -> Result<()> {
  for job in jobs.iter_mut() {
    match job.status {
      JobStatus::New | JobStatus::Pending => {
        job.transition(
          JobStatus::Cancelled,
          Some(REASON_RUN_TERMINATED.to_string()),
        )?;
      }
      JobStatus::InProgress if cancel_in_progress => {
        job.transition(
          JobStatus::Cancelled,
          Some(REASON_RUN_TERMINATED.to_string()),
        )?;
      }
      _ => {}
    }
  }

  let in_progress = jobs
    .iter()
    .any(|job| job.status == JobStatus::InProgress);

  if !in_progress && !run.status.is_terminal() {
    let any_failed = jobs.iter().any(|job| job.status == JobStatus::Failed);
    let status = if any_failed {
      JobStatus::Failed
    } else {
      default_status
    };
    run.complete(status, Some(REASON_RUN_TERMINATED.to_string()));
  }

  Ok(())
}

/// Reconciles the run's terminal status from its jobs. All jobs must be
/// terminal.
pub fn complete_run(run: &mut WorkflowRun, jobs: &[WorkflowJob]) -> Result<()> {
  if let Some(job) = jobs.iter().find(|job| !job.status.is_terminal()) {
    return Err(Error::precondition(format!(
      "Cannot complete run {}: job {} is still {}",
      run.key, job.key, job.status
    )));
  }

  let status = reconciled_status(jobs.iter().map(|job| job.status));
  let reason = jobs
    .iter()
    .find(|job| job.status == status)
    .and_then(|job| job.status_reason.clone());

  run.complete(status, reason);

  Ok(())
}

/// The run's terminal status as a pure function of its jobs' terminal
/// statuses: any `Failed` wins, then any `Cancelled`, else `Succeeded`.
pub fn reconciled_status(statuses: impl IntoIterator<Item = JobStatus>) -> JobStatus {
  let mut any_cancelled = false;

  for status in statuses {
    match status {
      JobStatus::Failed => return JobStatus::Failed,
      JobStatus::Cancelled => any_cancelled = true,
      _ => {}
    }
  }

  if any_cancelled {
    JobStatus::Cancelled
  } else {
    JobStatus::Succeeded
  }
}
