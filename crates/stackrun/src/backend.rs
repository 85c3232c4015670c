use crate::workflow::{abort_run, complete_run};
use crate::{
  Database, Error, JobRunner, JobStatus, Result, RunDag, RunKey, StateMachineClient,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Drives a started run's jobs to terminal states.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
  async fn execute(&self, run: &RunKey) -> Result<()>;
}

/// Default backend: dispatches ready jobs in waves inside this process,
/// bounded by a shared worker pool.
pub struct InProcessBackend {
  db: Database,
  runner: Arc<dyn JobRunner>,
  pool: Arc<Semaphore>,
}

impl InProcessBackend {
  pub fn new(db: Database, runner: Arc<dyn JobRunner>, workers: usize) -> Self {
    InProcessBackend {
      db,
      runner,
      pool: Arc::new(Semaphore::new(workers.max(1))),
    }
  }
}

#[async_trait]
impl ExecutionBackend for InProcessBackend {
  async fn execute(&self, run_key: &RunKey) -> Result<()> {
    let jobs = self.db.jobs().list_for_run(run_key).await?;
    let dag = RunDag::from_jobs(&jobs)?;

    let mut statuses: HashMap<u32, JobStatus> = jobs
      .iter()
      .map(|job| (job.key.job_number, job.status))
      .collect();

    loop {
      let ready = dag.ready(|n| statuses[&n]);
      if ready.is_empty() {
        break;
      }

      // dependency-free jobs of a wave fan out concurrently; the semaphore
      // caps how many task runners execute at once in this process
      let mut handles = Vec::new();
      for job_number in ready {
        let runner = self.runner.clone();
        let pool = self.pool.clone();
        let key = run_key.job_key(job_number);

        handles.push(tokio::spawn(async move {
          let result = match pool.acquire_owned().await {
            Ok(_permit) => runner.run_job(&key).await,
            Err(err) => Err(Error::internal(format!("Worker pool closed: {}", err))),
          };
          (job_number, result)
        }));
      }

      for handle in handles {
        let (job_number, result) = handle
          .await
          .map_err(|err| Error::internal(format!("Job task panicked: {}", err)))?;

        let status = match result {
          Ok(status) => status,
          Err(err) => {
            log::error!("Job {}#{} failed to run: {}", run_key, job_number, err);
            self.fail_if_not_terminal(run_key, job_number, &err).await?
          }
        };

        statuses.insert(job_number, status);
      }

      if !dag.blocked(|n| statuses[&n]).is_empty() {
        // a gate job did not succeed; cancel whatever has not started
        let mut run = self.db.runs().get(run_key).await?;
        let mut jobs = self.db.jobs().list_for_run(run_key).await?;

        abort_run(&mut run, &mut jobs, false, JobStatus::Cancelled)?;

        for job in &jobs {
          self.db.jobs().put(job).await?;
        }
        self.db.runs().put(&run).await?;

        return Ok(());
      }
    }

    let mut run = self.db.runs().get(run_key).await?;
    if !run.status.is_terminal() {
      let jobs = self.db.jobs().list_for_run(run_key).await?;
      complete_run(&mut run, &jobs)?;
      self.db.runs().put(&run).await?;
    }

    Ok(())
  }
}

impl InProcessBackend {
  /// A runner that errors without writing a terminal status exited without
  /// owning its row to completion; reconcile the row here.
  async fn fail_if_not_terminal(
    &self,
    run_key: &RunKey,
    job_number: u32,
    err: &Error,
  ) -> Result<JobStatus> {
    let key = run_key.job_key(job_number);
    let mut job = self.db.jobs().get(&key).await?;

    if job.status.is_terminal() {
      return Ok(job.status);
    }

    if job.status == JobStatus::Pending {
      job.transition(JobStatus::InProgress, None)?;
    }
    job.transition(JobStatus::Failed, Some(err.to_string()))?;
    self.db.jobs().put(&job).await?;

    Ok(JobStatus::Failed)
  }
}

/// Delegates scheduling to an external step-function service. The service
/// invokes the task runners by `(run_key, job_number)` and reports terminal
/// state through the same store rows.
pub struct StateMachineBackend {
  db: Database,
  client: Arc<dyn StateMachineClient>,
  state_machine_arn: String,
}

impl StateMachineBackend {
  pub fn new(db: Database, client: Arc<dyn StateMachineClient>, state_machine_arn: String) -> Self {
    StateMachineBackend {
      db,
      client,
      state_machine_arn,
    }
  }
}

#[async_trait]
impl ExecutionBackend for StateMachineBackend {
  async fn execute(&self, run_key: &RunKey) -> Result<()> {
    let jobs = self.db.jobs().list_for_run(run_key).await?;

    let common_job_number = jobs
      .iter()
      .find(|job| job.modified_app_id.is_common())
      .map(|job| job.key.job_number);
    let app_job_numbers: Vec<u32> = jobs
      .iter()
      .filter(|job| !job.modified_app_id.is_common())
      .map(|job| job.key.job_number)
      .collect();

    let input = serde_json::json!({
      "project_id": run_key.project_id.to_string(),
      "run_key": run_key.to_string(),
      "job_key": jobs.first().map(|job| job.key.to_string()),
      "common_job_number": common_job_number,
      "app_job_numbers": app_job_numbers,
    });

    self
      .client
      .start_execution(&self.state_machine_arn, &execution_name(run_key), input)
      .await
  }
}

/// Deterministic execution name for a run, restricted to `[A-Za-z0-9_-]`
/// and at most 80 characters.
pub fn execution_name(run_key: &RunKey) -> String {
  let name: String = run_key
    .to_string()
    .chars()
    .map(|c| {
      if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
        c
      } else {
        '_'
      }
    })
    .collect();

  name.chars().take(80).collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{ProjectId, WorkflowType};

  #[test]
  fn test_execution_name_is_sanitized() {
    let key = RunKey::new(ProjectId::new("my proj"), WorkflowType::Deploy, None, 7);
    assert_eq!(execution_name(&key), "my_proj_DEPLOY__7");
  }

  #[test]
  fn test_execution_name_is_bounded() {
    let key = RunKey::new(
      ProjectId::new("p".repeat(120)),
      WorkflowType::Deploy,
      None,
      1,
    );
    assert_eq!(execution_name(&key).len(), 80);
  }
}
