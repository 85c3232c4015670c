mod dag;
mod lifecycle;

pub use dag::RunDag;
pub use lifecycle::{
  abort_run, complete_run, reconciled_status, start_run, REASON_RUN_TERMINATED,
};

use crate::{AppId, Error, JobKey, JobStatus, Result, RunKey, WorkflowType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A numbered install or destroy operation over a project, possibly
/// restricted to one app.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WorkflowRun {
  pub key: RunKey,
  pub status: JobStatus,
  pub status_reason: Option<String>,
  pub initiated_by: String,
  pub notification_email: Option<String>,
  pub created_at: DateTime<Utc>,
  pub started_at: Option<DateTime<Utc>>,
  pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowRun {
  pub fn new(key: RunKey, initiated_by: impl Into<String>) -> Self {
    WorkflowRun {
      key,
      status: JobStatus::New,
      status_reason: None,
      initiated_by: initiated_by.into(),
      notification_email: None,
      created_at: Utc::now(),
      started_at: None,
      completed_at: None,
    }
  }

  pub fn workflow_type(&self) -> WorkflowType {
    self.key.workflow_type
  }

  pub fn start(&mut self) {
    self.status = JobStatus::InProgress;
    self.started_at = Some(Utc::now());
  }

  pub fn complete(&mut self, status: JobStatus, reason: Option<String>) {
    self.status = status;
    self.status_reason = reason;
    self.completed_at = Some(Utc::now());
  }
}

/// A numbered unit of work within a run, touching exactly one app.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WorkflowJob {
  pub key: JobKey,
  pub job_type: WorkflowType,
  pub modified_app_id: AppId,
  pub status: JobStatus,
  pub status_reason: Option<String>,
  pub created_at: DateTime<Utc>,
  pub started_at: Option<DateTime<Utc>>,
  pub completed_at: Option<DateTime<Utc>>,
  /// Jobs in the same run that must be `Succeeded` before this one runs.
  #[serde(default)]
  pub dependencies: Vec<JobKey>,
  /// Free-form outputs captured from the external engine.
  #[serde(default)]
  pub outputs: serde_json::Map<String, serde_json::Value>,
}

impl WorkflowJob {
  pub fn new(key: JobKey, job_type: WorkflowType, modified_app_id: AppId) -> Self {
    WorkflowJob {
      key,
      job_type,
      modified_app_id,
      status: JobStatus::New,
      status_reason: None,
      created_at: Utc::now(),
      started_at: None,
      completed_at: None,
      dependencies: vec![],
      outputs: serde_json::Map::new(),
    }
  }

  pub fn with_dependencies(mut self, dependencies: Vec<JobKey>) -> Self {
    self.dependencies = dependencies;
    self
  }

  /// Human title, derived from the job type and the app's display name.
  pub fn title(&self, display_name: &str) -> String {
    match self.job_type {
      WorkflowType::Deploy => format!("Deploy {}", display_name),
      WorkflowType::Destroy => format!("Destroy {}", display_name),
    }
  }

  pub fn transition(&mut self, next: JobStatus, reason: Option<String>) -> Result<()> {
    if !self.status.can_transition_to(next) {
      return Err(Error::precondition(format!(
        "Job {} cannot transition from {} to {}",
        self.key, self.status, next
      )));
    }

    self.status = next;
    self.status_reason = reason;

    let now = Utc::now();
    if next == JobStatus::InProgress {
      self.started_at = Some(now);
    }
    if next.is_terminal() {
      self.completed_at = Some(now);
    }

    Ok(())
  }
}
