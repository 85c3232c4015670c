use super::{AppId, ProjectId};
use crate::Error;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowType {
  Deploy,
  Destroy,
}

impl std::fmt::Display for WorkflowType {
  fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
    match self {
      WorkflowType::Deploy => write!(f, "DEPLOY"),
      WorkflowType::Destroy => write!(f, "DESTROY"),
    }
  }
}

impl TryFrom<&str> for WorkflowType {
  type Error = Error;

  fn try_from(value: &str) -> Result<Self, Self::Error> {
    match value.to_ascii_uppercase().as_str() {
      "DEPLOY" => Ok(WorkflowType::Deploy),
      "DESTROY" => Ok(WorkflowType::Destroy),
      other => Err(Error::precondition(format!(
        "Unknown workflow type: {}",
        other
      ))),
    }
  }
}

/// Composite key of a workflow run. The structured form is authoritative;
/// the `#`-joined string exists only at the storage and HTTP boundary.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunKey {
  pub project_id: ProjectId,
  pub workflow_type: WorkflowType,
  /// Empty for project-wide runs.
  pub app_id: Option<AppId>,
  pub run_number: u32,
}

impl RunKey {
  pub fn new(
    project_id: ProjectId,
    workflow_type: WorkflowType,
    app_id: Option<AppId>,
    run_number: u32,
  ) -> Self {
    RunKey {
      project_id,
      workflow_type,
      app_id,
      run_number,
    }
  }

  /// Key prefix shared by all runs with the same numbering sequence.
  pub fn partition(project_id: &ProjectId, workflow_type: WorkflowType, app_id: Option<&AppId>) -> String {
    format!(
      "{}#{}#{}",
      project_id,
      workflow_type,
      app_id.map(|a| a.inner()).unwrap_or("")
    )
  }

  /// Directory name for this run's logs, unique within the project.
  pub fn log_dir_name(&self) -> String {
    format!(
      "{}#{}#{}",
      self.workflow_type,
      self.app_id.as_ref().map(|a| a.inner()).unwrap_or(""),
      self.run_number
    )
  }

  pub fn job_key(&self, job_number: u32) -> JobKey {
    JobKey {
      run: self.clone(),
      job_number,
    }
  }
}

impl std::fmt::Display for RunKey {
  fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
    write!(
      f,
      "{}#{}",
      RunKey::partition(&self.project_id, self.workflow_type, self.app_id.as_ref()),
      self.run_number
    )
  }
}

impl TryFrom<&str> for RunKey {
  type Error = Error;

  fn try_from(value: &str) -> Result<Self, Self::Error> {
    let parts: Vec<&str> = value.split('#').collect();
    if parts.len() != 4 {
      return Err(Error::precondition(
        "Run key must be in the format of <project>#<type>#<app>#<number>",
      ));
    }

    let run_number = parts[3]
      .parse::<u32>()
      .map_err(|_| Error::precondition("Run number must be a number"))?;

    Ok(RunKey {
      project_id: ProjectId::new(parts[0]),
      workflow_type: WorkflowType::try_from(parts[1])?,
      app_id: if parts[2].is_empty() {
        None
      } else {
        Some(AppId::new(parts[2]))
      },
      run_number,
    })
  }
}

/// Composite key of a job within a run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
  pub run: RunKey,
  pub job_number: u32,
}

impl std::fmt::Display for JobKey {
  fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
    write!(f, "{}#{}", self.run, self.job_number)
  }
}

impl TryFrom<&str> for JobKey {
  type Error = Error;

  fn try_from(value: &str) -> Result<Self, Self::Error> {
    let (run, job_number) = value.rsplit_once('#').ok_or_else(|| {
      Error::precondition("Job key must be in the format of <run_key>#<job_number>")
    })?;

    let job_number = job_number
      .parse::<u32>()
      .map_err(|_| Error::precondition("Job number must be a number"))?;

    Ok(JobKey {
      run: RunKey::try_from(run)?,
      job_number,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_run_key_round_trip() {
    let key = RunKey::new(ProjectId::new("p1"), WorkflowType::Deploy, None, 1);
    assert_eq!(key.to_string(), "p1#DEPLOY##1");
    assert_eq!(RunKey::try_from("p1#DEPLOY##1").unwrap(), key);

    let key = RunKey::new(
      ProjectId::new("p1"),
      WorkflowType::Destroy,
      Some(AppId::new("web")),
      12,
    );
    assert_eq!(key.to_string(), "p1#DESTROY#web#12");
    assert_eq!(RunKey::try_from("p1#DESTROY#web#12").unwrap(), key);
  }

  #[test]
  fn test_job_key_round_trip() {
    let run = RunKey::new(ProjectId::new("p1"), WorkflowType::Deploy, None, 3);
    let key = run.job_key(2);
    assert_eq!(key.to_string(), "p1#DEPLOY##3#2");
    assert_eq!(JobKey::try_from("p1#DEPLOY##3#2").unwrap(), key);
  }

  #[test]
  fn test_invalid_keys() {
    assert!(RunKey::try_from("p1#DEPLOY#1").is_err());
    assert!(RunKey::try_from("p1#INSTALL##1").is_err());
    assert!(RunKey::try_from("p1#DEPLOY##x").is_err());
    assert!(JobKey::try_from("p1#DEPLOY##1#x").is_err());
  }

  #[test]
  fn test_log_dir_name() {
    let key = RunKey::new(ProjectId::new("p1"), WorkflowType::Deploy, None, 1);
    assert_eq!(key.log_dir_name(), "DEPLOY##1");
  }
}
