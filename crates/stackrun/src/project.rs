use crate::{AppId, JobKey, ProjectId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A logical namespace owned by one user, containing a set of apps and the
/// common base stack.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Project {
  pub project_id: ProjectId,
  pub region: String,
  pub assumed_role_arn: Option<String>,
  #[serde(default)]
  pub features: Vec<String>,
  /// Currently selected version per app, including the common app.
  #[serde(default)]
  pub app_versions: HashMap<AppId, u32>,
  /// Set only while a whole-project destroy run is active. While set, new
  /// deploy runs are refused.
  #[serde(default)]
  pub destroy_in_progress: bool,
  pub created_at: DateTime<Utc>,
}

impl Project {
  pub fn new(project_id: ProjectId, region: impl Into<String>) -> Self {
    Project {
      project_id,
      region: region.into(),
      assumed_role_arn: None,
      features: vec![],
      app_versions: HashMap::new(),
      destroy_in_progress: false,
      created_at: Utc::now(),
    }
  }

  pub fn version_of(&self, app_id: &AppId) -> Option<u32> {
    self.app_versions.get(app_id).copied()
  }

  /// All apps except the common base stack.
  pub fn user_apps(&self) -> Vec<AppId> {
    let mut apps: Vec<AppId> = self
      .app_versions
      .keys()
      .filter(|app| !app.is_common())
      .cloned()
      .collect();
    apps.sort();
    apps
  }

  pub fn has_common(&self) -> bool {
    self.app_versions.keys().any(|app| app.is_common())
  }
}

/// A versioned instance of a stack template configured for a project.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AppDeployment {
  pub project_id: ProjectId,
  pub app_id: AppId,
  /// Monotonically increasing per app. Never reused once a deploy job has
  /// touched it.
  pub version: u32,
  #[serde(default)]
  pub configuration: serde_json::Map<String, serde_json::Value>,
  /// Rendered outputs from the last successful deploy.
  #[serde(default)]
  pub outputs: HashMap<String, String>,
  /// Jobs that have touched this version.
  #[serde(default)]
  pub deployments: Vec<JobKey>,
  /// Cached permissions policy produced by the engine.
  pub policy: Option<serde_json::Value>,
  pub created_at: DateTime<Utc>,
}

impl AppDeployment {
  pub fn new(project_id: ProjectId, app_id: AppId, version: u32) -> Self {
    AppDeployment {
      project_id,
      app_id,
      version,
      configuration: serde_json::Map::new(),
      outputs: HashMap::new(),
      deployments: vec![],
      policy: None,
      created_at: Utc::now(),
    }
  }

  pub fn with_configuration(
    mut self,
    configuration: serde_json::Map<String, serde_json::Value>,
  ) -> Self {
    self.configuration = configuration;
    self
  }

  pub fn record_job(&mut self, key: JobKey) {
    if !self.deployments.contains(&key) {
      self.deployments.push(key);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{RunKey, WorkflowType};

  #[test]
  fn test_user_apps_excludes_common() {
    let mut project = Project::new(ProjectId::new("p1"), "us-east-1");
    project.app_versions.insert(AppId::common(), 1);
    project.app_versions.insert(AppId::new("web"), 2);
    project.app_versions.insert(AppId::new("api"), 1);

    assert_eq!(
      project.user_apps(),
      vec![AppId::new("api"), AppId::new("web")]
    );
    assert!(project.has_common());
  }

  #[test]
  fn test_record_job_is_idempotent() {
    let mut deployment = AppDeployment::new(ProjectId::new("p1"), AppId::new("web"), 1);
    let key = RunKey::new(ProjectId::new("p1"), WorkflowType::Deploy, None, 1).job_key(2);

    deployment.record_job(key.clone());
    deployment.record_job(key);

    assert_eq!(deployment.deployments.len(), 1);
  }
}
