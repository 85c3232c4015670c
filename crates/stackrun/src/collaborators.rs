//! Contracts for the external collaborators the workflow engine drives.
//!
//! The engine, IaC tool and friends live outside this crate; the core only
//! depends on these seams, the way runs depend on a user-supplied runner.

use crate::{AppDeployment, AppId, JobKey, JobStatus, Project, ProjectId, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Callback receiving one line of collaborator output at a time.
pub type OnOutput = Arc<dyn Fn(&str) + Send + Sync>;

/// Result of one engine invocation.
#[derive(Debug, Clone, Default)]
pub struct EngineOutput {
  /// Contents of `resources.yaml`.
  pub resources_yaml: String,
  /// Contents of `deployment_permissions_policy.json`, when produced.
  pub policy: Option<serde_json::Value>,
  /// Structured config errors (engine exit code 2).
  pub config_errors: Vec<serde_json::Value>,
}

/// The constraint-solving engine that turns stack templates into resource
/// graphs.
#[async_trait]
pub trait Engine: Send + Sync {
  /// Runs the engine against `constraints`, optionally importing
  /// `input_graph`, writing its output files into `working_dir`.
  async fn run(
    &self,
    constraints: &serde_json::Value,
    input_graph: Option<&str>,
    working_dir: &Path,
  ) -> Result<EngineOutput>;

  /// Reads back the cloud-side state of a deployed app.
  async fn get_live_state(
    &self,
    state: &serde_json::Value,
    working_dir: &Path,
  ) -> Result<String>;

  /// Writes an IaC project tree for `resources_yaml` into `working_dir`.
  async fn export_iac(
    &self,
    resources_yaml: &str,
    app_name: &str,
    working_dir: &Path,
  ) -> Result<()>;
}

/// Stack-level configuration injected before the IaC tool runs.
#[derive(Debug, Clone, Default)]
pub struct StackConfig {
  pub region: String,
  pub assumed_role_arn: Option<String>,
  pub state_bucket: Option<String>,
  pub secrets: HashMap<String, String>,
}

/// The external IaC tool driving actual cloud mutations.
#[async_trait]
pub trait IacTool: Send + Sync {
  async fn select_or_create_stack(
    &self,
    stack_name: &str,
    working_dir: &Path,
    config: &StackConfig,
  ) -> Result<()>;

  async fn refresh(&self, working_dir: &Path, on_output: OnOutput) -> Result<()>;

  async fn preview(&self, working_dir: &Path, on_output: OnOutput) -> Result<()>;

  async fn up(&self, working_dir: &Path, on_output: OnOutput) -> Result<()>;

  async fn destroy(&self, working_dir: &Path, on_output: OnOutput) -> Result<()>;

  async fn remove_stack(&self, working_dir: &Path) -> Result<()>;

  async fn get_outputs(&self, working_dir: &Path) -> Result<HashMap<String, String>>;
}

/// Archive storage for exported IaC bundles.
#[async_trait]
pub trait IacStore: Send + Sync {
  /// Fails with `Error::NotFound` when no bundle was ever written.
  async fn get_iac(&self, project_id: &ProjectId, app_id: &AppId, version: u32)
    -> Result<Vec<u8>>;

  async fn write_iac(
    &self,
    project_id: &ProjectId,
    app_id: &AppId,
    version: u32,
    bytes: Vec<u8>,
  ) -> Result<()>;
}

/// One deployable stack template.
pub trait StackPack: Send + Sync {
  fn display_name(&self) -> &str;

  /// Output names the app declares; only these are read back after deploy.
  fn declared_outputs(&self) -> Vec<String>;

  fn to_constraints(
    &self,
    configuration: &serde_json::Map<String, serde_json::Value>,
    region: &str,
  ) -> serde_json::Value;

  /// Materializes per-app accessory files into the working directory.
  fn copy_files(
    &self,
    configuration: &serde_json::Map<String, serde_json::Value>,
    working_dir: &Path,
  ) -> Result<()>;
}

pub trait StackPackRegistry: Send + Sync {
  fn get_stack_packs(&self) -> HashMap<AppId, Arc<dyn StackPack>>;

  fn get(&self, app_id: &AppId) -> Option<Arc<dyn StackPack>> {
    self.get_stack_packs().remove(app_id)
  }

  /// Display name for a job title; falls back to the raw app id.
  fn display_name(&self, app_id: &AppId) -> String {
    self
      .get(app_id)
      .map(|pack| pack.display_name().to_string())
      .unwrap_or_else(|| app_id.to_string())
  }
}

/// One line of a deployment-success notification.
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentNotice {
  pub app_name: String,
  pub login_url: Option<String>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
  async fn send_deployment_success(
    &self,
    address: &str,
    entries: &[DeploymentNotice],
  ) -> Result<()>;
}

/// Default notifier: writes the notice to the process log.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
  async fn send_deployment_success(
    &self,
    address: &str,
    entries: &[DeploymentNotice],
  ) -> Result<()> {
    for entry in entries {
      log::info!(
        "Deployment success for {}: {} ({})",
        address,
        entry.app_name,
        entry.login_url.as_deref().unwrap_or("no url")
      );
    }
    Ok(())
  }
}

/// Hook invoked between the live-state read and the engine build. Hooks may
/// create external resources; a hook failure fails the job.
#[async_trait]
pub trait DeployHook: Send + Sync {
  async fn pre_deploy(
    &self,
    project: &Project,
    deployment: &AppDeployment,
    live_state: Option<&str>,
  ) -> Result<()>;
}

/// Client for the external step-function service used by the out-of-process
/// scheduling backend.
#[async_trait]
pub trait StateMachineClient: Send + Sync {
  async fn start_execution(
    &self,
    state_machine_arn: &str,
    execution_name: &str,
    input: serde_json::Value,
  ) -> Result<()>;
}

/// Executes one job to a terminal status, writing its row and log along the
/// way, and reports the terminal status it wrote.
#[async_trait]
pub trait JobRunner: Send + Sync {
  async fn run_job(&self, key: &JobKey) -> Result<JobStatus>;
}
