use crate::workdir::Workdir;
use crate::{deploy, destroy};
use async_trait::async_trait;
use stackrun::{
  job_log_name, AppId, Database, DeployHook, Engine, Error, IacStore, IacTool, JobKey, JobRunner,
  JobStatus, KeepTmp, LogStore, OnOutput, ProjectId, Result, StackPackRegistry, WorkflowType,
};
use std::sync::Arc;

/// Stack name as the IaC tool sees it, unique per project and app.
pub(crate) fn stack_name(project_id: &ProjectId, app_id: &AppId) -> String {
  format!("{}-{}", project_id, app_id)
}

/// Executes one job to a terminal status.
///
/// Owns the shared prologue and epilogue of every job: load and start the
/// row, open the log, set up the working directory, dispatch on job type,
/// then record the outcome and seal the log.
pub struct TaskRunner {
  pub(crate) db: Database,
  pub(crate) log_store: LogStore,
  pub(crate) engine: Arc<dyn Engine>,
  pub(crate) iac_tool: Arc<dyn IacTool>,
  pub(crate) iac_store: Arc<dyn IacStore>,
  pub(crate) registry: Arc<dyn StackPackRegistry>,
  pub(crate) hooks: Vec<Arc<dyn DeployHook>>,
  pub(crate) state_bucket: Option<String>,
  pub(crate) keep_tmp: KeepTmp,
}

impl TaskRunner {
  pub fn builder() -> TaskRunnerBuilder {
    TaskRunnerBuilder::new()
  }
}

pub struct TaskRunnerBuilder {
  db: Option<Database>,
  log_store: Option<LogStore>,
  engine: Option<Arc<dyn Engine>>,
  iac_tool: Option<Arc<dyn IacTool>>,
  iac_store: Option<Arc<dyn IacStore>>,
  registry: Option<Arc<dyn StackPackRegistry>>,
  hooks: Vec<Arc<dyn DeployHook>>,
  state_bucket: Option<String>,
  keep_tmp: KeepTmp,
}

impl TaskRunnerBuilder {
  fn new() -> Self {
    TaskRunnerBuilder {
      db: None,
      log_store: None,
      engine: None,
      iac_tool: None,
      iac_store: None,
      registry: None,
      hooks: vec![],
      state_bucket: None,
      keep_tmp: KeepTmp::Discard,
    }
  }

  pub fn db(mut self, db: Database) -> Self {
    self.db = Some(db);
    self
  }

  pub fn log_store(mut self, log_store: LogStore) -> Self {
    self.log_store = Some(log_store);
    self
  }

  pub fn engine(mut self, engine: Arc<dyn Engine>) -> Self {
    self.engine = Some(engine);
    self
  }

  pub fn iac_tool(mut self, iac_tool: Arc<dyn IacTool>) -> Self {
    self.iac_tool = Some(iac_tool);
    self
  }

  pub fn iac_store(mut self, iac_store: Arc<dyn IacStore>) -> Self {
    self.iac_store = Some(iac_store);
    self
  }

  pub fn registry(mut self, registry: Arc<dyn StackPackRegistry>) -> Self {
    self.registry = Some(registry);
    self
  }

  pub fn hook(mut self, hook: Arc<dyn DeployHook>) -> Self {
    self.hooks.push(hook);
    self
  }

  pub fn state_bucket(mut self, state_bucket: impl Into<String>) -> Self {
    self.state_bucket = Some(state_bucket.into());
    self
  }

  pub fn keep_tmp(mut self, keep_tmp: KeepTmp) -> Self {
    self.keep_tmp = keep_tmp;
    self
  }

  pub fn build(self) -> Result<TaskRunner> {
    Ok(TaskRunner {
      db: self
        .db
        .ok_or_else(|| Error::precondition("TaskRunner requires a database"))?,
      log_store: self
        .log_store
        .ok_or_else(|| Error::precondition("TaskRunner requires a log store"))?,
      engine: self
        .engine
        .ok_or_else(|| Error::precondition("TaskRunner requires an engine"))?,
      iac_tool: self
        .iac_tool
        .ok_or_else(|| Error::precondition("TaskRunner requires an IaC tool"))?,
      iac_store: self
        .iac_store
        .ok_or_else(|| Error::precondition("TaskRunner requires an IaC store"))?,
      registry: self
        .registry
        .ok_or_else(|| Error::precondition("TaskRunner requires a stack pack registry"))?,
      hooks: self.hooks,
      state_bucket: self.state_bucket,
      keep_tmp: self.keep_tmp,
    })
  }
}

#[async_trait]
impl JobRunner for TaskRunner {
  async fn run_job(&self, key: &JobKey) -> Result<JobStatus> {
    let jobs = self.db.jobs();
    let mut job = jobs.get(key).await?;

    // re-delivered jobs keep their recorded outcome
    if job.status.is_terminal() {
      return Ok(job.status);
    }

    if job.status == JobStatus::New {
      job.transition(JobStatus::Pending, None)?;
    }
    job.transition(JobStatus::InProgress, None)?;
    jobs.put(&job).await?;

    let writer = Arc::new(self.log_store.writer(
      &key.run.project_id,
      &key.run,
      &job_log_name(&job.modified_app_id),
    )?);
    let sink = writer.clone();
    let on_output: OnOutput = Arc::new(move |line: &str| {
      if let Err(err) = sink.write_line(line) {
        log::warn!("Failed to append log line: {}", err);
      }
    });

    let workdir = Workdir::create(&self.keep_tmp, &key.to_string())?;

    log::info!(
      "Running job {}: {}",
      key,
      job.title(&self.registry.display_name(&job.modified_app_id))
    );

    let result = match job.job_type {
      WorkflowType::Deploy => {
        deploy::run_deploy(self, &job, workdir.path(), on_output.clone()).await
      }
      WorkflowType::Destroy => {
        destroy::run_destroy(self, &job, workdir.path(), on_output.clone()).await
      }
    };

    let status = match result {
      Ok(outputs) => {
        job.outputs = outputs;
        job.transition(JobStatus::Succeeded, None)?;
        JobStatus::Succeeded
      }
      Err(err) => {
        log::error!("Job {} failed: {}", key, err);
        on_output(&format!("Job failed: {}", err));
        if let Error::ConfigError(message) = &err {
          // config errors are a structured list; keep them queryable on
          // the row, not only in the reason string
          if let Ok(errors) = serde_json::from_str::<serde_json::Value>(message) {
            job.outputs.insert("config_errors".to_string(), errors);
          }
        }
        job.transition(JobStatus::Failed, Some(err.to_string()))?;
        JobStatus::Failed
      }
    };

    jobs.put(&job).await?;
    writer.finish();

    Ok(status)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use parking_lot::Mutex;
  use stackrun::{
    AppDeployment, EngineOutput, LogWatcher, MemoryStore, Project, RunKey, StackConfig, StackPack,
    WorkflowJob, WorkflowRun,
  };
  use std::collections::HashMap;
  use std::path::Path;

  #[derive(Default)]
  struct StubEngine {
    config_errors: Vec<serde_json::Value>,
  }

  #[async_trait]
  impl Engine for StubEngine {
    async fn run(
      &self,
      _constraints: &serde_json::Value,
      _input_graph: Option<&str>,
      _working_dir: &Path,
    ) -> Result<EngineOutput> {
      if !self.config_errors.is_empty() {
        return Ok(EngineOutput {
          resources_yaml: String::new(),
          policy: None,
          config_errors: self.config_errors.clone(),
        });
      }
      Ok(EngineOutput {
        resources_yaml: "resources: []".to_string(),
        policy: None,
        config_errors: vec![],
      })
    }

    async fn get_live_state(
      &self,
      _state: &serde_json::Value,
      _working_dir: &Path,
    ) -> Result<String> {
      Ok("state: {}".to_string())
    }

    async fn export_iac(
      &self,
      resources_yaml: &str,
      _app_name: &str,
      working_dir: &Path,
    ) -> Result<()> {
      std::fs::create_dir_all(working_dir)?;
      std::fs::write(working_dir.join("resources.yaml"), resources_yaml)?;
      Ok(())
    }
  }

  #[derive(Default)]
  struct StubIacTool {
    fail_up: bool,
    calls: Mutex<Vec<&'static str>>,
  }

  #[async_trait]
  impl IacTool for StubIacTool {
    async fn select_or_create_stack(
      &self,
      _stack_name: &str,
      _working_dir: &Path,
      _config: &StackConfig,
    ) -> Result<()> {
      self.calls.lock().push("select");
      Ok(())
    }

    async fn refresh(&self, _working_dir: &Path, _on_output: OnOutput) -> Result<()> {
      self.calls.lock().push("refresh");
      Ok(())
    }

    async fn preview(&self, _working_dir: &Path, _on_output: OnOutput) -> Result<()> {
      self.calls.lock().push("preview");
      Ok(())
    }

    async fn up(&self, _working_dir: &Path, on_output: OnOutput) -> Result<()> {
      self.calls.lock().push("up");
      if self.fail_up {
        return Err(Error::tool_failure("up exploded"));
      }
      on_output("creating resources");
      Ok(())
    }

    async fn destroy(&self, _working_dir: &Path, _on_output: OnOutput) -> Result<()> {
      self.calls.lock().push("destroy");
      Ok(())
    }

    async fn remove_stack(&self, _working_dir: &Path) -> Result<()> {
      self.calls.lock().push("remove");
      Ok(())
    }

    async fn get_outputs(&self, _working_dir: &Path) -> Result<HashMap<String, String>> {
      Ok(HashMap::from([
        ("URL".to_string(), "https://example.test".to_string()),
        ("internal".to_string(), "hidden".to_string()),
      ]))
    }
  }

  struct StubPack;

  impl StackPack for StubPack {
    fn display_name(&self) -> &str {
      "Web App"
    }

    fn declared_outputs(&self) -> Vec<String> {
      vec!["URL".to_string()]
    }

    fn to_constraints(
      &self,
      _configuration: &serde_json::Map<String, serde_json::Value>,
      region: &str,
    ) -> serde_json::Value {
      serde_json::json!({ "region": region })
    }

    fn copy_files(
      &self,
      _configuration: &serde_json::Map<String, serde_json::Value>,
      _working_dir: &Path,
    ) -> Result<()> {
      Ok(())
    }
  }

  struct StubRegistry;

  impl StackPackRegistry for StubRegistry {
    fn get_stack_packs(&self) -> HashMap<AppId, Arc<dyn StackPack>> {
      HashMap::from([
        (AppId::common(), Arc::new(StubPack) as Arc<dyn StackPack>),
        (AppId::new("web"), Arc::new(StubPack) as Arc<dyn StackPack>),
      ])
    }
  }

  struct Fixture {
    runner: TaskRunner,
    db: Database,
    _log_root: tempfile::TempDir,
    _iac_root: tempfile::TempDir,
  }

  fn fixture(fail_up: bool) -> Fixture {
    fixture_with(StubEngine::default(), fail_up)
  }

  fn fixture_with(engine: StubEngine, fail_up: bool) -> Fixture {
    let db = Database::new(Arc::new(MemoryStore::new()));
    let log_root = tempfile::tempdir().unwrap();
    let iac_root = tempfile::tempdir().unwrap();

    let runner = TaskRunner::builder()
      .db(db.clone())
      .log_store(LogStore::new(log_root.path(), LogWatcher::spawn()))
      .engine(Arc::new(engine))
      .iac_tool(Arc::new(StubIacTool {
        fail_up,
        ..Default::default()
      }))
      .iac_store(Arc::new(crate::iac_store::FsIacStore::new(iac_root.path())))
      .registry(Arc::new(StubRegistry))
      .build()
      .unwrap();

    Fixture {
      runner,
      db,
      _log_root: log_root,
      _iac_root: iac_root,
    }
  }

  async fn seed_deploy_job(db: &Database) -> JobKey {
    let project_id = ProjectId::new("p1");
    let app_id = AppId::new("web");

    let mut project = Project::new(project_id.clone(), "us-east-1");
    project.app_versions.insert(app_id.clone(), 1);
    db.projects().put(&project).await.unwrap();

    db.deployments()
      .create_version(&project_id, &app_id, |version| {
        AppDeployment::new(project_id.clone(), app_id.clone(), version)
      })
      .await
      .unwrap();

    let run = db
      .runs()
      .create(&project_id, WorkflowType::Deploy, None, |key| {
        WorkflowRun::new(key, "tester")
      })
      .await
      .unwrap();

    let job = db
      .jobs()
      .create(&run.key, |key| {
        WorkflowJob::new(key, WorkflowType::Deploy, app_id.clone())
      })
      .await
      .unwrap();

    job.key
  }

  #[tokio::test]
  async fn test_deploy_job_succeeds_and_filters_outputs() {
    let fixture = fixture(false);
    let key = seed_deploy_job(&fixture.db).await;

    let status = fixture.runner.run_job(&key).await.unwrap();
    assert_eq!(status, JobStatus::Succeeded);

    let job = fixture.db.jobs().get(&key).await.unwrap();
    assert_eq!(job.status, JobStatus::Succeeded);
    assert_eq!(
      job.outputs.get("URL"),
      Some(&serde_json::Value::String("https://example.test".to_string()))
    );
    assert!(!job.outputs.contains_key("internal"));

    let deployment = fixture
      .db
      .deployments()
      .get(&ProjectId::new("p1"), &AppId::new("web"), 1)
      .await
      .unwrap();
    assert_eq!(
      deployment.outputs.get("URL").map(String::as_str),
      Some("https://example.test")
    );
    assert_eq!(deployment.deployments, vec![key]);
  }

  #[tokio::test]
  async fn test_failed_up_marks_job_failed_with_reason() {
    let fixture = fixture(true);
    let key = seed_deploy_job(&fixture.db).await;

    let status = fixture.runner.run_job(&key).await.unwrap();
    assert_eq!(status, JobStatus::Failed);

    let job = fixture.db.jobs().get(&key).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.status_reason.as_deref().unwrap().contains("up exploded"));
  }

  #[tokio::test]
  async fn test_config_errors_land_in_job_outputs() {
    let errors = vec![serde_json::json!({ "field": "size", "error": "required" })];
    let fixture = fixture_with(
      StubEngine {
        config_errors: errors.clone(),
      },
      false,
    );
    let key = seed_deploy_job(&fixture.db).await;

    let status = fixture.runner.run_job(&key).await.unwrap();
    assert_eq!(status, JobStatus::Failed);

    let job = fixture.db.jobs().get(&key).await.unwrap();
    assert_eq!(
      job.outputs.get("config_errors"),
      Some(&serde_json::Value::Array(errors))
    );
    assert!(job
      .status_reason
      .as_deref()
      .unwrap()
      .contains("\"field\":\"size\""));
  }

  #[tokio::test]
  async fn test_successful_destroy_unmarks_the_deployment() {
    let fixture = fixture(false);
    let key = seed_deploy_job(&fixture.db).await;
    fixture.runner.run_job(&key).await.unwrap();

    let project_id = ProjectId::new("p1");
    let app_id = AppId::new("web");
    assert_eq!(
      fixture
        .db
        .latest_deployed_version(&project_id, &app_id)
        .await
        .unwrap(),
      Some(1)
    );

    let run = fixture
      .db
      .runs()
      .create(
        &project_id,
        WorkflowType::Destroy,
        Some(app_id.clone()),
        |key| WorkflowRun::new(key, "tester"),
      )
      .await
      .unwrap();
    let job = fixture
      .db
      .jobs()
      .create(&run.key, |key| {
        WorkflowJob::new(key, WorkflowType::Destroy, app_id.clone())
      })
      .await
      .unwrap();

    let status = fixture.runner.run_job(&job.key).await.unwrap();
    assert_eq!(status, JobStatus::Succeeded);

    assert_eq!(
      fixture
        .db
        .latest_deployed_version(&project_id, &app_id)
        .await
        .unwrap(),
      None
    );
  }

  #[tokio::test]
  async fn test_destroy_of_never_deployed_app_succeeds() {
    let fixture = fixture(false);
    let project_id = ProjectId::new("p1");
    let app_id = AppId::new("web");

    let project = Project::new(project_id.clone(), "us-east-1");
    fixture.db.projects().put(&project).await.unwrap();

    let run = fixture
      .db
      .runs()
      .create(
        &project_id,
        WorkflowType::Destroy,
        Some(app_id.clone()),
        |key| WorkflowRun::new(key, "tester"),
      )
      .await
      .unwrap();
    let job = fixture
      .db
      .jobs()
      .create(&run.key, |key| {
        WorkflowJob::new(key, WorkflowType::Destroy, app_id.clone())
      })
      .await
      .unwrap();

    let status = fixture.runner.run_job(&job.key).await.unwrap();
    assert_eq!(status, JobStatus::Succeeded);
  }

  #[tokio::test]
  async fn test_terminal_job_is_not_rerun() {
    let fixture = fixture(false);
    let key = seed_deploy_job(&fixture.db).await;

    let first = fixture.runner.run_job(&key).await.unwrap();
    let second = fixture.runner.run_job(&key).await.unwrap();
    assert_eq!(first, second);
  }

  #[tokio::test]
  async fn test_missing_job_is_not_found() {
    let fixture = fixture(false);
    let run = RunKey::new(ProjectId::new("p1"), WorkflowType::Deploy, None, 1);

    let err = fixture.runner.run_job(&run.job_key(1)).await.unwrap_err();
    assert!(err.is_not_found());
  }
}
