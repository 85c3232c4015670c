use super::Store;
use crate::{
  AppDeployment, AppId, Error, JobKey, JobStatus, Project, ProjectId, Result, RunKey, WorkflowJob,
  WorkflowRun, WorkflowType,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

/// Version counters are capped; running past this is a programming error in
/// the caller, not contention.
pub const MAX_VERSIONS: u32 = 100_000_000;

/// Attempts for the `read latest; n+1; conditional put` loop before the
/// contention surfaces as a `Conflict`.
const NUMBERING_RETRIES: usize = 5;

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
  serde_json::to_vec(value).map_err(|err| Error::internal(format!("Failed to encode row: {}", err)))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
  serde_json::from_slice(bytes)
    .map_err(|err| Error::internal(format!("Failed to decode row: {}", err)))
}

fn app_segment(app_id: Option<&AppId>) -> &str {
  app_id.map(|a| a.inner()).unwrap_or("-")
}

fn project_key(project_id: &ProjectId) -> String {
  format!("project/{}", project_id)
}

fn deployment_prefix(project_id: &ProjectId, app_id: &AppId) -> String {
  format!("deployment/{}/{}/", project_id, app_id)
}

fn deployment_key(project_id: &ProjectId, app_id: &AppId, version: u32) -> String {
  // nine digits cover the counter all the way up to MAX_VERSIONS
  format!("{}{:09}", deployment_prefix(project_id, app_id), version)
}

fn run_partition_prefix(
  project_id: &ProjectId,
  workflow_type: WorkflowType,
  app_id: Option<&AppId>,
) -> String {
  format!("run/{}/{}/{}/", project_id, workflow_type, app_segment(app_id))
}

fn run_storage_key(key: &RunKey) -> String {
  format!(
    "{}{:08}",
    run_partition_prefix(&key.project_id, key.workflow_type, key.app_id.as_ref()),
    key.run_number
  )
}

fn job_prefix(run: &RunKey) -> String {
  format!(
    "job/{}/{}/{}/{:08}/",
    run.project_id,
    run.workflow_type,
    app_segment(run.app_id.as_ref()),
    run.run_number
  )
}

fn job_storage_key(key: &JobKey) -> String {
  format!("{}{:08}", job_prefix(&key.run), key.job_number)
}

/// Highest trailing number under a prefix, relying on `scan_prefix` key
/// order and zero-padded numbers.
async fn latest_number(store: &dyn Store, prefix: &str) -> Result<Option<u32>> {
  let rows = store.scan_prefix(prefix).await?;
  let Some((key, _)) = rows.last() else {
    return Ok(None);
  };

  let number = key
    .rsplit('/')
    .next()
    .and_then(|segment| segment.parse::<u32>().ok())
    .ok_or_else(|| Error::internal(format!("Malformed storage key: {}", key)))?;

  Ok(Some(number))
}

/// Repositories over one shared store. Cheap to clone.
#[derive(Clone)]
pub struct Database {
  store: Arc<dyn Store>,
}

impl Database {
  pub fn new(store: Arc<dyn Store>) -> Self {
    Database { store }
  }

  pub fn projects(&self) -> Projects {
    Projects {
      store: self.store.clone(),
    }
  }

  pub fn deployments(&self) -> Deployments {
    Deployments {
      store: self.store.clone(),
    }
  }

  pub fn runs(&self) -> Runs {
    Runs {
      store: self.store.clone(),
    }
  }

  pub fn jobs(&self) -> Jobs {
    Jobs {
      store: self.store.clone(),
    }
  }

  /// Latest version of `(project, app)` whose most recent `Succeeded` job
  /// is a deploy, or `None` if the app was never deployed. A recorded
  /// destroy removes the whole stack, so it also hides every earlier
  /// version.
  pub async fn latest_deployed_version(
    &self,
    project_id: &ProjectId,
    app_id: &AppId,
  ) -> Result<Option<u32>> {
    let deployments = self.deployments().list(project_id, app_id).await?;
    let jobs = self.jobs();

    for deployment in deployments.iter().rev() {
      let mut last_action = None;
      for key in &deployment.deployments {
        if let Some(job) = jobs.try_get(key).await? {
          if job.status == JobStatus::Succeeded {
            last_action = Some(job.job_type);
          }
        }
      }

      match last_action {
        Some(WorkflowType::Deploy) => return Ok(Some(deployment.version)),
        Some(WorkflowType::Destroy) => return Ok(None),
        None => {}
      }
    }

    Ok(None)
  }
}

pub struct Projects {
  store: Arc<dyn Store>,
}

impl Projects {
  pub async fn get(&self, project_id: &ProjectId) -> Result<Project> {
    self
      .try_get(project_id)
      .await?
      .ok_or_else(|| Error::not_found(format!("Project {} not found", project_id)))
  }

  pub async fn try_get(&self, project_id: &ProjectId) -> Result<Option<Project>> {
    match self.store.get(&project_key(project_id)).await? {
      Some(bytes) => Ok(Some(decode(&bytes)?)),
      None => Ok(None),
    }
  }

  pub async fn put(&self, project: &Project) -> Result<()> {
    self
      .store
      .put(&project_key(&project.project_id), encode(project)?)
      .await
  }
}

pub struct Deployments {
  store: Arc<dyn Store>,
}

impl Deployments {
  pub async fn get(
    &self,
    project_id: &ProjectId,
    app_id: &AppId,
    version: u32,
  ) -> Result<AppDeployment> {
    match self
      .store
      .get(&deployment_key(project_id, app_id, version))
      .await?
    {
      Some(bytes) => decode(&bytes),
      None => Err(Error::not_found(format!(
        "AppDeployment {}/{} v{} not found",
        project_id, app_id, version
      ))),
    }
  }

  pub async fn put(&self, deployment: &AppDeployment) -> Result<()> {
    self
      .store
      .put(
        &deployment_key(
          &deployment.project_id,
          &deployment.app_id,
          deployment.version,
        ),
        encode(deployment)?,
      )
      .await
  }

  pub async fn list(&self, project_id: &ProjectId, app_id: &AppId) -> Result<Vec<AppDeployment>> {
    let rows = self
      .store
      .scan_prefix(&deployment_prefix(project_id, app_id))
      .await?;

    rows.iter().map(|(_, bytes)| decode(bytes)).collect()
  }

  pub async fn latest_version(
    &self,
    project_id: &ProjectId,
    app_id: &AppId,
  ) -> Result<Option<u32>> {
    latest_number(self.store.as_ref(), &deployment_prefix(project_id, app_id)).await
  }

  /// Allocates the next version number and writes the deployment under it.
  pub async fn create_version<F>(
    &self,
    project_id: &ProjectId,
    app_id: &AppId,
    build: F,
  ) -> Result<AppDeployment>
  where
    F: Fn(u32) -> AppDeployment,
  {
    for _ in 0..NUMBERING_RETRIES {
      let latest = self.latest_version(project_id, app_id).await?.unwrap_or(0);
      let version = latest + 1;

      if version > MAX_VERSIONS {
        return Err(Error::precondition(format!(
          "Version counter exhausted for {}/{}",
          project_id, app_id
        )));
      }

      let deployment = build(version);
      match self
        .store
        .put_if_absent(
          &deployment_key(project_id, app_id, version),
          encode(&deployment)?,
        )
        .await
      {
        Ok(()) => return Ok(deployment),
        Err(err) if err.is_conflict() => continue,
        Err(err) => return Err(err),
      }
    }

    Err(Error::conflict(format!(
      "Could not allocate a version for {}/{} after {} attempts",
      project_id, app_id, NUMBERING_RETRIES
    )))
  }
}

pub struct Runs {
  store: Arc<dyn Store>,
}

impl Runs {
  pub async fn get(&self, key: &RunKey) -> Result<WorkflowRun> {
    match self.store.get(&run_storage_key(key)).await? {
      Some(bytes) => decode(&bytes),
      None => Err(Error::not_found(format!("WorkflowRun {} not found", key))),
    }
  }

  pub async fn put(&self, run: &WorkflowRun) -> Result<()> {
    self
      .store
      .put(&run_storage_key(&run.key), encode(run)?)
      .await
  }

  /// Allocates the next run number in the partition and creates the run.
  pub async fn create<F>(
    &self,
    project_id: &ProjectId,
    workflow_type: WorkflowType,
    app_id: Option<AppId>,
    build: F,
  ) -> Result<WorkflowRun>
  where
    F: Fn(RunKey) -> WorkflowRun,
  {
    let prefix = run_partition_prefix(project_id, workflow_type, app_id.as_ref());

    for _ in 0..NUMBERING_RETRIES {
      let latest = latest_number(self.store.as_ref(), &prefix)
        .await?
        .unwrap_or(0);
      let key = RunKey::new(
        project_id.clone(),
        workflow_type,
        app_id.clone(),
        latest + 1,
      );

      let run = build(key.clone());
      match self
        .store
        .put_if_absent(&run_storage_key(&key), encode(&run)?)
        .await
      {
        Ok(()) => return Ok(run),
        Err(err) if err.is_conflict() => continue,
        Err(err) => return Err(err),
      }
    }

    Err(Error::conflict(format!(
      "Could not allocate a run number in {} after {} attempts",
      prefix, NUMBERING_RETRIES
    )))
  }

  /// All runs of a project, newest first, optionally filtered by workflow
  /// type and owning app.
  pub async fn list(
    &self,
    project_id: &ProjectId,
    workflow_type: Option<WorkflowType>,
    app_id: Option<&AppId>,
  ) -> Result<Vec<WorkflowRun>> {
    let rows = self
      .store
      .scan_prefix(&format!("run/{}/", project_id))
      .await?;

    let mut runs: Vec<WorkflowRun> = rows
      .iter()
      .map(|(_, bytes)| decode(bytes))
      .collect::<Result<_>>()?;

    if let Some(workflow_type) = workflow_type {
      runs.retain(|run| run.key.workflow_type == workflow_type);
    }
    if let Some(app_id) = app_id {
      runs.retain(|run| run.key.app_id.as_ref() == Some(app_id));
    }

    runs.sort_by(|a, b| b.key.run_number.cmp(&a.key.run_number));

    Ok(runs)
  }

  pub async fn latest(
    &self,
    project_id: &ProjectId,
    workflow_type: WorkflowType,
    app_id: Option<&AppId>,
  ) -> Result<Option<WorkflowRun>> {
    let prefix = run_partition_prefix(project_id, workflow_type, app_id);
    match latest_number(self.store.as_ref(), &prefix).await? {
      Some(number) => {
        let key = RunKey::new(
          project_id.clone(),
          workflow_type,
          app_id.cloned(),
          number,
        );
        Ok(Some(self.get(&key).await?))
      }
      None => Ok(None),
    }
  }
}

pub struct Jobs {
  store: Arc<dyn Store>,
}

impl Jobs {
  pub async fn get(&self, key: &JobKey) -> Result<WorkflowJob> {
    self
      .try_get(key)
      .await?
      .ok_or_else(|| Error::not_found(format!("WorkflowJob {} not found", key)))
  }

  pub async fn try_get(&self, key: &JobKey) -> Result<Option<WorkflowJob>> {
    match self.store.get(&job_storage_key(key)).await? {
      Some(bytes) => Ok(Some(decode(&bytes)?)),
      None => Ok(None),
    }
  }

  pub async fn put(&self, job: &WorkflowJob) -> Result<()> {
    self
      .store
      .put(&job_storage_key(&job.key), encode(job)?)
      .await
  }

  /// Allocates the next job number in the run and creates the job.
  pub async fn create<F>(&self, run: &RunKey, build: F) -> Result<WorkflowJob>
  where
    F: Fn(JobKey) -> WorkflowJob,
  {
    let prefix = job_prefix(run);

    for _ in 0..NUMBERING_RETRIES {
      let latest = latest_number(self.store.as_ref(), &prefix)
        .await?
        .unwrap_or(0);
      let key = run.job_key(latest + 1);

      let job = build(key.clone());
      match self
        .store
        .put_if_absent(&job_storage_key(&key), encode(&job)?)
        .await
      {
        Ok(()) => return Ok(job),
        Err(err) if err.is_conflict() => continue,
        Err(err) => return Err(err),
      }
    }

    Err(Error::conflict(format!(
      "Could not allocate a job number in {} after {} attempts",
      run, NUMBERING_RETRIES
    )))
  }

  /// Jobs of a run, ordered by job number ascending.
  pub async fn list_for_run(&self, run: &RunKey) -> Result<Vec<WorkflowJob>> {
    let rows = self.store.scan_prefix(&job_prefix(run)).await?;
    rows.iter().map(|(_, bytes)| decode(bytes)).collect()
  }

  pub async fn latest_for_run(&self, run: &RunKey) -> Result<Option<WorkflowJob>> {
    match latest_number(self.store.as_ref(), &job_prefix(run)).await? {
      Some(number) => Ok(Some(self.get(&run.job_key(number)).await?)),
      None => Ok(None),
    }
  }
}
