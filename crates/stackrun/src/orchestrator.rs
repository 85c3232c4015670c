use crate::workflow::start_run;
use crate::{
  AppId, Database, DeploymentNotice, Error, ExecutionBackend, JobStatus, Notifier, Result, RunKey,
  StackPackRegistry, WorkflowJob, WorkflowRun, WorkflowType,
};
use std::sync::Arc;

/// Creates workflow runs and their job DAGs, schedules them on an execution
/// backend, and owns the post-completion side effects.
///
/// Never raises past its boundary during scheduling: a run handed to
/// `schedule` always ends in a terminal status.
pub struct Orchestrator {
  db: Database,
  registry: Arc<dyn StackPackRegistry>,
  notifier: Arc<dyn Notifier>,
  deploy_backend: Arc<dyn ExecutionBackend>,
  destroy_backend: Arc<dyn ExecutionBackend>,
}

/// Arguments for creating a run.
pub struct CreateRun {
  pub initiated_by: String,
  pub notification_email: Option<String>,
}

impl Orchestrator {
  pub fn new(
    db: Database,
    registry: Arc<dyn StackPackRegistry>,
    notifier: Arc<dyn Notifier>,
    deploy_backend: Arc<dyn ExecutionBackend>,
    destroy_backend: Arc<dyn ExecutionBackend>,
  ) -> Self {
    Orchestrator {
      db,
      registry,
      notifier,
      deploy_backend,
      destroy_backend,
    }
  }

  pub fn database(&self) -> &Database {
    &self.db
  }

  /// Creates a deploy run: one common job first, then one job per app
  /// depending on it.
  pub async fn create_deploy_run(
    &self,
    project_id: &crate::ProjectId,
    app_id: Option<AppId>,
    params: CreateRun,
  ) -> Result<WorkflowRun> {
    let project = self.db.projects().get(project_id).await?;

    if project.destroy_in_progress {
      return Err(Error::precondition("Tear down in progress"));
    }
    if !project.has_common() {
      return Err(Error::precondition(format!(
        "Project {} has no common stack",
        project_id
      )));
    }

    let apps = match &app_id {
      Some(app) => {
        if app.is_common() {
          return Err(Error::precondition(
            "The common stack cannot be deployed on its own",
          ));
        }
        if project.version_of(app).is_none() {
          return Err(Error::not_found(format!(
            "App {} not found in project {}",
            app, project_id
          )));
        }
        vec![app.clone()]
      }
      None => project.user_apps(),
    };

    let run = self
      .db
      .runs()
      .create(project_id, WorkflowType::Deploy, app_id, |key| {
        let mut run = WorkflowRun::new(key, params.initiated_by.clone());
        run.notification_email = params.notification_email.clone();
        run
      })
      .await?;

    let common = self
      .db
      .jobs()
      .create(&run.key, |key| {
        WorkflowJob::new(key, WorkflowType::Deploy, AppId::common())
      })
      .await?;

    for app in apps {
      self
        .db
        .jobs()
        .create(&run.key, |key| {
          WorkflowJob::new(key, WorkflowType::Deploy, app.clone())
            .with_dependencies(vec![common.key.clone()])
        })
        .await?;
    }

    Ok(run)
  }

  /// Creates a destroy run: one independent job per app and, when the
  /// common stack goes too, a trailing common job depending on all of them.
  ///
  /// The common stack is destroyed only when no other user app remains
  /// deployed. When it is, `destroy_in_progress` is set before dispatch.
  pub async fn create_destroy_run(
    &self,
    project_id: &crate::ProjectId,
    app_id: Option<AppId>,
    keep_common: bool,
    params: CreateRun,
  ) -> Result<WorkflowRun> {
    let mut project = self.db.projects().get(project_id).await?;

    let apps = match &app_id {
      Some(app) => {
        if app.is_common() {
          return Err(Error::precondition(
            "The common stack cannot be destroyed on its own",
          ));
        }
        if project.version_of(app).is_none() {
          return Err(Error::not_found(format!(
            "App {} not found in project {}",
            app, project_id
          )));
        }
        vec![app.clone()]
      }
      None => project.user_apps(),
    };

    let destroy_common = if keep_common {
      false
    } else {
      !self.others_deployed(&project, &apps).await?
    };

    let run = self
      .db
      .runs()
      .create(project_id, WorkflowType::Destroy, app_id, |key| {
        let mut run = WorkflowRun::new(key, params.initiated_by.clone());
        run.notification_email = params.notification_email.clone();
        run
      })
      .await?;

    // raised only once the run row exists, so reconciling that run always
    // clears it again
    if destroy_common {
      project.destroy_in_progress = true;
      self.db.projects().put(&project).await?;
    }

    let mut app_jobs = Vec::new();
    for app in apps {
      let job = self
        .db
        .jobs()
        .create(&run.key, |key| {
          WorkflowJob::new(key, WorkflowType::Destroy, app.clone())
        })
        .await?;
      app_jobs.push(job.key);
    }

    if destroy_common {
      self
        .db
        .jobs()
        .create(&run.key, |key| {
          WorkflowJob::new(key, WorkflowType::Destroy, AppId::common())
            .with_dependencies(app_jobs.clone())
        })
        .await?;
    }

    Ok(run)
  }

  /// Whether any user app outside `excluded` is still deployed.
  async fn others_deployed(&self, project: &crate::Project, excluded: &[AppId]) -> Result<bool> {
    for app in project.user_apps() {
      if excluded.contains(&app) {
        continue;
      }
      if self
        .db
        .latest_deployed_version(&project.project_id, &app)
        .await?
        .is_some()
      {
        return Ok(true);
      }
    }
    Ok(false)
  }

  /// Starts the run, drives it on the configured backend, and reconciles.
  pub async fn schedule(&self, run_key: &RunKey) -> Result<WorkflowRun> {
    let mut run = self.db.runs().get(run_key).await?;
    let mut jobs = self.db.jobs().list_for_run(run_key).await?;

    start_run(&mut run, &mut jobs)?;
    for job in &jobs {
      self.db.jobs().put(job).await?;
    }
    self.db.runs().put(&run).await?;

    let backend = match run_key.workflow_type {
      WorkflowType::Deploy => &self.deploy_backend,
      WorkflowType::Destroy => &self.destroy_backend,
    };

    if let Err(err) = backend.execute(run_key).await {
      log::error!("Backend failed to execute run {}: {}", run_key, err);
      self.abort(run_key, false).await?;
    }

    self.reconcile(run_key).await
  }

  /// Cancels jobs that have not run; see `workflow::abort_run`.
  pub async fn abort(&self, run_key: &RunKey, cancel_in_progress: bool) -> Result<WorkflowRun> {
    let mut run = self.db.runs().get(run_key).await?;
    let mut jobs = self.db.jobs().list_for_run(run_key).await?;

    crate::workflow::abort_run(&mut run, &mut jobs, cancel_in_progress, JobStatus::Cancelled)?;

    for job in &jobs {
      self.db.jobs().put(job).await?;
    }
    self.db.runs().put(&run).await?;

    Ok(run)
  }

  /// Terminal reconciliation plus post-completion side effects. Safe to
  /// call on any run; does nothing for runs with jobs still in flight.
  pub async fn reconcile(&self, run_key: &RunKey) -> Result<WorkflowRun> {
    let mut run = self.db.runs().get(run_key).await?;
    let jobs = self.db.jobs().list_for_run(run_key).await?;

    if !run.status.is_terminal() {
      if jobs.iter().any(|job| !job.status.is_terminal()) {
        return Ok(run);
      }
      crate::workflow::complete_run(&mut run, &jobs)?;
      self.db.runs().put(&run).await?;
    }

    // the destroy flag must not outlive any terminal destroy run
    if run_key.workflow_type == WorkflowType::Destroy {
      let mut project = self.db.projects().get(&run_key.project_id).await?;
      if project.destroy_in_progress {
        project.destroy_in_progress = false;
        self.db.projects().put(&project).await?;
      }
    }

    if run.status == JobStatus::Succeeded
      && run_key.workflow_type == WorkflowType::Deploy
    {
      if let Some(address) = run.notification_email.clone() {
        let entries = self.success_entries(&jobs).await?;
        if let Err(err) = self
          .notifier
          .send_deployment_success(&address, &entries)
          .await
        {
          log::error!("Failed to notify {} for run {}: {}", address, run_key, err);
        }
      }
    }

    Ok(run)
  }

  async fn success_entries(&self, jobs: &[WorkflowJob]) -> Result<Vec<DeploymentNotice>> {
    let mut entries = Vec::new();

    for job in jobs {
      if job.modified_app_id.is_common() || job.status != JobStatus::Succeeded {
        continue;
      }

      let login_url = match self
        .db
        .latest_deployed_version(&job.key.run.project_id, &job.modified_app_id)
        .await?
      {
        Some(version) => self
          .db
          .deployments()
          .get(&job.key.run.project_id, &job.modified_app_id, version)
          .await?
          .outputs
          .get("URL")
          .cloned(),
        None => None,
      };

      entries.push(DeploymentNotice {
        app_name: self.registry.display_name(&job.modified_app_id),
        login_url,
      });
    }

    Ok(entries)
  }
}
