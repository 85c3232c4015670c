use crate::error::ApiError;
use crate::AppState;
use axum::body::Body;
use axum::extract::{Path, Query, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};
use stackrun::{
  job_log_name, AppId, CreateRun, JobKey, ProjectId, RunKey, WorkflowJob, WorkflowRun,
  WorkflowType,
};
use std::convert::Infallible;
use tokio_stream::StreamExt;

pub fn router(state: AppState) -> Router {
  Router::new()
    .route("/api/project/workflows/install", post(install_project))
    .route(
      "/api/project/apps/:app_id/workflows/install",
      post(install_app),
    )
    .route("/api/project/workflows/uninstall", post(uninstall_project))
    .route(
      "/api/project/apps/:app_id/workflows/uninstall",
      post(uninstall_app),
    )
    .route("/api/project/workflows/:workflow_type/runs", get(list_runs))
    .route(
      "/api/project/workflows/:workflow_type/runs/:run_number",
      get(get_run),
    )
    .route(
      "/api/project/workflows/:workflow_type/runs/:run_number/jobs/:job_number/logs",
      get(job_logs),
    )
    .layer(middleware::from_fn_with_state(state.clone(), require_auth))
    .with_state(state)
}

/// Resolves the bearer token to the project the caller may act on.
async fn require_auth(
  State(state): State<AppState>,
  mut request: Request,
  next: Next,
) -> Result<Response, ApiError> {
  let token = request
    .headers()
    .get(header::AUTHORIZATION)
    .and_then(|value| value.to_str().ok())
    .and_then(|value| value.strip_prefix("Bearer "))
    .ok_or(ApiError::Unauthorized)?;

  let project_id = state
    .authenticator
    .authenticate(token)
    .await
    .ok_or(ApiError::Unauthorized)?;

  request.extensions_mut().insert(project_id);

  Ok(next.run(request).await)
}

#[derive(Deserialize, Default)]
pub struct CreateRunRequest {
  pub initiated_by: Option<String>,
  pub notification_email: Option<String>,
}

impl CreateRunRequest {
  fn into_params(self, project_id: &ProjectId) -> CreateRun {
    CreateRun {
      initiated_by: self
        .initiated_by
        .unwrap_or_else(|| project_id.to_string()),
      notification_email: self.notification_email,
    }
  }
}

#[derive(Deserialize, Default)]
pub struct UninstallQuery {
  pub keep_common: Option<bool>,
}

#[derive(Deserialize, Default)]
pub struct RunsQuery {
  pub app_id: Option<String>,
}

#[derive(Serialize)]
pub struct RunResponse {
  pub run: WorkflowRun,
  pub run_key: String,
  pub jobs: Vec<JobView>,
}

#[derive(Serialize)]
pub struct JobView {
  #[serde(flatten)]
  pub job: WorkflowJob,
  pub title: String,
}

impl RunResponse {
  async fn load(state: &AppState, run: WorkflowRun) -> Result<Self, ApiError> {
    let jobs = state
      .orchestrator
      .database()
      .jobs()
      .list_for_run(&run.key)
      .await?;

    let jobs = jobs
      .into_iter()
      .map(|job| {
        let title = job.title(&state.registry.display_name(&job.modified_app_id));
        JobView { job, title }
      })
      .collect();

    Ok(RunResponse {
      run_key: run.key.to_string(),
      run,
      jobs,
    })
  }
}

/// Creates the run, then drives it in the background; the response carries
/// the allocated run number so the caller can poll and tail logs.
async fn respond_scheduled(state: &AppState, run: WorkflowRun) -> Result<Response, ApiError> {
  let orchestrator = state.orchestrator.clone();
  let key = run.key.clone();
  tokio::spawn(async move {
    if let Err(err) = orchestrator.schedule(&key).await {
      log::error!("Failed to schedule run {}: {}", key, err);
    }
  });

  let body = RunResponse::load(state, run).await?;

  Ok((StatusCode::ACCEPTED, Json(body)).into_response())
}

async fn install_project(
  State(state): State<AppState>,
  Extension(project_id): Extension<ProjectId>,
  body: Option<Json<CreateRunRequest>>,
) -> Result<Response, ApiError> {
  let request = body.map(|Json(request)| request).unwrap_or_default();
  let run = state
    .orchestrator
    .create_deploy_run(&project_id, None, request.into_params(&project_id))
    .await?;

  respond_scheduled(&state, run).await
}

async fn install_app(
  State(state): State<AppState>,
  Extension(project_id): Extension<ProjectId>,
  Path(app_id): Path<String>,
  body: Option<Json<CreateRunRequest>>,
) -> Result<Response, ApiError> {
  let request = body.map(|Json(request)| request).unwrap_or_default();
  let run = state
    .orchestrator
    .create_deploy_run(
      &project_id,
      Some(AppId::new(app_id)),
      request.into_params(&project_id),
    )
    .await?;

  respond_scheduled(&state, run).await
}

async fn uninstall_project(
  State(state): State<AppState>,
  Extension(project_id): Extension<ProjectId>,
  Query(query): Query<UninstallQuery>,
  body: Option<Json<CreateRunRequest>>,
) -> Result<Response, ApiError> {
  let request = body.map(|Json(request)| request).unwrap_or_default();
  let run = state
    .orchestrator
    .create_destroy_run(
      &project_id,
      None,
      query.keep_common.unwrap_or(false),
      request.into_params(&project_id),
    )
    .await?;

  respond_scheduled(&state, run).await
}

async fn uninstall_app(
  State(state): State<AppState>,
  Extension(project_id): Extension<ProjectId>,
  Path(app_id): Path<String>,
  Query(query): Query<UninstallQuery>,
  body: Option<Json<CreateRunRequest>>,
) -> Result<Response, ApiError> {
  let request = body.map(|Json(request)| request).unwrap_or_default();
  let run = state
    .orchestrator
    .create_destroy_run(
      &project_id,
      Some(AppId::new(app_id)),
      query.keep_common.unwrap_or(false),
      request.into_params(&project_id),
    )
    .await?;

  respond_scheduled(&state, run).await
}

async fn list_runs(
  State(state): State<AppState>,
  Extension(project_id): Extension<ProjectId>,
  Path(workflow_type): Path<String>,
  Query(query): Query<RunsQuery>,
) -> Result<Json<Vec<RunResponse>>, ApiError> {
  let workflow_type = WorkflowType::try_from(workflow_type.as_str())?;
  let app_id = query.app_id.map(AppId::new);

  let runs = state
    .orchestrator
    .database()
    .runs()
    .list(&project_id, Some(workflow_type), app_id.as_ref())
    .await?;

  let mut out = Vec::with_capacity(runs.len());
  for run in runs {
    out.push(RunResponse::load(&state, run).await?);
  }

  Ok(Json(out))
}

/// Resolves `latest` or a literal run number within the partition.
async fn resolve_run(
  state: &AppState,
  project_id: &ProjectId,
  workflow_type: WorkflowType,
  app_id: Option<AppId>,
  run_number: &str,
) -> Result<WorkflowRun, ApiError> {
  let runs = state.orchestrator.database().runs();

  if run_number == "latest" {
    return runs
      .latest(project_id, workflow_type, app_id.as_ref())
      .await?
      .ok_or_else(|| {
        ApiError::Core(stackrun::Error::not_found(format!(
          "No {} runs for project {}",
          workflow_type, project_id
        )))
      });
  }

  let run_number: u32 = run_number.parse().map_err(|_| {
    ApiError::Core(stackrun::Error::precondition(
      "Run number must be a number or 'latest'",
    ))
  })?;

  let key = RunKey::new(project_id.clone(), workflow_type, app_id, run_number);
  Ok(runs.get(&key).await?)
}

async fn get_run(
  State(state): State<AppState>,
  Extension(project_id): Extension<ProjectId>,
  Path((workflow_type, run_number)): Path<(String, String)>,
  Query(query): Query<RunsQuery>,
) -> Result<Json<RunResponse>, ApiError> {
  let workflow_type = WorkflowType::try_from(workflow_type.as_str())?;
  let app_id = query.app_id.map(AppId::new);

  let run = resolve_run(&state, &project_id, workflow_type, app_id, &run_number).await?;

  Ok(Json(RunResponse::load(&state, run).await?))
}

async fn job_logs(
  State(state): State<AppState>,
  Extension(project_id): Extension<ProjectId>,
  Path((workflow_type, run_number, job_number)): Path<(String, String, u32)>,
  Query(query): Query<RunsQuery>,
  headers: HeaderMap,
) -> Result<Response, ApiError> {
  let workflow_type = WorkflowType::try_from(workflow_type.as_str())?;
  let app_id = query.app_id.map(AppId::new);

  let run = resolve_run(&state, &project_id, workflow_type, app_id, &run_number).await?;
  let key = JobKey {
    run: run.key.clone(),
    job_number,
  };
  let job = state.orchestrator.database().jobs().get(&key).await?;

  let tailer = state.log_store.tail(
    &project_id,
    &run.key,
    &job_log_name(&job.modified_app_id),
  );

  let wants_sse = headers
    .get(header::ACCEPT)
    .and_then(|value| value.to_str().ok())
    .map(|value| value.contains("text/event-stream"))
    .unwrap_or(false);

  if wants_sse {
    let stream = tailer
      .map(|line| Ok::<_, Infallible>(Event::default().event("log-line").data(line)))
      .chain(tokio_stream::once(Ok(
        Event::default().event("done").data("")
      )));

    return Ok(Sse::new(stream).into_response());
  }

  let stream = tailer.map(|line| Ok::<_, Infallible>(format!("{}\n", line)));

  Ok(
    (
      StatusCode::OK,
      [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
      Body::from_stream(stream),
    )
      .into_response(),
  )
}
