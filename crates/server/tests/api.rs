use axum::body::Body;
use axum::http::{header, Request, Response, StatusCode};
use http_body_util::BodyExt;
use stackrun::{
  job_log_name, AppId, Database, InProcessBackend, JobKey, JobRunner, JobStatus, LogNotifier,
  LogStore, LogWatcher, MemoryStore, Orchestrator, Project, ProjectId,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use stackrun_runner::DirStackPackRegistry;
use stackrun_server::{router, AppState, StaticTokens};
use tower::ServiceExt;

/// Runs every job straight to `Succeeded`, emitting one log line.
struct SucceedingRunner {
  db: Database,
  log_store: LogStore,
}

#[async_trait::async_trait]
impl JobRunner for SucceedingRunner {
  async fn run_job(&self, key: &JobKey) -> stackrun::Result<JobStatus> {
    let jobs = self.db.jobs();
    let mut job = jobs.get(key).await?;

    if job.status == JobStatus::New {
      job.transition(JobStatus::Pending, None)?;
    }
    job.transition(JobStatus::InProgress, None)?;

    let writer = self.log_store.writer(
      &key.run.project_id,
      &key.run,
      &job_log_name(&job.modified_app_id),
    )?;
    writer.write_line(&format!("running {}", key))?;
    writer.finish();

    job.transition(JobStatus::Succeeded, None)?;
    jobs.put(&job).await?;

    Ok(JobStatus::Succeeded)
  }
}

struct Fixture {
  state: AppState,
  db: Database,
  _log_root: tempfile::TempDir,
  _packs_root: tempfile::TempDir,
}

fn fixture() -> Fixture {
  let db = Database::new(Arc::new(MemoryStore::new()));
  let log_root = tempfile::tempdir().unwrap();
  let log_store = LogStore::new(log_root.path(), LogWatcher::spawn());

  let packs_root = tempfile::tempdir().unwrap();
  for app in ["common", "web"] {
    let dir = packs_root.path().join(app);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
      dir.join("pack.json"),
      format!(r#"{{ "display_name": "{}", "outputs": ["URL"] }}"#, app),
    )
    .unwrap();
  }
  let registry = Arc::new(DirStackPackRegistry::load(packs_root.path()).unwrap());

  let runner = Arc::new(SucceedingRunner {
    db: db.clone(),
    log_store: log_store.clone(),
  });
  let backend = Arc::new(InProcessBackend::new(db.clone(), runner, 4));
  let orchestrator = Arc::new(Orchestrator::new(
    db.clone(),
    registry.clone(),
    Arc::new(LogNotifier),
    backend.clone(),
    backend,
  ));

  let state = AppState {
    orchestrator,
    log_store,
    registry,
    authenticator: Arc::new(StaticTokens::new(HashMap::from([(
      "secret".to_string(),
      ProjectId::new("p1"),
    )]))),
  };

  Fixture {
    state,
    db,
    _log_root: log_root,
    _packs_root: packs_root,
  }
}

async fn seed_project(db: &Database, destroy_in_progress: bool) {
  let mut project = Project::new(ProjectId::new("p1"), "us-east-1");
  project.app_versions.insert(AppId::common(), 1);
  project.app_versions.insert(AppId::new("web"), 1);
  project.destroy_in_progress = destroy_in_progress;
  db.projects().put(&project).await.unwrap();
}

fn request(method: &str, uri: &str) -> Request<Body> {
  Request::builder()
    .method(method)
    .uri(uri)
    .header(header::AUTHORIZATION, "Bearer secret")
    .body(Body::empty())
    .unwrap()
}

async fn send(state: &AppState, request: Request<Body>) -> Response<Body> {
  router(state.clone()).oneshot(request).await.unwrap()
}

async fn body_json(response: Response<Body>) -> serde_json::Value {
  let bytes = response.into_body().collect().await.unwrap().to_bytes();
  serde_json::from_slice(&bytes).unwrap()
}

async fn wait_until_terminal(state: &AppState, uri: &str) -> serde_json::Value {
  for _ in 0..100 {
    let response = send(state, request("GET", uri)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;

    let status = body["run"]["status"].as_str().unwrap().to_string();
    if !matches!(status.as_str(), "new" | "pending" | "in_progress") {
      return body;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
  }
  panic!("run never reached a terminal status");
}

#[tokio::test]
async fn test_missing_or_bad_token_is_unauthorized() {
  let fixture = fixture();

  let response = send(
    &fixture.state,
    Request::builder()
      .method("GET")
      .uri("/api/project/workflows/DEPLOY/runs")
      .body(Body::empty())
      .unwrap(),
  )
  .await;
  assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

  let response = send(
    &fixture.state,
    Request::builder()
      .method("GET")
      .uri("/api/project/workflows/DEPLOY/runs")
      .header(header::AUTHORIZATION, "Bearer wrong")
      .body(Body::empty())
      .unwrap(),
  )
  .await;
  assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_install_creates_run_with_gated_jobs() {
  let fixture = fixture();
  seed_project(&fixture.db, false).await;

  let response = send(
    &fixture.state,
    request("POST", "/api/project/workflows/install"),
  )
  .await;
  assert_eq!(response.status(), StatusCode::ACCEPTED);

  let body = body_json(response).await;
  assert_eq!(body["run_key"], "p1#DEPLOY##1");

  let jobs = body["jobs"].as_array().unwrap();
  assert_eq!(jobs.len(), 2);
  assert_eq!(jobs[0]["modified_app_id"], "common");
  assert_eq!(jobs[1]["modified_app_id"], "web");
  assert_eq!(jobs[1]["dependencies"].as_array().unwrap().len(), 1);
  assert_eq!(jobs[1]["title"], "Deploy web");

  let body = wait_until_terminal(
    &fixture.state,
    "/api/project/workflows/DEPLOY/runs/latest",
  )
  .await;
  assert_eq!(body["run"]["status"], "succeeded");
  for job in body["jobs"].as_array().unwrap() {
    assert_eq!(job["status"], "succeeded");
  }
}

#[tokio::test]
async fn test_install_rejected_while_tearing_down() {
  let fixture = fixture();
  seed_project(&fixture.db, true).await;

  let response = send(
    &fixture.state,
    request("POST", "/api/project/workflows/install"),
  )
  .await;
  assert_eq!(response.status(), StatusCode::BAD_REQUEST);

  let body = body_json(response).await;
  assert_eq!(body["error"], "Tear down in progress");
}

#[tokio::test]
async fn test_unknown_run_is_not_found() {
  let fixture = fixture();
  seed_project(&fixture.db, false).await;

  let response = send(
    &fixture.state,
    request("GET", "/api/project/workflows/DEPLOY/runs/42"),
  )
  .await;
  assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_uninstall_single_app_keeps_common() {
  let fixture = fixture();
  seed_project(&fixture.db, false).await;

  let response = send(
    &fixture.state,
    request(
      "POST",
      "/api/project/apps/web/workflows/uninstall?keep_common=true",
    ),
  )
  .await;
  assert_eq!(response.status(), StatusCode::ACCEPTED);

  let body = body_json(response).await;
  assert_eq!(body["run_key"], "p1#DESTROY#web#1");
  assert_eq!(body["jobs"].as_array().unwrap().len(), 1);

  let body = wait_until_terminal(
    &fixture.state,
    "/api/project/workflows/DESTROY/runs/latest?app_id=web",
  )
  .await;
  assert_eq!(body["run"]["status"], "succeeded");

  // keep_common leaves the project open for deploys
  let project = fixture
    .db
    .projects()
    .get(&ProjectId::new("p1"))
    .await
    .unwrap();
  assert!(!project.destroy_in_progress);
}

#[tokio::test]
async fn test_job_logs_stream_to_completion() {
  let fixture = fixture();
  seed_project(&fixture.db, false).await;

  let response = send(
    &fixture.state,
    request("POST", "/api/project/workflows/install"),
  )
  .await;
  assert_eq!(response.status(), StatusCode::ACCEPTED);

  wait_until_terminal(
    &fixture.state,
    "/api/project/workflows/DEPLOY/runs/latest",
  )
  .await;

  let response = send(
    &fixture.state,
    request(
      "GET",
      "/api/project/workflows/DEPLOY/runs/1/jobs/1/logs",
    ),
  )
  .await;
  assert_eq!(response.status(), StatusCode::OK);

  let bytes = response.into_body().collect().await.unwrap().to_bytes();
  let text = String::from_utf8(bytes.to_vec()).unwrap();
  assert!(text.contains("running p1#DEPLOY##1#1"));
  assert!(!text.contains("END"));
}

#[tokio::test]
async fn test_list_runs_newest_first() {
  let fixture = fixture();
  seed_project(&fixture.db, false).await;

  for _ in 0..2 {
    let response = send(
      &fixture.state,
      request("POST", "/api/project/workflows/install"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
  }

  let response = send(
    &fixture.state,
    request("GET", "/api/project/workflows/DEPLOY/runs"),
  )
  .await;
  assert_eq!(response.status(), StatusCode::OK);

  let body = body_json(response).await;
  let keys: Vec<&str> = body
    .as_array()
    .unwrap()
    .iter()
    .map(|run| run["run_key"].as_str().unwrap())
    .collect();
  assert_eq!(keys, vec!["p1#DEPLOY##2", "p1#DEPLOY##1"]);
}
