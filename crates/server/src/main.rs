use stackrun::{
  Config, Database, FileStore, InProcessBackend, LogNotifier, LogStore, LogWatcher, MemoryStore,
  Orchestrator, Store,
};
use stackrun_runner::{DirStackPackRegistry, EngineCli, FsIacStore, PulumiCli, TaskRunner};
use stackrun_server::{router, AppState, StaticTokens};
use std::path::PathBuf;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  dotenv::dotenv().ok();
  stackrun_logger::init_logger();

  let config = Config::from_env();

  let store: Arc<dyn Store> = match &config.store_dir {
    Some(dir) => Arc::new(FileStore::open(dir)?),
    None => {
      log::warn!("STACKRUN_STORE_DIR not set, using an in-memory store");
      Arc::new(MemoryStore::new())
    }
  };
  let db = Database::new(store);

  let log_store = LogStore::new(config.log_dir.clone(), LogWatcher::spawn());

  let packs_dir = std::env::var("STACK_PACKS_DIR").unwrap_or_else(|_| "stack_packs".to_string());
  let registry = Arc::new(DirStackPackRegistry::load(&PathBuf::from(packs_dir))?);

  let engine_bin =
    std::env::var("ENGINE_BIN").unwrap_or_else(|_| "stackrun-engine".to_string());
  let iac_store_dir =
    std::env::var("IAC_STORE_DIR").unwrap_or_else(|_| "iac_bundles".to_string());

  let mut runner = TaskRunner::builder()
    .db(db.clone())
    .log_store(log_store.clone())
    .engine(Arc::new(EngineCli::new(engine_bin)))
    .iac_tool(Arc::new(PulumiCli::new()))
    .iac_store(Arc::new(FsIacStore::new(iac_store_dir)))
    .registry(registry.clone())
    .keep_tmp(config.keep_tmp.clone());
  if let Some(bucket) = &config.state_bucket {
    runner = runner.state_bucket(bucket.clone());
  }
  let runner = Arc::new(runner.build()?);

  if config.deploy_state_machine_arn.is_some() || config.destroy_state_machine_arn.is_some() {
    log::warn!("Step function ARNs are set but this binary schedules runs in process");
  }

  let backend = Arc::new(InProcessBackend::new(db.clone(), runner, config.workers));
  let orchestrator = Arc::new(Orchestrator::new(
    db,
    registry.clone(),
    Arc::new(LogNotifier),
    backend.clone(),
    backend,
  ));

  let state = AppState {
    orchestrator,
    log_store,
    registry,
    authenticator: Arc::new(StaticTokens::from_env()),
  };

  let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
  log::info!("Listening on port {}", config.port);

  axum::serve(listener, router(state)).await?;

  Ok(())
}
