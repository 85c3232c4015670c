use clap::{Parser, Subcommand};
use stackrun::{
  Config, Database, FileStore, JobRunner, JobStatus, LogNotifier, LogStore, LogWatcher,
  MemoryStore, Orchestrator, RunKey, StackPackRegistry, Store,
};
use stackrun_runner::{DirStackPackRegistry, EngineCli, FsIacStore, PulumiCli, TaskRunner};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "stackrun", about = "Run and finalize stackrun workflow jobs")]
struct Cli {
  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Execute one job to a terminal status. Exits non-zero unless the job
  /// succeeded.
  RunJob {
    /// Run key, e.g. `p1#DEPLOY##3`
    #[arg(long)]
    run_key: String,
    #[arg(long)]
    job_number: u32,
  },
  /// Cancel jobs of a run that have not started, then settle the run.
  Abort {
    #[arg(long)]
    run_key: String,
    /// Also cancel jobs currently in progress.
    #[arg(long)]
    cancel_in_progress: bool,
  },
  /// Settle a run whose jobs have all finished.
  Finalize {
    #[arg(long)]
    run_key: String,
  },
}

fn open_database(config: &Config) -> anyhow::Result<Database> {
  let store: Arc<dyn Store> = match &config.store_dir {
    Some(dir) => Arc::new(FileStore::open(dir)?),
    None => {
      log::warn!("STACKRUN_STORE_DIR not set, using an in-memory store");
      Arc::new(MemoryStore::new())
    }
  };

  Ok(Database::new(store))
}

fn load_registry() -> anyhow::Result<Arc<dyn StackPackRegistry>> {
  let packs_dir = std::env::var("STACK_PACKS_DIR").unwrap_or_else(|_| "stack_packs".to_string());
  Ok(Arc::new(DirStackPackRegistry::load(&PathBuf::from(
    packs_dir,
  ))?))
}

fn build_task_runner(
  config: &Config,
  db: Database,
  registry: Arc<dyn StackPackRegistry>,
) -> anyhow::Result<TaskRunner> {
  let log_store = LogStore::new(config.log_dir.clone(), LogWatcher::spawn());

  let engine_bin =
    std::env::var("ENGINE_BIN").unwrap_or_else(|_| "stackrun-engine".to_string());
  let iac_store_dir =
    std::env::var("IAC_STORE_DIR").unwrap_or_else(|_| "iac_bundles".to_string());

  let mut builder = TaskRunner::builder()
    .db(db)
    .log_store(log_store)
    .engine(Arc::new(EngineCli::new(engine_bin)))
    .iac_tool(Arc::new(PulumiCli::new()))
    .iac_store(Arc::new(FsIacStore::new(iac_store_dir)))
    .registry(registry)
    .keep_tmp(config.keep_tmp.clone());
  if let Some(bucket) = &config.state_bucket {
    builder = builder.state_bucket(bucket.clone());
  }

  Ok(builder.build()?)
}

/// Orchestrator wired for reconciliation only; nothing here dispatches jobs.
fn build_orchestrator(
  db: Database,
  registry: Arc<dyn StackPackRegistry>,
) -> Orchestrator {
  struct NoDispatch;

  #[async_trait::async_trait]
  impl stackrun::ExecutionBackend for NoDispatch {
    async fn execute(&self, _run: &RunKey) -> stackrun::Result<()> {
      Err(stackrun::Error::precondition(
        "This process does not dispatch runs",
      ))
    }
  }

  let backend = Arc::new(NoDispatch);
  Orchestrator::new(db, registry, Arc::new(LogNotifier), backend.clone(), backend)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  dotenv::dotenv().ok();
  stackrun_logger::init_logger();

  let cli = Cli::parse();
  let config = Config::from_env();
  let db = open_database(&config)?;
  let registry = load_registry()?;

  match cli.command {
    Command::RunJob {
      run_key,
      job_number,
    } => {
      let run_key = RunKey::try_from(run_key.as_str())?;
      let runner = build_task_runner(&config, db, registry)?;

      let status = runner.run_job(&run_key.job_key(job_number)).await?;
      log::info!("Job {}#{} finished: {}", run_key, job_number, status);

      if status != JobStatus::Succeeded {
        std::process::exit(1);
      }
    }
    Command::Abort {
      run_key,
      cancel_in_progress,
    } => {
      let run_key = RunKey::try_from(run_key.as_str())?;
      let orchestrator = build_orchestrator(db, registry);

      orchestrator.abort(&run_key, cancel_in_progress).await?;
      let run = orchestrator.reconcile(&run_key).await?;
      log::info!("Run {} settled: {}", run_key, run.status);
    }
    Command::Finalize { run_key } => {
      let run_key = RunKey::try_from(run_key.as_str())?;
      let orchestrator = build_orchestrator(db, registry);

      let run = orchestrator.reconcile(&run_key).await?;
      log::info!("Run {} settled: {}", run_key, run.status);
    }
  }

  Ok(())
}
