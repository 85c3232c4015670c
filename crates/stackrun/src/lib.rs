//! Durable deploy/destroy workflow engine.
//!
//! Stackrun models a user's cloud project as a set of versioned app
//! deployments and drives install/uninstall operations as persisted
//! workflow runs: a run owns numbered jobs with dependency edges, jobs are
//! executed by task runners that stream logs to an append-only log store,
//! and the run's terminal status is reconciled from its jobs' outcomes.

mod backend;
mod collaborators;
mod config;
mod error;
mod logs;
mod orchestrator;
mod project;
mod store;
mod types;
pub mod workflow;

pub use backend::{execution_name, ExecutionBackend, InProcessBackend, StateMachineBackend};
pub use collaborators::{
  DeployHook, DeploymentNotice, Engine, EngineOutput, IacStore, IacTool, JobRunner, LogNotifier,
  Notifier, OnOutput, StackConfig, StackPack, StackPackRegistry, StateMachineClient,
};
pub use config::{Config, KeepTmp};
pub use error::Error;
pub use logs::{
  job_log_name, LogStore, LogTailer, LogWatcher, LogWriter, APPEARANCE_TIMEOUT,
  INACTIVITY_TIMEOUT, LOG_SENTINEL,
};
pub use orchestrator::{CreateRun, Orchestrator};
pub use project::{AppDeployment, Project};
pub use store::{
  Database, Deployments, FileStore, Jobs, MemoryStore, Projects, Runs, Store, MAX_VERSIONS,
};
pub use types::{AppId, JobKey, JobStatus, ProjectId, RunKey, WorkflowType, COMMON_APP};
pub use workflow::{RunDag, WorkflowJob, WorkflowRun};

pub type Result<T> = std::result::Result<T, Error>;
