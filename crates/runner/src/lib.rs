//! Task runners executing deploy and destroy jobs.
//!
//! A job runs as: load the row, stream the external tools' output into the
//! job's log, archive or restore the IaC bundle, and record the terminal
//! status. The engine and IaC tool are driven as subprocesses.

mod bundle;
mod command;
mod deploy;
mod destroy;
mod engine;
mod iac_store;
mod packs;
mod pulumi;
mod task;
mod workdir;

pub use bundle::{unzip_into, zip_dir};
pub use command::{Command, CommandOutput};
pub use engine::EngineCli;
pub use iac_store::FsIacStore;
pub use packs::DirStackPackRegistry;
pub use pulumi::PulumiCli;
pub use task::{TaskRunner, TaskRunnerBuilder};
pub use workdir::Workdir;
