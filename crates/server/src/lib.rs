//! HTTP surface over the workflow engine.
//!
//! Every route is scoped to the project resolved from the caller's bearer
//! token; run and job numbers are the only identifiers callers supply.

mod auth;
mod error;
mod routes;

pub use auth::{Authenticator, StaticTokens};
pub use error::ApiError;
pub use routes::{router, CreateRunRequest, JobView, RunResponse};

use stackrun::{LogStore, Orchestrator, StackPackRegistry};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
  pub orchestrator: Arc<Orchestrator>,
  pub log_store: LogStore,
  pub registry: Arc<dyn StackPackRegistry>,
  pub authenticator: Arc<dyn Authenticator>,
}
