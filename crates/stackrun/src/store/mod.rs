mod file;
mod memory;
mod repository;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use repository::{Database, Deployments, Jobs, Projects, Runs, MAX_VERSIONS};

use crate::Result;
use async_trait::async_trait;

/// Key/value persistence with the conditional-write primitive the
/// monotonic-numbering scheme relies on.
///
/// Rows are serialized JSON; composite keys are formatted here and nowhere
/// else. `scan_prefix` returns entries in key order.
#[async_trait]
pub trait Store: Send + Sync {
  async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

  async fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;

  /// Fails with `Error::Conflict` if the key already exists.
  async fn put_if_absent(&self, key: &str, value: Vec<u8>) -> Result<()>;

  async fn delete(&self, key: &str) -> Result<()>;

  async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>>;
}
