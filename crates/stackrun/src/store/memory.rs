use super::Store;
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// In-memory store backend. The default for tests and single-process use.
#[derive(Default)]
pub struct MemoryStore {
  rows: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl Store for MemoryStore {
  async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
    Ok(self.rows.lock().get(key).cloned())
  }

  async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
    self.rows.lock().insert(key.to_string(), value);
    Ok(())
  }

  async fn put_if_absent(&self, key: &str, value: Vec<u8>) -> Result<()> {
    let mut rows = self.rows.lock();
    if rows.contains_key(key) {
      return Err(Error::conflict(format!("Row already exists: {}", key)));
    }
    rows.insert(key.to_string(), value);
    Ok(())
  }

  async fn delete(&self, key: &str) -> Result<()> {
    self.rows.lock().remove(key);
    Ok(())
  }

  async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
    let rows = self.rows.lock();
    Ok(
      rows
        .range(prefix.to_string()..)
        .take_while(|(key, _)| key.starts_with(prefix))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect(),
    )
  }
}
