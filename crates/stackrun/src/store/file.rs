use super::Store;
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// File-backed store: a single JSON snapshot rewritten atomically on every
/// mutation (write to a sibling temp file, then rename). Good enough for a
/// single writer process; the conditional-put contract is enforced under
/// the in-process lock.
pub struct FileStore {
  path: PathBuf,
  rows: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl FileStore {
  pub fn open(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref().to_path_buf();

    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent)?;
    }

    let rows = if path.exists() {
      let bytes = fs::read(&path)?;
      serde_json::from_slice(&bytes)
        .map_err(|err| Error::internal(format!("Corrupt store snapshot: {}", err)))?
    } else {
      BTreeMap::new()
    };

    Ok(FileStore {
      path,
      rows: Mutex::new(rows),
    })
  }

  fn persist(&self, rows: &BTreeMap<String, Vec<u8>>) -> Result<()> {
    let bytes = serde_json::to_vec(rows)
      .map_err(|err| Error::internal(format!("Failed to serialize store snapshot: {}", err)))?;

    let tmp = self.path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, &self.path)?;

    Ok(())
  }
}

#[async_trait]
impl Store for FileStore {
  async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
    Ok(self.rows.lock().get(key).cloned())
  }

  async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
    let mut rows = self.rows.lock();
    rows.insert(key.to_string(), value);
    self.persist(&rows)
  }

  async fn put_if_absent(&self, key: &str, value: Vec<u8>) -> Result<()> {
    let mut rows = self.rows.lock();
    if rows.contains_key(key) {
      return Err(Error::conflict(format!("Row already exists: {}", key)));
    }
    rows.insert(key.to_string(), value);
    self.persist(&rows)
  }

  async fn delete(&self, key: &str) -> Result<()> {
    let mut rows = self.rows.lock();
    rows.remove(key);
    self.persist(&rows)
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

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_rows_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");

    {
      let store = FileStore::open(&path).unwrap();
      store.put("a", b"hello".to_vec()).await.unwrap();
      store.put_if_absent("b", b"world".to_vec()).await.unwrap();
    }

    let store = FileStore::open(&path).unwrap();
    assert_eq!(store.get("a").await.unwrap(), Some(b"hello".to_vec()));

    let err = store.put_if_absent("b", vec![]).await.unwrap_err();
    assert!(err.is_conflict());
  }
}
