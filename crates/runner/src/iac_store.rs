use async_trait::async_trait;
use stackrun::{AppId, Error, IacStore, ProjectId, Result};
use std::path::PathBuf;

/// Filesystem-backed archive of exported IaC bundles, laid out as
/// `{root}/{project_id}/{app_id}/{version}.zip`.
pub struct FsIacStore {
  root: PathBuf,
}

impl FsIacStore {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    FsIacStore { root: root.into() }
  }

  fn bundle_path(&self, project_id: &ProjectId, app_id: &AppId, version: u32) -> PathBuf {
    self
      .root
      .join(project_id.inner())
      .join(app_id.inner())
      .join(format!("{}.zip", version))
  }
}

#[async_trait]
impl IacStore for FsIacStore {
  async fn get_iac(
    &self,
    project_id: &ProjectId,
    app_id: &AppId,
    version: u32,
  ) -> Result<Vec<u8>> {
    let path = self.bundle_path(project_id, app_id, version);

    match tokio::fs::read(&path).await {
      Ok(bytes) => Ok(bytes),
      Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(Error::not_found(format!(
        "No IaC bundle for {}/{} v{}",
        project_id, app_id, version
      ))),
      Err(err) => Err(err.into()),
    }
  }

  async fn write_iac(
    &self,
    project_id: &ProjectId,
    app_id: &AppId,
    version: u32,
    bytes: Vec<u8>,
  ) -> Result<()> {
    let path = self.bundle_path(project_id, app_id, version);
    if let Some(parent) = path.parent() {
      tokio::fs::create_dir_all(parent).await?;
    }

    tokio::fs::write(&path, bytes).await?;

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_write_then_get() {
    let root = tempfile::tempdir().unwrap();
    let store = FsIacStore::new(root.path());
    let project_id = ProjectId::new("p1");
    let app_id = AppId::new("web");

    store
      .write_iac(&project_id, &app_id, 3, b"bundle".to_vec())
      .await
      .unwrap();

    let bytes = store.get_iac(&project_id, &app_id, 3).await.unwrap();
    assert_eq!(bytes, b"bundle");
  }

  #[tokio::test]
  async fn test_missing_bundle_is_not_found() {
    let root = tempfile::tempdir().unwrap();
    let store = FsIacStore::new(root.path());

    let err = store
      .get_iac(&ProjectId::new("p1"), &AppId::new("web"), 1)
      .await
      .unwrap_err();
    assert!(err.is_not_found());
  }
}
