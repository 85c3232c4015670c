use stackrun::{KeepTmp, Result};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

enum Inner {
  Temp(tempfile::TempDir),
  Kept(PathBuf),
}

/// A job's working directory. Deleted on drop unless `KEEP_TMP` asked to
/// preserve it.
pub struct Workdir {
  inner: Inner,
}

impl Workdir {
  pub fn create(keep_tmp: &KeepTmp, label: &str) -> Result<Self> {
    let label = sanitize(label);

    let inner = match keep_tmp {
      KeepTmp::Discard => {
        let dir = tempfile::Builder::new()
          .prefix(&format!("stackrun-{}-", label))
          .tempdir()?;
        Inner::Temp(dir)
      }
      KeepTmp::Keep => Inner::Kept(create_kept(&std::env::temp_dir(), &label)?),
      KeepTmp::KeepAt(root) => Inner::Kept(create_kept(root, &label)?),
    };

    if let Inner::Kept(path) = &inner {
      log::info!("Keeping working directory at {}", path.display());
    }

    Ok(Workdir { inner })
  }

  pub fn path(&self) -> &Path {
    match &self.inner {
      Inner::Temp(dir) => dir.path(),
      Inner::Kept(path) => path,
    }
  }
}

fn create_kept(root: &Path, label: &str) -> Result<PathBuf> {
  let nanos = SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_nanos())
    .unwrap_or(0);

  let path = root.join(format!("stackrun-{}-{}", label, nanos));
  std::fs::create_dir_all(&path)?;

  Ok(path)
}

fn sanitize(label: &str) -> String {
  label
    .chars()
    .map(|c| {
      if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
        c
      } else {
        '_'
      }
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_discarded_on_drop() {
    let path = {
      let workdir = Workdir::create(&KeepTmp::Discard, "p1#DEPLOY##1#1").unwrap();
      assert!(workdir.path().exists());
      workdir.path().to_path_buf()
    };

    assert!(!path.exists());
  }

  #[test]
  fn test_kept_at_survives_drop() {
    let root = tempfile::tempdir().unwrap();
    let path = {
      let workdir =
        Workdir::create(&KeepTmp::KeepAt(root.path().to_path_buf()), "job").unwrap();
      workdir.path().to_path_buf()
    };

    assert!(path.exists());
    assert!(path.starts_with(root.path()));
  }
}
