use serde::Deserialize;
use stackrun::{AppId, Error, Result, StackPack, StackPackRegistry};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const MANIFEST_FILE: &str = "pack.json";
const FILES_DIR: &str = "files";

#[derive(Deserialize)]
struct PackManifest {
  display_name: String,
  #[serde(default)]
  outputs: Vec<String>,
  /// Constraint template the app's configuration is merged into.
  #[serde(default)]
  constraints: serde_json::Map<String, serde_json::Value>,
}

/// A stack pack loaded from a directory: a `pack.json` manifest plus an
/// optional `files/` tree copied into every job's working directory.
struct DirStackPack {
  manifest: PackManifest,
  files_dir: Option<PathBuf>,
}

impl StackPack for DirStackPack {
  fn display_name(&self) -> &str {
    &self.manifest.display_name
  }

  fn declared_outputs(&self) -> Vec<String> {
    self.manifest.outputs.clone()
  }

  fn to_constraints(
    &self,
    configuration: &serde_json::Map<String, serde_json::Value>,
    region: &str,
  ) -> serde_json::Value {
    let mut constraints = self.manifest.constraints.clone();
    constraints.insert(
      "configuration".to_string(),
      serde_json::Value::Object(configuration.clone()),
    );
    constraints.insert(
      "region".to_string(),
      serde_json::Value::String(region.to_string()),
    );

    serde_json::Value::Object(constraints)
  }

  fn copy_files(
    &self,
    _configuration: &serde_json::Map<String, serde_json::Value>,
    working_dir: &Path,
  ) -> Result<()> {
    match &self.files_dir {
      Some(files_dir) => copy_tree(files_dir, working_dir),
      None => Ok(()),
    }
  }
}

fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
  std::fs::create_dir_all(dst)?;

  for entry in std::fs::read_dir(src)? {
    let entry = entry?;
    let target = dst.join(entry.file_name());

    if entry.file_type()?.is_dir() {
      copy_tree(&entry.path(), &target)?;
    } else {
      std::fs::copy(entry.path(), target)?;
    }
  }

  Ok(())
}

/// Registry over a directory of packs, one subdirectory per app id. Loaded
/// once at startup.
pub struct DirStackPackRegistry {
  packs: HashMap<AppId, Arc<dyn StackPack>>,
}

impl DirStackPackRegistry {
  pub fn load(root: &Path) -> Result<Self> {
    let mut packs: HashMap<AppId, Arc<dyn StackPack>> = HashMap::new();

    for entry in std::fs::read_dir(root)? {
      let entry = entry?;
      if !entry.file_type()?.is_dir() {
        continue;
      }

      let app_id = AppId::new(entry.file_name().to_string_lossy());
      let manifest_path = entry.path().join(MANIFEST_FILE);
      let bytes = std::fs::read(&manifest_path).map_err(|err| {
        Error::config_error(format!(
          "Unreadable pack manifest {}: {}",
          manifest_path.display(),
          err
        ))
      })?;
      let manifest: PackManifest = serde_json::from_slice(&bytes).map_err(|err| {
        Error::config_error(format!(
          "Invalid pack manifest {}: {}",
          manifest_path.display(),
          err
        ))
      })?;

      let files_dir = entry.path().join(FILES_DIR);
      packs.insert(
        app_id,
        Arc::new(DirStackPack {
          manifest,
          files_dir: files_dir.is_dir().then_some(files_dir),
        }),
      );
    }

    log::info!("Loaded {} stack packs from {}", packs.len(), root.display());

    Ok(DirStackPackRegistry { packs })
  }
}

impl StackPackRegistry for DirStackPackRegistry {
  fn get_stack_packs(&self) -> HashMap<AppId, Arc<dyn StackPack>> {
    self.packs.clone()
  }
}
