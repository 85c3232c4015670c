use crate::command::Command;
use async_trait::async_trait;
use stackrun::{Engine, EngineOutput, Error, OnOutput, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const RESOURCES_FILE: &str = "resources.yaml";
const POLICY_FILE: &str = "deployment_permissions_policy.json";
const CONSTRAINTS_FILE: &str = "constraints.json";
const LIVE_STATE_FILE: &str = "live_state.yaml";

/// Drives the constraint-solving engine binary.
///
/// Exit code contract: 0 on success with `resources.yaml` (and optionally a
/// permissions policy) written next to the constraints, 2 when the user's
/// configuration is invalid with a JSON list of errors on stdout, anything
/// else is an engine failure.
pub struct EngineCli {
  binary: PathBuf,
}

impl EngineCli {
  pub fn new(binary: impl Into<PathBuf>) -> Self {
    EngineCli {
      binary: binary.into(),
    }
  }

  fn quiet() -> OnOutput {
    Arc::new(|line: &str| log::debug!("engine: {}", line))
  }
}

#[async_trait]
impl Engine for EngineCli {
  async fn run(
    &self,
    constraints: &serde_json::Value,
    input_graph: Option<&str>,
    working_dir: &Path,
  ) -> Result<EngineOutput> {
    let constraints_path = working_dir.join(CONSTRAINTS_FILE);
    std::fs::write(
      &constraints_path,
      serde_json::to_vec_pretty(constraints)
        .map_err(|err| Error::internal(format!("Failed to encode constraints: {}", err)))?,
    )?;

    let mut cmd = Command::new(&self.binary);
    cmd
      .arg("build")
      .arg("--constraints")
      .arg(CONSTRAINTS_FILE)
      .dir(working_dir);

    if let Some(graph) = input_graph {
      std::fs::write(working_dir.join(LIVE_STATE_FILE), graph)?;
      cmd.arg("--import").arg(LIVE_STATE_FILE);
    }

    let output = cmd.stream(Self::quiet()).await?;

    match output.exit_code {
      0 => {
        let resources_path = working_dir.join(RESOURCES_FILE);
        if !resources_path.exists() {
          return Err(Error::tool_failure(
            "Engine reported success but produced no resources.yaml",
          ));
        }
        let resources_yaml = std::fs::read_to_string(resources_path)?;

        let policy_path = working_dir.join(POLICY_FILE);
        let policy = if policy_path.exists() {
          let bytes = std::fs::read(policy_path)?;
          Some(serde_json::from_slice(&bytes).map_err(|err| {
            Error::tool_failure(format!("Engine wrote an unreadable policy: {}", err))
          })?)
        } else {
          None
        };

        Ok(EngineOutput {
          resources_yaml,
          policy,
          config_errors: vec![],
        })
      }
      2 => {
        let config_errors = serde_json::from_str(&output.stdout).map_err(|err| {
          Error::tool_failure(format!("Engine wrote unreadable config errors: {}", err))
        })?;

        Ok(EngineOutput {
          resources_yaml: String::new(),
          policy: None,
          config_errors,
        })
      }
      code => Err(Error::tool_failure(format!(
        "Engine exited with code {}: {}",
        code,
        output.stderr.trim()
      ))),
    }
  }

  async fn get_live_state(
    &self,
    state: &serde_json::Value,
    working_dir: &Path,
  ) -> Result<String> {
    let state_path = working_dir.join("state.json");
    std::fs::write(
      &state_path,
      serde_json::to_vec(state)
        .map_err(|err| Error::internal(format!("Failed to encode state: {}", err)))?,
    )?;

    let output = Command::new(&self.binary)
      .arg("live-state")
      .arg("state.json")
      .dir(working_dir)
      .stream(Self::quiet())
      .await?;

    if !output.success() {
      return Err(Error::tool_failure(format!(
        "Engine live-state exited with code {}: {}",
        output.exit_code,
        output.stderr.trim()
      )));
    }

    Ok(output.stdout)
  }

  async fn export_iac(
    &self,
    resources_yaml: &str,
    app_name: &str,
    working_dir: &Path,
  ) -> Result<()> {
    std::fs::create_dir_all(working_dir)?;
    std::fs::write(working_dir.join(RESOURCES_FILE), resources_yaml)?;

    let output = Command::new(&self.binary)
      .arg("export")
      .arg("--app")
      .arg(app_name)
      .arg("--resources")
      .arg(RESOURCES_FILE)
      .dir(working_dir)
      .stream(Self::quiet())
      .await?;

    if !output.success() {
      return Err(Error::tool_failure(format!(
        "Engine export exited with code {}: {}",
        output.exit_code,
        output.stderr.trim()
      )));
    }

    Ok(())
  }
}
