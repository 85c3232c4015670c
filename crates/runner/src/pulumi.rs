use crate::command::{Command, CommandOutput};
use async_trait::async_trait;
use stackrun::{Error, IacTool, OnOutput, Result, StackConfig};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Drives the `pulumi` CLI against a self-managed state backend.
pub struct PulumiCli {
  binary: String,
  /// Passphrase for the stack secrets provider; empty disables encryption
  /// prompts on non-interactive hosts.
  passphrase: String,
}

impl PulumiCli {
  pub fn new() -> Self {
    PulumiCli {
      binary: "pulumi".to_string(),
      passphrase: std::env::var("PULUMI_CONFIG_PASSPHRASE").unwrap_or_default(),
    }
  }

  fn command(&self, working_dir: &Path) -> Command {
    let mut cmd = Command::new(&self.binary);
    cmd
      .dir(working_dir)
      .env("PULUMI_SKIP_UPDATE_CHECK", "true")
      .env("PULUMI_CONFIG_PASSPHRASE", self.passphrase.clone());

    cmd
  }

  fn quiet() -> OnOutput {
    Arc::new(|line: &str| log::debug!("pulumi: {}", line))
  }

  async fn checked(
    &self,
    mut cmd: Command,
    what: &str,
    on_output: OnOutput,
  ) -> Result<CommandOutput> {
    let output = cmd.stream(on_output).await?;
    if !output.success() {
      return Err(Error::tool_failure(format!(
        "pulumi {} exited with code {}: {}",
        what,
        output.exit_code,
        output.stderr.trim()
      )));
    }

    Ok(output)
  }
}

impl Default for PulumiCli {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait]
impl IacTool for PulumiCli {
  async fn select_or_create_stack(
    &self,
    stack_name: &str,
    working_dir: &Path,
    config: &StackConfig,
  ) -> Result<()> {
    if let Some(bucket) = &config.state_bucket {
      let mut login = self.command(working_dir);
      login.arg("login").arg(format!("s3://{}", bucket));
      self.checked(login, "login", Self::quiet()).await?;
    }

    let mut select = self.command(working_dir);
    select.args(["stack", "select", "--create", stack_name]);
    self.checked(select, "stack select", Self::quiet()).await?;

    let mut region = self.command(working_dir);
    region.args(["config", "set", "aws:region"]).arg(&config.region);
    self.checked(region, "config set", Self::quiet()).await?;

    if let Some(role_arn) = &config.assumed_role_arn {
      let mut role = self.command(working_dir);
      role
        .args(["config", "set", "--path", "aws:assumeRole.roleArn"])
        .arg(role_arn);
      self.checked(role, "config set", Self::quiet()).await?;
    }

    for (key, value) in &config.secrets {
      let mut secret = self.command(working_dir);
      secret.args(["config", "set", "--secret"]).arg(key).arg(value);
      self.checked(secret, "config set", Self::quiet()).await?;
    }

    Ok(())
  }

  async fn refresh(&self, working_dir: &Path, on_output: OnOutput) -> Result<()> {
    let mut cmd = self.command(working_dir);
    cmd.args(["refresh", "--yes", "--non-interactive"]);
    self.checked(cmd, "refresh", on_output).await?;

    Ok(())
  }

  async fn preview(&self, working_dir: &Path, on_output: OnOutput) -> Result<()> {
    let mut cmd = self.command(working_dir);
    cmd.args(["preview", "--non-interactive"]);
    self.checked(cmd, "preview", on_output).await?;

    Ok(())
  }

  async fn up(&self, working_dir: &Path, on_output: OnOutput) -> Result<()> {
    let mut cmd = self.command(working_dir);
    cmd.args(["up", "--yes", "--non-interactive"]);
    self.checked(cmd, "up", on_output).await?;

    Ok(())
  }

  async fn destroy(&self, working_dir: &Path, on_output: OnOutput) -> Result<()> {
    let mut cmd = self.command(working_dir);
    cmd.args(["destroy", "--yes", "--non-interactive"]);
    self.checked(cmd, "destroy", on_output).await?;

    Ok(())
  }

  async fn remove_stack(&self, working_dir: &Path) -> Result<()> {
    let mut cmd = self.command(working_dir);
    cmd.args(["stack", "rm", "--yes"]);
    self.checked(cmd, "stack rm", Self::quiet()).await?;

    Ok(())
  }

  async fn get_outputs(&self, working_dir: &Path) -> Result<HashMap<String, String>> {
    let mut cmd = self.command(working_dir);
    cmd.args(["stack", "output", "--json"]);
    let output = self.checked(cmd, "stack output", Self::quiet()).await?;

    let raw: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&output.stdout)
      .map_err(|err| Error::tool_failure(format!("Unreadable stack outputs: {}", err)))?;

    Ok(
      raw
        .into_iter()
        .map(|(key, value)| {
          let rendered = match value {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
          };
          (key, rendered)
        })
        .collect(),
    )
  }
}
