use stackrun::{Error, OnOutput, Result};
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command as Cmd;

/// Captured result of a finished subprocess.
#[derive(Debug, Clone)]
pub struct CommandOutput {
  pub exit_code: i32,
  pub stdout: String,
  pub stderr: String,
}

impl CommandOutput {
  pub fn success(&self) -> bool {
    self.exit_code == 0
  }
}

/// Thin wrapper around `tokio::process::Command` that streams both output
/// pipes line by line while also accumulating them.
pub struct Command {
  command: Cmd,
}

impl Command {
  pub fn new(program: impl AsRef<std::ffi::OsStr>) -> Self {
    Command {
      command: Cmd::new(program),
    }
  }

  pub fn arg<S>(&mut self, arg: S) -> &mut Self
  where
    S: AsRef<std::ffi::OsStr>,
  {
    self.command.arg(arg);

    self
  }

  pub fn args<I, S>(&mut self, args: I) -> &mut Self
  where
    I: IntoIterator<Item = S>,
    S: AsRef<std::ffi::OsStr>,
  {
    self.command.args(args);

    self
  }

  pub fn env(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
    self.command.env(key.into(), value.into());

    self
  }

  pub fn dir(&mut self, dir: &Path) -> &mut Self {
    self.command.current_dir(dir);

    self
  }

  /// Runs the command to completion, passing every stdout/stderr line to
  /// `on_output` as it appears.
  pub async fn stream(&mut self, on_output: OnOutput) -> Result<CommandOutput> {
    let mut child = self
      .command
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .spawn()
      .map_err(|err| Error::tool_failure(format!("Failed to spawn child process: {}", err)))?;

    let out = child
      .stdout
      .take()
      .ok_or_else(|| Error::tool_failure("Failed to get stdout from child process"))?;
    let err = child
      .stderr
      .take()
      .ok_or_else(|| Error::tool_failure("Failed to get stderr from child process"))?;

    let mut out_lines = BufReader::new(out).lines();
    let mut err_lines = BufReader::new(err).lines();

    let mut stdout = String::new();
    let mut stderr = String::new();
    let mut out_done = false;
    let mut err_done = false;

    while !(out_done && err_done) {
      tokio::select! {
        line = out_lines.next_line(), if !out_done => {
          match line {
            Ok(Some(line)) => {
              on_output(&line);
              stdout.push_str(&line);
              stdout.push('\n');
            }
            Ok(None) => out_done = true,
            Err(err) => {
              on_output(&err.to_string());
              out_done = true;
            }
          }
        }
        line = err_lines.next_line(), if !err_done => {
          match line {
            Ok(Some(line)) => {
              on_output(&line);
              stderr.push_str(&line);
              stderr.push('\n');
            }
            Ok(None) => err_done = true,
            Err(err) => {
              on_output(&err.to_string());
              err_done = true;
            }
          }
        }
      }
    }

    let status = child
      .wait()
      .await
      .map_err(|err| Error::tool_failure(format!("Failed to wait for child process: {}", err)))?;

    Ok(CommandOutput {
      exit_code: status.code().unwrap_or(-1),
      stdout,
      stderr,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use parking_lot::Mutex;
  use std::sync::Arc;

  #[tokio::test]
  async fn test_stream_captures_lines() {
    let lines: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(vec![]));
    let sink = lines.clone();

    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg("echo hello; echo world >&2");

    let output = cmd
      .stream(Arc::new(move |line: &str| {
        sink.lock().push(line.to_string());
      }))
      .await
      .unwrap();

    assert!(output.success());
    assert_eq!(output.stdout, "hello\n");
    assert_eq!(output.stderr, "world\n");

    let mut seen = lines.lock().clone();
    seen.sort();
    assert_eq!(seen, vec!["hello", "world"]);
  }

  #[tokio::test]
  async fn test_exit_code_is_reported() {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg("exit 2");

    let output = cmd.stream(Arc::new(|_: &str| {})).await.unwrap();
    assert_eq!(output.exit_code, 2);
  }
}
