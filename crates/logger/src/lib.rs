use colored::Colorize;
use log::Level;
use std::sync::OnceLock;

#[derive(Clone)]
pub struct Logger {
  max_level: Level,
}

impl log::Log for Logger {
  fn enabled(&self, metadata: &log::Metadata) -> bool {
    metadata.level() <= self.max_level
  }

  fn log(&self, record: &log::Record) {
    if !self.enabled(record.metadata()) {
      return;
    }

    let time = chrono::Local::now()
      .format("%Y-%m-%d %H:%M:%S")
      .to_string()
      .magenta();

    let level = match record.level() {
      Level::Error => "ERROR".red(),
      Level::Warn => "WARN".yellow(),
      Level::Info => "INFO".green(),
      Level::Debug => "DEBUG".green(),
      Level::Trace => "TRACE".green(),
    };

    let prefix = match (record.file(), record.line()) {
      (Some(file), Some(line)) => format!("{}:{} ", file, line).cyan(),
      _ => String::new().black(),
    };

    println!("{}{} {} {}", prefix, time, level, record.args());
  }

  fn flush(&self) {}
}

static LOGGER: OnceLock<Logger> = OnceLock::new();

/// Level comes from `STACKRUN_LOG`, defaulting to info.
pub fn init_logger() {
  let logger = LOGGER.get_or_init(|| {
    let max_level = std::env::var("STACKRUN_LOG")
      .ok()
      .and_then(|value| value.parse().ok())
      .unwrap_or(Level::Info);

    Logger { max_level }
  });

  if log::set_logger(logger).is_ok() {
    log::set_max_level(logger.max_level.to_level_filter());
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_init_is_idempotent() {
    init_logger();
    init_logger();
    log::info!("logger initialized");
  }
}
