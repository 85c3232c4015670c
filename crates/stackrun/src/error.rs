#[derive(thiserror::Error, Debug)]
pub enum Error {
  #[error("Conflict: {0}")]
  Conflict(String),

  #[error("Not found: {0}")]
  NotFound(String),

  #[error("Tool failure: {0}")]
  ToolFailure(String),

  #[error("Config error: {0}")]
  ConfigError(String),

  #[error("Precondition failed: {0}")]
  Precondition(String),

  #[error("Transient IO: {0}")]
  TransientIO(String),

  #[error("Internal error: {0}")]
  Internal(String),

  #[error("IO error: {0}")]
  IOError(#[from] std::io::Error),
}

impl Error {
  pub fn conflict<T: ToString>(message: T) -> Self {
    Self::Conflict(message.to_string())
  }

  pub fn not_found<T: ToString>(message: T) -> Self {
    Self::NotFound(message.to_string())
  }

  pub fn tool_failure<T: ToString>(message: T) -> Self {
    Self::ToolFailure(message.to_string())
  }

  pub fn config_error<T: ToString>(message: T) -> Self {
    Self::ConfigError(message.to_string())
  }

  pub fn precondition<T: ToString>(message: T) -> Self {
    Self::Precondition(message.to_string())
  }

  pub fn transient_io<T: ToString>(message: T) -> Self {
    Self::TransientIO(message.to_string())
  }

  pub fn internal<T: ToString>(message: T) -> Self {
    Self::Internal(message.to_string())
  }

  pub fn is_not_found(&self) -> bool {
    matches!(self, Self::NotFound(_))
  }

  pub fn is_conflict(&self) -> bool {
    matches!(self, Self::Conflict(_))
  }
}

// implement PartialEq for Error so that we can compare errors in tests
impl PartialEq for Error {
  fn eq(&self, other: &Self) -> bool {
    match (self, other) {
      (Self::Conflict(a), Self::Conflict(b)) => a == b,
      (Self::NotFound(a), Self::NotFound(b)) => a == b,
      (Self::ToolFailure(a), Self::ToolFailure(b)) => a == b,
      (Self::ConfigError(a), Self::ConfigError(b)) => a == b,
      (Self::Precondition(a), Self::Precondition(b)) => a == b,
      (Self::TransientIO(a), Self::TransientIO(b)) => a == b,
      (Self::Internal(a), Self::Internal(b)) => a == b,
      (Self::IOError(a), Self::IOError(b)) => a.kind() == b.kind(),
      _ => false,
    }
  }
}
