use serde::{Deserialize, Serialize};

/// Reserved app id for the base stack shared by every user app in a project.
pub const COMMON_APP: &str = "common";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Hash, Eq, Default, PartialOrd, Ord)]
pub struct ProjectId(String);

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Hash, Eq, Default, PartialOrd, Ord)]
pub struct AppId(String);

impl ProjectId {
  pub fn new(id: impl Into<String>) -> Self {
    ProjectId(id.into())
  }

  pub fn inner(&self) -> &str {
    &self.0
  }
}

impl AppId {
  pub fn new(id: impl Into<String>) -> Self {
    AppId(id.into())
  }

  pub fn common() -> Self {
    AppId(COMMON_APP.to_string())
  }

  pub fn is_common(&self) -> bool {
    self.0 == COMMON_APP
  }

  pub fn inner(&self) -> &str {
    &self.0
  }
}

impl std::fmt::Display for ProjectId {
  fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl std::fmt::Display for AppId {
  fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl From<&str> for ProjectId {
  fn from(value: &str) -> Self {
    ProjectId(value.to_string())
  }
}

impl From<&str> for AppId {
  fn from(value: &str) -> Self {
    AppId(value.to_string())
  }
}
