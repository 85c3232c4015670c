use async_trait::async_trait;
use stackrun::ProjectId;
use std::collections::HashMap;

/// Maps a bearer token to the project it may act on.
#[async_trait]
pub trait Authenticator: Send + Sync {
  async fn authenticate(&self, token: &str) -> Option<ProjectId>;
}

/// Token table from configuration. `STACKRUN_API_TOKENS` holds
/// comma-separated `token=project_id` pairs.
pub struct StaticTokens {
  tokens: HashMap<String, ProjectId>,
}

impl StaticTokens {
  pub fn new(tokens: HashMap<String, ProjectId>) -> Self {
    StaticTokens { tokens }
  }

  pub fn from_env() -> Self {
    let tokens = std::env::var("STACKRUN_API_TOKENS")
      .unwrap_or_default()
      .split(',')
      .filter_map(|pair| {
        let (token, project_id) = pair.split_once('=')?;
        if token.is_empty() || project_id.is_empty() {
          return None;
        }
        Some((token.to_string(), ProjectId::new(project_id)))
      })
      .collect();

    StaticTokens { tokens }
  }
}

#[async_trait]
impl Authenticator for StaticTokens {
  async fn authenticate(&self, token: &str) -> Option<ProjectId> {
    self.tokens.get(token).cloned()
  }
}
