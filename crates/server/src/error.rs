use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use stackrun::Error;

/// Errors crossing the HTTP boundary.
#[derive(Debug)]
pub enum ApiError {
  Unauthorized,
  Core(Error),
}

impl From<Error> for ApiError {
  fn from(err: Error) -> Self {
    ApiError::Core(err)
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let (status, message) = match self {
      ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
      ApiError::Core(err) => match &err {
        Error::Precondition(message) | Error::ConfigError(message) => {
          (StatusCode::BAD_REQUEST, message.clone())
        }
        Error::NotFound(message) => (StatusCode::NOT_FOUND, message.clone()),
        Error::Conflict(message) => (StatusCode::CONFLICT, message.clone()),
        _ => {
          // opaque to the caller, traceable in our logs
          let correlation_id = uuid::Uuid::new_v4();
          log::error!("Internal error {}: {}", correlation_id, err);
          (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Internal server error ({})", correlation_id),
          )
        }
      },
    };

    (status, Json(serde_json::json!({ "error": message }))).into_response()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_status_mapping() {
    let cases = [
      (ApiError::Unauthorized, StatusCode::UNAUTHORIZED),
      (
        ApiError::Core(Error::precondition("Tear down in progress")),
        StatusCode::BAD_REQUEST,
      ),
      (
        ApiError::Core(Error::not_found("missing")),
        StatusCode::NOT_FOUND,
      ),
      (
        ApiError::Core(Error::conflict("busy")),
        StatusCode::CONFLICT,
      ),
      (
        ApiError::Core(Error::internal("boom")),
        StatusCode::INTERNAL_SERVER_ERROR,
      ),
    ];

    for (err, expected) in cases {
      assert_eq!(err.into_response().status(), expected);
    }
  }
}
