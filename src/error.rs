//! Errors surfaced by the HTTP / WebSocket layer.

use axum::{http::StatusCode, response::IntoResponse, Json};

use crate::protocol::ErrorOut;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
  /// No usable credential: the client must select one before playing.
  #[error("a content generator credential must be selected first")]
  CredentialNeeded,
  #[error("topic must be 1-64 characters")]
  InvalidTopic,
  #[error("unknown session")]
  SessionNotFound,
}

impl ApiError {
  pub fn code(&self) -> &'static str {
    match self {
      ApiError::CredentialNeeded => "credential_needed",
      ApiError::InvalidTopic => "invalid_topic",
      ApiError::SessionNotFound => "session_not_found",
    }
  }

  pub fn status(&self) -> StatusCode {
    match self {
      ApiError::CredentialNeeded => StatusCode::PRECONDITION_FAILED,
      ApiError::InvalidTopic => StatusCode::BAD_REQUEST,
      ApiError::SessionNotFound => StatusCode::NOT_FOUND,
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> axum::response::Response {
    let body = ErrorOut { error: self.code().into(), message: self.to_string() };
    (self.status(), Json(body)).into_response()
  }
}
