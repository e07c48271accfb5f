use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use rankwatch_db::DbError;
use serde::Serialize;

/// API error response structure
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
  pub error: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub details: Option<String>,
}

impl ErrorResponse {
  pub fn new(error: impl Into<String>) -> Self {
    Self {
      error: error.into(),
      details: None,
    }
  }

  pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
    Self {
      error: error.into(),
      details: Some(details.into()),
    }
  }
}

/// Application error type
#[derive(Debug)]
pub enum AppError {
  DatabaseError(DbError),
  ValidationError(String),
}

impl IntoResponse for AppError {
  fn into_response(self) -> Response {
    match self {
      AppError::DatabaseError(db_err) => {
        let (status, error_response) = match &db_err {
          DbError::PlayerNotFound => (
            StatusCode::NOT_FOUND,
            ErrorResponse::new("Player not found"),
          ),
          DbError::NoCandidateFound => (
            StatusCode::NOT_FOUND,
            ErrorResponse::new("No matching player found"),
          ),
          DbError::PlayerNameConflict => (
            StatusCode::CONFLICT,
            ErrorResponse::new("A player with this name already exists"),
          ),
          DbError::AlreadyWatching | DbError::NotWatching => (
            StatusCode::CONFLICT,
            ErrorResponse::with_details("Watchlist conflict", db_err.to_string()),
          ),
          DbError::Sqlite(_) | DbError::Connection(_) => {
            // Don't expose internal database errors
            tracing::error!(?db_err, "Internal database error");
            (
              StatusCode::INTERNAL_SERVER_ERROR,
              ErrorResponse::new("An internal error occurred. Please try again later."),
            )
          }
        };

        (status, Json(error_response)).into_response()
      }
      AppError::ValidationError(msg) => {
        tracing::warn!(validation_error = %msg, "Validation failed");
        let error_response = ErrorResponse::new(msg);
        (StatusCode::BAD_REQUEST, Json(error_response)).into_response()
      }
    }
  }
}

impl From<DbError> for AppError {
  fn from(err: DbError) -> Self {
    AppError::DatabaseError(err)
  }
}

impl From<crate::validation::ValidationError> for AppError {
  fn from(err: crate::validation::ValidationError) -> Self {
    AppError::ValidationError(err.to_string())
  }
}
