use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::users::repo_types::StoreError;

pub type Result<T> = std::result::Result<T, UserError>;

#[derive(Debug, Error)]
pub enum UserError {
    #[error("missing required field: {0}")]
    MissingRequiredField(&'static str),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("email already registered")]
    DuplicateEmail,

    #[error("user not found")]
    NotFound,

    #[error("store unavailable: {0}")]
    Store(#[source] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for UserError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict => UserError::DuplicateEmail,
            StoreError::Database(e) => UserError::Store(e),
        }
    }
}

impl From<JsonRejection> for UserError {
    fn from(rejection: JsonRejection) -> Self {
        UserError::InvalidRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for UserError {
    fn from(rejection: QueryRejection) -> Self {
        UserError::InvalidRequest(rejection.body_text())
    }
}

impl IntoResponse for UserError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            UserError::MissingRequiredField(_) | UserError::InvalidRequest(_) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            UserError::DuplicateEmail => (StatusCode::CONFLICT, self.to_string()),
            UserError::NotFound => (StatusCode::NOT_FOUND, self.to_string()),
            UserError::Store(e) => {
                tracing::error!(error = %e, "store error");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "store unavailable".to_string(),
                )
            }
            UserError::Internal(msg) => {
                tracing::error!(error = %msg, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_conflict_becomes_duplicate_email() {
        assert!(matches!(
            UserError::from(StoreError::Conflict),
            UserError::DuplicateEmail
        ));
        assert!(matches!(
            UserError::from(StoreError::Database(sqlx::Error::PoolTimedOut)),
            UserError::Store(_)
        ));
    }

    #[test]
    fn status_codes() {
        let cases = [
            (UserError::MissingRequiredField("name"), StatusCode::BAD_REQUEST),
            (UserError::InvalidRequest("bad json".into()), StatusCode::BAD_REQUEST),
            (UserError::DuplicateEmail, StatusCode::CONFLICT),
            (UserError::NotFound, StatusCode::NOT_FOUND),
            (
                UserError::Store(sqlx::Error::PoolTimedOut),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                UserError::Internal("boom".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }
}
