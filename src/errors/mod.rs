//! Error handling module for the SpaceY backend.
//!
//! Every failure surfaces as an [`AppError`], rendered as the
//! `{ "success": false, "error": { "code", "message" } }` envelope.

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt;

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    /// Missing, invalid or expired credentials
    Unauthorized(String),
    /// Authenticated but not allowed
    Forbidden(String),
    NotFound(String),
    /// Input failed a business rule
    Validation(String),
    /// State conflict (full machine, duplicate username, stale version...)
    Conflict(String),
    Database(String),
    Search(String),
    Internal(String),
    /// Malformed input
    BadRequest(String),
}

impl AppError {
    /// HTTP status and stable error code.
    fn kind(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            AppError::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            AppError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            AppError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR"),
            AppError::Search(_) => (StatusCode::INTERNAL_SERVER_ERROR, "SEARCH_ERROR"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        self.kind().0
    }

    pub fn error_code(&self) -> &'static str {
        self.kind().1
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::Unauthorized(msg)
            | AppError::Forbidden(msg)
            | AppError::NotFound(msg)
            | AppError::Validation(msg)
            | AppError::BadRequest(msg)
            | AppError::Conflict(msg)
            | AppError::Database(msg)
            | AppError::Search(msg)
            | AppError::Internal(msg) => msg,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.error_code(), self.message())
    }
}

impl std::error::Error for AppError {}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!(error = ?err, "Database failure");
        AppError::Database(err.to_string())
    }
}

impl From<tantivy::TantivyError> for AppError {
    fn from(err: tantivy::TantivyError) -> Self {
        tracing::error!(error = ?err, "Search index failure");
        AppError::Search(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        tracing::debug!(error = ?err, "Malformed JSON");
        AppError::BadRequest(format!("Malformed JSON: {}", err))
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        tracing::debug!(status = %rejection.status(), "Request body rejected");
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        tracing::debug!(status = %rejection.status(), "Query string rejected");
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<argon2::password_hash::Error> for AppError {
    fn from(err: argon2::password_hash::Error) -> Self {
        tracing::error!(error = ?err, "Password hashing failure");
        AppError::Internal("Password hashing failed".to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        tracing::error!(error = ?err, "Token encoding failure");
        AppError::Internal("Token processing failed".to_string())
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorDetails<'a> {
    pub code: &'static str,
    pub message: &'a str,
}

/// Error response envelope.
#[derive(Debug, Serialize)]
pub struct ErrorResponse<'a> {
    pub success: bool,
    pub error: ErrorDetails<'a>,
}

impl<'a> ErrorResponse<'a> {
    pub fn new(error: &'a AppError) -> Self {
        Self {
            success: false,
            error: ErrorDetails {
                code: error.error_code(),
                message: error.message(),
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::warn!(code = self.error_code(), "Request failed: {}", self.message());
        }
        (status, Json(ErrorResponse::new(&self))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let cases = [
            (AppError::Unauthorized("x".into()), 401, "UNAUTHORIZED"),
            (AppError::Forbidden("x".into()), 403, "FORBIDDEN"),
            (AppError::Validation("x".into()), 400, "VALIDATION_ERROR"),
            (AppError::Conflict("x".into()), 409, "CONFLICT"),
            (AppError::Search("x".into()), 500, "SEARCH_ERROR"),
        ];
        for (err, status, code) in cases {
            assert_eq!(err.status_code().as_u16(), status);
            assert_eq!(err.error_code(), code);
        }
    }

    #[test]
    fn test_error_envelope() {
        let err = AppError::NotFound("Machine m1 not found".into());
        let value = serde_json::to_value(ErrorResponse::new(&err)).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["error"]["code"], "NOT_FOUND");
        assert_eq!(value["error"]["message"], "Machine m1 not found");
    }
}
