//! Error handling module
//!
//! Provides the HTTP-facing error type. Auth failures are converted here into
//! structured responses so they never reach business handlers as faults.

use crate::auth::AuthError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error};

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid email or password")]
    InvalidCredentials { attempts_remaining: Option<u32> },

    #[error("Account locked until {until}")]
    Locked { until: DateTime<Utc> },

    #[error("Account is deactivated")]
    Inactive,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid or expired reset token")]
    InvalidResetToken,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error response structure
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_until: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts_remaining: Option<u32>,
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials { attempts_remaining } => {
                AppError::InvalidCredentials { attempts_remaining }
            }
            AuthError::Locked { until } => AppError::Locked { until },
            AuthError::Inactive => AppError::Inactive,
            AuthError::Unauthenticated(msg) => AppError::Unauthorized(msg),
            AuthError::TokenExpired => {
                debug!("Rejected expired token");
                AppError::Unauthorized("Token expired".to_string())
            }
            AuthError::TokenInvalid => {
                debug!("Rejected invalid token");
                AppError::Unauthorized("Invalid token".to_string())
            }
            AuthError::Forbidden(msg) => AppError::Forbidden(msg),
            AuthError::InvalidOrExpiredToken => AppError::InvalidResetToken,
            AuthError::UnknownRole(role) => AppError::Validation(format!("Unknown role: {}", role)),
            AuthError::Conflict(msg) => AppError::Conflict(msg),
            AuthError::NotFound(msg) => AppError::NotFound(msg),
            AuthError::Internal(msg) => AppError::Internal(msg),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut lock_until = None;
        let mut attempts_remaining = None;

        let (status, code, message) = match self {
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg),
            AppError::InvalidCredentials {
                attempts_remaining: remaining,
            } => {
                attempts_remaining = remaining;
                (
                    StatusCode::UNAUTHORIZED,
                    "INVALID_CREDENTIALS",
                    "Invalid email or password".to_string(),
                )
            }
            AppError::Locked { until } => {
                lock_until = Some(until);
                (
                    StatusCode::LOCKED,
                    "ACCOUNT_LOCKED",
                    "Account is temporarily locked due to too many failed login attempts"
                        .to_string(),
                )
            }
            AppError::Inactive => (
                StatusCode::UNAUTHORIZED,
                "ACCOUNT_INACTIVE",
                "Account is deactivated".to_string(),
            ),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg),
            AppError::InvalidResetToken => (
                StatusCode::BAD_REQUEST,
                "INVALID_RESET_TOKEN",
                "Invalid or expired reset token".to_string(),
            ),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            AppError::Internal(msg) => {
                error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = Json(ErrorResponse {
            success: false,
            message,
            code: code.to_string(),
            lock_until,
            attempts_remaining,
        });

        (status, body).into_response()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, AppError>;

/// Helper function to create a validation error
pub fn validation_error(msg: impl Into<String>) -> AppError {
    AppError::Validation(msg.into())
}
