//! Custom error types for the API service
//!
//! Every recoverable outcome a caller can hit is a distinct variant here,
//! each mapped to one stable, non-leaking message. Infrastructure failures
//! surface as a generic internal error and are never dressed up as one of
//! the domain kinds.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// The admission window that was exhausted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitWindow {
    Minute,
    Day,
}

/// Custom error type for the API service
#[derive(Error, Debug)]
pub enum ApiError {
    /// Email or username collides with an existing account
    #[error("Email or username already registered")]
    DuplicateIdentity,

    /// A request payload failed validation
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Unknown email, inactive account, or wrong password
    #[error("Incorrect email or password")]
    InvalidCredentials,

    /// Token signature did not verify, or the token is malformed
    #[error("Could not validate credentials")]
    TokenInvalid,

    /// Token signature verified but the token is past its expiry
    #[error("Token has expired")]
    TokenExpired,

    /// The user has no active subscription
    #[error("No active subscription found")]
    NoActivePlan,

    /// A plan quota was exhausted in the given window
    #[error("Rate limit exceeded in the {window:?} window")]
    RateLimitExceeded { window: LimitWindow, limit: i32 },

    /// Resource absent or not owned by the caller
    #[error("{0}")]
    NotFound(String),

    /// Database failure
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Anything else that should not leak details to the caller
    #[error("Internal server error")]
    Internal,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ApiError::DuplicateIdentity => (
                StatusCode::CONFLICT,
                "Email or username already registered".to_string(),
            ),
            ApiError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                "Incorrect email or password".to_string(),
            ),
            ApiError::TokenInvalid => (
                StatusCode::UNAUTHORIZED,
                "Could not validate credentials".to_string(),
            ),
            ApiError::TokenExpired => {
                (StatusCode::UNAUTHORIZED, "Token has expired".to_string())
            }
            ApiError::NoActivePlan => (
                StatusCode::NOT_FOUND,
                "No active subscription found".to_string(),
            ),
            ApiError::RateLimitExceeded { window, limit } => {
                let message = match window {
                    LimitWindow::Minute => format!(
                        "Rate limit exceeded. Plan allows {} requests per minute.",
                        limit
                    ),
                    LimitWindow::Day => format!(
                        "Daily limit exceeded. Plan allows {} requests per day.",
                        limit
                    ),
                };
                (StatusCode::TOO_MANY_REQUESTS, message)
            }
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            ApiError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

/// Type alias for API results
pub type ApiResult<T> = Result<T, ApiError>;

/// True when the error is a Postgres unique-constraint violation
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_messages_name_the_window() {
        let minute = ApiError::RateLimitExceeded {
            window: LimitWindow::Minute,
            limit: 5,
        };
        let day = ApiError::RateLimitExceeded {
            window: LimitWindow::Day,
            limit: 100,
        };

        let minute_response = minute.into_response();
        let day_response = day.into_response();
        assert_eq!(minute_response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(day_response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn test_credential_errors_do_not_leak() {
        // Unknown email and wrong password must render identically
        assert_eq!(
            ApiError::InvalidCredentials.to_string(),
            "Incorrect email or password"
        );
    }
}
