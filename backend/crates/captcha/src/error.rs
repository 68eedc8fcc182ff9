//! Captcha Error Types
//!
//! Only infrastructure faults are errors. Expected rejections (bad drag,
//! expired challenge, replayed token...) are ordinary return values of the
//! use cases and never travel through this type.

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Seconds a client should wait before retrying after a store outage
const RETRY_AFTER_SECS: u64 = 1;

/// Captcha-specific result type alias
pub type CaptchaResult<T> = Result<T, CaptchaError>;

/// Captcha infrastructure errors
#[derive(Debug, Error)]
pub enum CaptchaError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CaptchaError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            CaptchaError::Database(_) => StatusCode::SERVICE_UNAVAILABLE,
            CaptchaError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the caller may retry the same request later
    ///
    /// A store outage says nothing about the client, so it is never a
    /// bot-detection verdict.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CaptchaError::Database(_))
    }

    /// Log the error with appropriate level
    fn log(&self) {
        match self {
            CaptchaError::Database(e) => {
                tracing::error!(error = %e, "Captcha database error");
            }
            CaptchaError::Internal(msg) => {
                tracing::error!(message = %msg, "Captcha internal error");
            }
        }
    }
}

impl IntoResponse for CaptchaError {
    fn into_response(self) -> Response {
        self.log();
        let status = self.status_code();
        // Return empty body for security (don't leak details)
        if self.is_retryable() {
            return (
                status,
                [(header::RETRY_AFTER, RETRY_AFTER_SECS.to_string())],
                (),
            )
                .into_response();
        }
        (status, ()).into_response()
    }
}
