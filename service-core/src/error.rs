use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::response::failure;

/// Stable, client-facing error codes carried in the response envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    AuthenticationRequired,
    AuthorizationFailed,
    NotFound,
    ConsentNotFound,
    AuthFailed,
    NoNameAvailable,
    RateLimited,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::AuthenticationRequired => "AUTHENTICATION_REQUIRED",
            ErrorCode::AuthorizationFailed => "AUTHORIZATION_FAILED",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::ConsentNotFound => "CONSENT_NOT_FOUND",
            ErrorCode::AuthFailed => "AUTH_FAILED",
            ErrorCode::NoNameAvailable => "NO_NAME_AVAILABLE",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(anyhow::Error),

    #[error("Authentication required: {0}")]
    AuthenticationRequired(anyhow::Error),

    #[error("Authorization failed: {0}")]
    AuthorizationFailed(anyhow::Error),

    #[error("Not found: {0}")]
    NotFound(anyhow::Error),

    #[error("Consent not found: {0}")]
    ConsentNotFound(anyhow::Error),

    #[error("Authentication failed: {0}")]
    AuthFailed(anyhow::Error),

    #[error("No name available: {0}")]
    NoNameAvailable(anyhow::Error),

    #[error("Too many requests: {0}")]
    TooManyRequests(String, Option<u64>),

    #[error("Internal server error: {0}")]
    InternalError(#[from] anyhow::Error),

    #[error("Database error: {0}")]
    DatabaseError(anyhow::Error),

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),
}

impl AppError {
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::ValidationError(_) => ErrorCode::ValidationError,
            AppError::AuthenticationRequired(_) => ErrorCode::AuthenticationRequired,
            AppError::AuthorizationFailed(_) => ErrorCode::AuthorizationFailed,
            AppError::NotFound(_) => ErrorCode::NotFound,
            AppError::ConsentNotFound(_) => ErrorCode::ConsentNotFound,
            AppError::AuthFailed(_) => ErrorCode::AuthFailed,
            AppError::NoNameAvailable(_) => ErrorCode::NoNameAvailable,
            AppError::TooManyRequests(..) => ErrorCode::RateLimited,
            AppError::InternalError(_) | AppError::DatabaseError(_) | AppError::ConfigError(_) => {
                ErrorCode::InternalError
            }
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::AuthenticationRequired(_) => StatusCode::UNAUTHORIZED,
            AppError::AuthorizationFailed(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::ConsentNotFound(_) => StatusCode::NOT_FOUND,
            AppError::AuthFailed(_) => StatusCode::UNAUTHORIZED,
            AppError::NoNameAvailable(_) => StatusCode::NOT_FOUND,
            AppError::TooManyRequests(..) => StatusCode::TOO_MANY_REQUESTS,
            AppError::InternalError(_) | AppError::DatabaseError(_) | AppError::ConfigError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to show any caller. Server-side faults never leak their cause here.
    pub fn public_message(&self) -> String {
        match self {
            AppError::ValidationError(err)
            | AppError::AuthenticationRequired(err)
            | AppError::AuthorizationFailed(err)
            | AppError::NotFound(err)
            | AppError::ConsentNotFound(err)
            | AppError::AuthFailed(err)
            | AppError::NoNameAvailable(err) => err.to_string(),
            AppError::TooManyRequests(msg, _) => msg.clone(),
            AppError::InternalError(_) => "Internal server error".to_string(),
            AppError::DatabaseError(_) => "Database error".to_string(),
            AppError::ConfigError(_) => "Configuration error".to_string(),
        }
    }

    /// Internal detail, only rendered outside production.
    pub fn internal_details(&self) -> Option<String> {
        match self {
            AppError::InternalError(err) => Some(format!("{:#}", err)),
            AppError::DatabaseError(err) | AppError::ConfigError(err) => Some(err.to_string()),
            _ => None,
        }
    }

    pub fn retry_after(&self) -> Option<u64> {
        match self {
            AppError::TooManyRequests(_, retry) => *retry,
            _ => None,
        }
    }

    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::ValidationError(anyhow::Error::new(err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(anyhow::Error::new(err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}

impl IntoResponse for AppError {
    /// Fallback rendering for errors raised outside a request context.
    fn into_response(self) -> Response {
        failure(&self, "-", false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_faults_hide_their_cause() {
        let err = AppError::DatabaseError(anyhow::anyhow!("connection refused at 10.0.0.4"));
        assert_eq!(err.code(), ErrorCode::InternalError);
        assert_eq!(err.public_message(), "Database error");
        assert!(err.internal_details().unwrap().contains("10.0.0.4"));
    }

    #[test]
    fn client_errors_keep_their_message() {
        let err = AppError::ConsentNotFound(anyhow::anyhow!("No pending consent"));
        assert_eq!(err.code().as_str(), "CONSENT_NOT_FOUND");
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.public_message(), "No pending consent");
        assert!(err.internal_details().is_none());
    }

    #[test]
    fn error_code_serializes_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::NoNameAvailable).unwrap();
        assert_eq!(json, "\"NO_NAME_AVAILABLE\"");
    }
}
