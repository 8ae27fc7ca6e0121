use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::fmt;

use super::ApiResponse;
use crate::services::{AuthError, UploadError};

#[derive(Debug)]
pub enum ApiError {
    Unauthorized(String),

    Forbidden(String),

    TooManyRequests(String),

    ValidationError(String),

    DatabaseError(String),

    ExternalApiError { service: String, message: String },

    UploadFailed(String),

    InternalError(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unauthorized(msg) => write!(f, "Unauthorized: {msg}"),
            Self::Forbidden(msg) => write!(f, "Forbidden: {msg}"),
            Self::TooManyRequests(msg) => write!(f, "Too many requests: {msg}"),
            Self::ValidationError(msg) => write!(f, "Validation error: {msg}"),
            Self::DatabaseError(msg) => write!(f, "Database error: {msg}"),
            Self::ExternalApiError { service, message } => write!(f, "{service} error: {message}"),
            Self::UploadFailed(msg) => write!(f, "Upload failed: {msg}"),
            Self::InternalError(msg) => write!(f, "Internal error: {msg}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            Self::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            Self::TooManyRequests(msg) => (StatusCode::TOO_MANY_REQUESTS, msg.clone()),
            Self::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Self::DatabaseError(msg) => {
                tracing::error!("Database error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "A database error occurred".to_string(),
                )
            }
            Self::ExternalApiError { service, message } => {
                tracing::warn!("{} API error: {}", service, message);
                (
                    StatusCode::BAD_GATEWAY,
                    format!("{service} service is unavailable"),
                )
            }
            // The last remote error is reported to the caller
            Self::UploadFailed(msg) => {
                tracing::error!("Upload failed: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg.clone())
            }
            Self::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = ApiResponse::<()>::error(message);
        (status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::InternalError(err.to_string())
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Unauthorized => Self::Unauthorized("Unauthorized".to_string()),
            AuthError::MissingProviderToken => Self::Forbidden(
                "Yandex token not available. Please re-authenticate with Yandex.".to_string(),
            ),
            AuthError::RateLimited { .. } => Self::TooManyRequests(err.to_string()),
            AuthError::Validation(msg) => Self::ValidationError(msg),
            AuthError::Database(msg) => Self::DatabaseError(msg),
            AuthError::OAuth(message) => Self::ExternalApiError {
                service: "Yandex OAuth".to_string(),
                message,
            },
            AuthError::Internal(msg) => Self::InternalError(msg),
        }
    }
}

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::MissingProviderToken => {
                Self::Unauthorized("Yandex token not available for this user.".to_string())
            }
            UploadError::RetryExhausted { .. } => Self::UploadFailed(err.to_string()),
            UploadError::Encode(_) => Self::InternalError(err.to_string()),
        }
    }
}

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::InternalError(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }
}
