//! Shared error handling for API endpoints.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::error;

use crate::auth::{AuthError, CSRF_ERROR_CODE};

/// Extension trait for concise error mapping on Results.
pub trait ResultExt<T> {
    fn db_err(self, msg: &str) -> Result<T, ApiError>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for Result<T, E> {
    fn db_err(self, msg: &str) -> Result<T, ApiError> {
        self.map_err(|e| ApiError::db_error(msg, e))
    }
}

/// API error type with automatic response conversion.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    Conflict(String),
    TooManyRequests(String),
    Internal(String),
    /// CSRF header missing or not matching the cookie
    Csrf,
    /// Session failure; carries the cookies to clear
    Session(AuthError),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn too_many_requests(msg: impl Into<String>) -> Self {
        Self::TooManyRequests(msg.into())
    }

    pub fn db_error(context: &str, e: impl std::fmt::Display) -> Self {
        error!("{}: {}", context, e);
        Self::Internal("Internal server error".into())
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        Self::Session(e)
    }
}

/// Failure envelope shared by every endpoint.
#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, code, clear_cookies) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, None, Vec::new()),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg, None, Vec::new()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, None, Vec::new()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg, None, Vec::new()),
            ApiError::TooManyRequests(msg) => {
                (StatusCode::TOO_MANY_REQUESTS, msg, None, Vec::new())
            }
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg, None, Vec::new()),
            ApiError::Csrf => (
                StatusCode::FORBIDDEN,
                "Invalid CSRF token".to_string(),
                Some(CSRF_ERROR_CODE),
                Vec::new(),
            ),
            ApiError::Session(e) => {
                let (status, kind, clear) = e.into_parts();
                (status, kind.message().to_string(), Some(kind.code()), clear)
            }
        };

        let mut response = (
            status,
            Json(ErrorResponse {
                success: false,
                message,
                error: code,
            }),
        )
            .into_response();

        let headers = response.headers_mut();
        for cookie in clear_cookies {
            if let Ok(value) = HeaderValue::from_str(&cookie) {
                headers.append(header::SET_COOKIE, value);
            }
        }

        response
    }
}
