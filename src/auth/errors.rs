//! Authentication error types.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

use super::cookie::CookiePolicy;
use crate::api::ApiError;

/// Why a session could not be established or refreshed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    /// No token was presented
    NotAuthenticated,
    /// Bad signature, expired, malformed, wrong kind or wrong subject
    TokenInvalid,
    /// Token is bound to a fingerprint but none was presented
    FingerprintMissing,
    /// Presented fingerprint does not hash to the bound value
    FingerprintMismatch,
    /// Token verifies but its store record is revoked, expired or absent
    StoreInactive,
    /// The subject behind a valid session could not be loaded
    IdentityFetchFailure,
    /// The token store failed
    StoreError,
}

impl AuthErrorKind {
    pub fn status_code(self) -> StatusCode {
        match self {
            AuthErrorKind::NotAuthenticated | AuthErrorKind::IdentityFetchFailure => {
                StatusCode::UNAUTHORIZED
            }
            AuthErrorKind::TokenInvalid
            | AuthErrorKind::FingerprintMissing
            | AuthErrorKind::FingerprintMismatch
            | AuthErrorKind::StoreInactive => StatusCode::FORBIDDEN,
            AuthErrorKind::StoreError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            AuthErrorKind::NotAuthenticated => "Not authenticated",
            AuthErrorKind::TokenInvalid => "Invalid or expired token",
            AuthErrorKind::FingerprintMissing => "Missing Fingerprint",
            AuthErrorKind::FingerprintMismatch => "Fingerprint mismatch",
            AuthErrorKind::StoreInactive => "Refresh token has been revoked or expired",
            AuthErrorKind::IdentityFetchFailure => "User not found",
            AuthErrorKind::StoreError => "Session store error",
        }
    }

    /// Machine-readable code for the `error` field of the envelope.
    pub fn code(self) -> &'static str {
        match self {
            AuthErrorKind::NotAuthenticated => "NOT_AUTHENTICATED",
            AuthErrorKind::TokenInvalid => "TOKEN_INVALID",
            AuthErrorKind::FingerprintMissing => "FINGERPRINT_MISSING",
            AuthErrorKind::FingerprintMismatch => "FINGERPRINT_MISMATCH",
            AuthErrorKind::StoreInactive => "SESSION_INACTIVE",
            AuthErrorKind::IdentityFetchFailure => "IDENTITY_UNAVAILABLE",
            AuthErrorKind::StoreError => "STORE_ERROR",
        }
    }

    /// Store failures leave the session alone; everything else ends it.
    fn clears_session(self) -> bool {
        !matches!(self, AuthErrorKind::StoreError)
    }
}

impl std::fmt::Display for AuthErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

/// An authentication failure together with the cookies the response must clear.
#[derive(Debug)]
pub struct AuthError {
    pub kind: AuthErrorKind,
    status: StatusCode,
    clear_cookies: Vec<String>,
}

impl AuthError {
    /// Session-pipeline rejection. Clears every session cookie unless the
    /// failure was in the store itself.
    pub fn session(kind: AuthErrorKind, cookies: &CookiePolicy) -> Self {
        let clear_cookies = if kind.clears_session() {
            cookies.clear_all()
        } else {
            Vec::new()
        };
        Self {
            kind,
            status: kind.status_code(),
            clear_cookies,
        }
    }

    /// Access-token rejection. Always 401 and leaves cookies in place so the
    /// client can still refresh.
    pub fn unauthorized(kind: AuthErrorKind) -> Self {
        Self {
            kind,
            status: StatusCode::UNAUTHORIZED,
            clear_cookies: Vec::new(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn clear_cookies(&self) -> &[String] {
        &self.clear_cookies
    }

    pub(crate) fn into_parts(self) -> (StatusCode, AuthErrorKind, Vec<String>) {
        (self.status, self.kind, self.clear_cookies)
    }
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.kind, self.status)
    }
}

impl std::error::Error for AuthError {}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        ApiError::Session(self).into_response()
    }
}
