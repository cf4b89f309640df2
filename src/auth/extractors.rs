//! Axum extractors for authentication.

use axum::{extract::FromRequestParts, http::request::Parts};
use tracing::debug;

use super::cookie::{bearer_token, get_cookie};
use super::errors::{AuthError, AuthErrorKind};
use super::state::HasAuthBackend;
use super::types::AuthenticatedUser;
use crate::fingerprint;

/// Verify the access token on a request and its fingerprint binding.
fn authorize_request<S>(parts: &Parts, state: &S) -> Result<AuthenticatedUser, AuthErrorKind>
where
    S: HasAuthBackend,
{
    let cookies = state.cookies();
    let token = get_cookie(&parts.headers, cookies.names.access)
        .filter(|t| !t.is_empty())
        .or_else(|| bearer_token(&parts.headers))
        .ok_or(AuthErrorKind::NotAuthenticated)?;

    let claims = state.jwt().verify_access(token).map_err(|e| {
        debug!(error = %e, "Access token rejected");
        AuthErrorKind::TokenInvalid
    })?;

    match claims.fph.as_deref() {
        Some(expected) => {
            let presented = cookies
                .presented_fingerprint(&parts.headers)
                .ok_or(AuthErrorKind::FingerprintMissing)?;
            if !fingerprint::matches(presented, expected) {
                return Err(AuthErrorKind::FingerprintMismatch);
            }
        }
        None if state.fingerprint_policy().allows_unbound() => {}
        None => return Err(AuthErrorKind::TokenInvalid),
    }

    Ok(AuthenticatedUser { claims })
}

/// Extractor for endpoints that require a valid, fingerprint-bound access token.
/// Rejects with 401 and leaves cookies in place so the client can refresh.
pub struct AuthorizeUser(pub AuthenticatedUser);

impl<S> FromRequestParts<S> for AuthorizeUser
where
    S: HasAuthBackend + Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        authorize_request(parts, state)
            .map(AuthorizeUser)
            .map_err(AuthError::unauthorized)
    }
}
