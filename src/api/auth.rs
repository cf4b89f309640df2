//! Session API endpoints.
//!
//! - POST `/register` - Create an account and start a session
//! - POST `/login` - Authenticate credentials and start a session
//! - POST `/logout` - End every session of the current user
//! - POST `/refresh-token` - Rotate the session
//! - GET `/is-authenticated` - Verify the access token, then rotate
//! - GET `/csrf-token` - Issue or re-issue the CSRF cookie

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, HeaderName, StatusCode, header::SET_COOKIE},
    middleware,
    response::{AppendHeaders, IntoResponse},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::error::{ApiError, ResultExt};
use crate::auth::{
    AuthorizeUser, CookiePolicy, FingerprintPolicy, HasAuthBackend, RefreshedSession,
    SessionStage, get_cookie, issue_session, refresh_session, require_csrf,
};
use crate::db::{Database, NewUser, PublicUser, UserStoreError};
use crate::fingerprint;
use crate::impl_has_auth_backend;
use crate::jwt::JwtConfig;
use crate::password;
use crate::rate_limit::{RateLimitConfig, rate_limit_login, rate_limit_register};

const MIN_USERNAME_LENGTH: usize = 3;
const MAX_USERNAME_LENGTH: usize = 32;
const MAX_EMAIL_LENGTH: usize = 254;
const MAX_FULL_NAME_LENGTH: usize = 100;

#[derive(Clone)]
pub struct AuthState {
    pub db: Database,
    pub jwt: Arc<JwtConfig>,
    pub cookies: Arc<CookiePolicy>,
    pub fingerprint_policy: FingerprintPolicy,
    pub rate_limits: Arc<RateLimitConfig>,
}

impl_has_auth_backend!(AuthState);

pub fn router(state: AuthState) -> Router {
    let register_router = Router::new()
        .route("/register", post(register))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(
            state.rate_limits.clone(),
            rate_limit_register,
        ));

    let login_router = Router::new()
        .route("/login", post(login))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(
            state.rate_limits.clone(),
            rate_limit_login,
        ));

    let session_router = Router::new()
        .route("/logout", post(logout))
        .route("/refresh-token", post(refresh_token))
        .route("/is-authenticated", get(is_authenticated))
        .route("/csrf-token", get(csrf_token))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(
            state.cookies.clone(),
            require_csrf,
        ));

    Router::new()
        .merge(register_router)
        .merge(login_router)
        .merge(session_router)
}

fn set_cookies(cookies: Vec<String>) -> AppendHeaders<Vec<(HeaderName, String)>> {
    AppendHeaders(cookies.into_iter().map(|c| (SET_COOKIE, c)).collect())
}

#[derive(Serialize)]
struct SuccessResponse<T: Serialize> {
    success: bool,
    data: T,
}

impl<T: Serialize> SuccessResponse<T> {
    fn new(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data,
        })
    }
}

#[derive(Serialize)]
struct SessionData {
    user: PublicUser,
    csrf: String,
    fingerprint: String,
}

#[derive(Deserialize)]
struct RegisterRequest {
    username: String,
    email: String,
    password: String,
    #[serde(default)]
    full_name: Option<String>,
}

fn validate_username(username: &str) -> Result<(), ApiError> {
    let len = username.chars().count();
    if len < MIN_USERNAME_LENGTH {
        return Err(ApiError::bad_request(format!(
            "Username must be at least {} characters long",
            MIN_USERNAME_LENGTH
        )));
    }
    if len > MAX_USERNAME_LENGTH {
        return Err(ApiError::bad_request(format!(
            "Username cannot be longer than {} characters",
            MAX_USERNAME_LENGTH
        )));
    }
    // Only allow alphanumeric and underscores
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(ApiError::bad_request(
            "Username can only contain letters, numbers, and underscores",
        ));
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<(), ApiError> {
    if email.len() > MAX_EMAIL_LENGTH {
        return Err(ApiError::bad_request("Email address is too long"));
    }
    let valid = email
        .split_once('@')
        .is_some_and(|(local, domain)| {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        });
    if !valid || email.chars().any(char::is_whitespace) {
        return Err(ApiError::bad_request("Invalid email address"));
    }
    Ok(())
}

async fn register(
    State(state): State<AuthState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let username = payload.username.trim();
    let email = payload.email.trim();
    let full_name = payload
        .full_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty());

    validate_username(username)?;
    validate_email(email)?;
    password::validate_password(&payload.password).map_err(ApiError::BadRequest)?;
    if full_name.is_some_and(|n| n.chars().count() > MAX_FULL_NAME_LENGTH) {
        return Err(ApiError::bad_request("Full name is too long"));
    }

    let password_hash =
        password::hash_password(&payload.password).db_err("Failed to hash password")?;

    let user = match state
        .db
        .users()
        .create(&NewUser {
            username,
            email,
            full_name,
            password_hash: &password_hash,
        })
        .await
    {
        Ok(user) => user,
        Err(UserStoreError::Duplicate) => {
            return Err(ApiError::conflict("Username or email is already registered"));
        }
        Err(e) => return Err(ApiError::db_error("Failed to create user", e)),
    };

    let session = issue_session(&state, &user)
        .await
        .db_err("Failed to start session")?;
    let csrf = fingerprint::generate_csrf_token();

    info!(user_id = %user.user_id, username = %user.username, "User registered");

    Ok((
        StatusCode::CREATED,
        set_cookies(session.set_cookies(state.cookies(), &csrf)),
        SuccessResponse::new(SessionData {
            user: PublicUser::from(user),
            csrf,
            fingerprint: session.fingerprint,
        }),
    ))
}

#[derive(Deserialize)]
struct LoginRequest {
    #[serde(default)]
    identifier: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    username: Option<String>,
    password: String,
}

impl LoginRequest {
    fn identifier(&self) -> Option<&str> {
        [&self.identifier, &self.email, &self.username]
            .into_iter()
            .filter_map(|v| v.as_deref())
            .map(str::trim)
            .find(|v| !v.is_empty())
    }
}

async fn login(
    State(state): State<AuthState>,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let identifier = payload
        .identifier()
        .ok_or_else(|| ApiError::bad_request("Email or username is required"))?;
    if payload.password.is_empty() {
        return Err(ApiError::bad_request("Password is required"));
    }

    let mut user = state
        .db
        .users()
        .authenticate(identifier, &payload.password)
        .await
        .db_err("Failed to authenticate user")?
        .ok_or_else(|| {
            info!("Login failed: invalid credentials");
            ApiError::unauthorized("Invalid credentials")
        })?;

    // One session chain per user: a new login ends every earlier session.
    let revoked = state
        .db
        .tokens()
        .revoke_all_user_tokens(&user.user_id)
        .await
        .db_err("Failed to revoke previous sessions")?;

    let session = issue_session(&state, &user)
        .await
        .db_err("Failed to start session")?;
    let csrf = fingerprint::generate_csrf_token();

    match state.db.users().update_presence(&user.user_id, true).await {
        Ok(_) => user.is_online = true,
        Err(e) => warn!(user_id = %user.user_id, error = %e, "Failed to mark user online"),
    }

    info!(user_id = %user.user_id, revoked_sessions = revoked, "User logged in");

    Ok((
        StatusCode::OK,
        set_cookies(session.set_cookies(state.cookies(), &csrf)),
        SuccessResponse::new(SessionData {
            user: PublicUser::from(user),
            csrf,
            fingerprint: session.fingerprint,
        }),
    ))
}

#[derive(Serialize)]
struct MessageResponse {
    message: &'static str,
}

/// Logout never fails once the caller is identified: side effects are best-effort.
async fn logout(
    State(state): State<AuthState>,
    AuthorizeUser(auth): AuthorizeUser,
) -> impl IntoResponse {
    let user_id = auth.user_id();

    if let Err(e) = state.db.users().update_presence(user_id, false).await {
        warn!(user_id = %user_id, error = %e, "Failed to mark user offline");
    }

    match state.db.tokens().revoke_all_user_tokens(user_id).await {
        Ok(count) => info!(user_id = %user_id, revoked_sessions = count, "User logged out"),
        Err(e) => warn!(user_id = %user_id, error = %e, "Failed to revoke sessions on logout"),
    }

    (
        StatusCode::OK,
        set_cookies(state.cookies.clear_all()),
        Json(MessageResponse {
            message: "Logged out successfully",
        }),
    )
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    message: &'static str,
    authenticated: bool,
    user: PublicUser,
    csrf: String,
    fingerprint: String,
    expires_at: u64,
}

/// Build the response for a rotated session. Keeps the caller's CSRF token if it has one.
fn session_response(
    state: &AuthState,
    headers: &HeaderMap,
    refreshed: RefreshedSession,
    message: &'static str,
) -> impl IntoResponse + use<> {
    let csrf = get_cookie(headers, state.cookies.names.csrf)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .unwrap_or_else(fingerprint::generate_csrf_token);

    let RefreshedSession { tokens, user } = refreshed;
    debug!(stage = %SessionStage::Responded, user_id = %user.user_id, "Session stage");

    (
        StatusCode::OK,
        set_cookies(tokens.set_cookies(&state.cookies, &csrf)),
        Json(RefreshResponse {
            message,
            authenticated: true,
            user,
            csrf,
            fingerprint: tokens.fingerprint,
            expires_at: tokens.access.expires_at,
        }),
    )
}

async fn refresh_token(
    State(state): State<AuthState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let refreshed = refresh_session(&state, &headers, None).await?;
    Ok(session_response(&state, &headers, refreshed, "Token refreshed"))
}

async fn is_authenticated(
    State(state): State<AuthState>,
    AuthorizeUser(auth): AuthorizeUser,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let refreshed = refresh_session(&state, &headers, Some(auth.user_id())).await?;
    Ok(session_response(
        &state,
        &headers,
        refreshed,
        "User is authenticated",
    ))
}

#[derive(Serialize)]
struct CsrfData {
    csrf: String,
}

async fn csrf_token(State(state): State<AuthState>, headers: HeaderMap) -> impl IntoResponse {
    let csrf = get_cookie(&headers, state.cookies.names.csrf)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .unwrap_or_else(fingerprint::generate_csrf_token);

    (
        StatusCode::OK,
        set_cookies(vec![state.cookies.csrf_cookie(&csrf)]),
        SuccessResponse::new(CsrfData { csrf }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_username() {
        assert!(validate_username("alice_01").is_ok());
        assert!(validate_username("al").is_err());
        assert!(validate_username("alice smith").is_err());
        assert!(validate_username(&"a".repeat(33)).is_err());
    }

    #[test]
    fn test_validate_email() {
        assert!(validate_email("alice@example.com").is_ok());
        assert!(validate_email("alice@localhost").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("alice@.com").is_err());
        assert!(validate_email("al ice@example.com").is_err());
    }

    #[test]
    fn test_login_identifier_precedence() {
        let request: LoginRequest = serde_json::from_str(
            r#"{"identifier":" ","email":"alice@example.com","username":"alice","password":"x"}"#,
        )
        .unwrap();
        assert_eq!(request.identifier(), Some("alice@example.com"));

        let request: LoginRequest = serde_json::from_str(r#"{"password":"x"}"#).unwrap();
        assert_eq!(request.identifier(), None);
    }
}
