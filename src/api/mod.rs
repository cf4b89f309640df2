mod auth;
mod error;
mod users;

use axum::Router;
use std::sync::Arc;

use crate::auth::{CookiePolicy, FingerprintPolicy};
use crate::db::Database;
use crate::jwt::JwtConfig;
use crate::rate_limit::RateLimitConfig;

pub use auth::AuthState;
pub use error::{ApiError, ErrorResponse, ResultExt};
pub use users::UsersState;

/// Create the API router.
pub fn create_api_router(
    db: Database,
    jwt: Arc<JwtConfig>,
    cookies: Arc<CookiePolicy>,
    fingerprint_policy: FingerprintPolicy,
    rate_limits: Arc<RateLimitConfig>,
) -> Router {
    let auth_state = auth::AuthState {
        db: db.clone(),
        jwt: jwt.clone(),
        cookies: cookies.clone(),
        fingerprint_policy,
        rate_limits,
    };

    let users_state = users::UsersState {
        db,
        jwt,
        cookies,
        fingerprint_policy,
    };

    Router::new()
        .nest("/auth", auth::router(auth_state))
        .nest("/users", users::router(users_state))
}
