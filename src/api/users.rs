use axum::{Json, Router, extract::State, response::IntoResponse, routing::get};
use serde::Serialize;
use std::sync::Arc;

use super::error::{ApiError, ResultExt};
use crate::auth::{AuthorizeUser, CookiePolicy, FingerprintPolicy};
use crate::db::{Database, PublicUser};
use crate::impl_has_auth_backend;
use crate::jwt::JwtConfig;

#[derive(Clone)]
pub struct UsersState {
    pub db: Database,
    pub jwt: Arc<JwtConfig>,
    pub cookies: Arc<CookiePolicy>,
    pub fingerprint_policy: FingerprintPolicy,
}

impl_has_auth_backend!(UsersState);

pub fn router(state: UsersState) -> Router {
    Router::new().route("/me", get(me)).with_state(state)
}

#[derive(Serialize)]
struct MeResponse {
    success: bool,
    data: PublicUser,
}

/// The user behind the presented access token.
async fn me(
    State(state): State<UsersState>,
    AuthorizeUser(auth): AuthorizeUser,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .db
        .users()
        .get_by_id(auth.user_id())
        .await
        .db_err("Failed to get user")?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    Ok(Json(MeResponse {
        success: true,
        data: PublicUser::from(user),
    }))
}
