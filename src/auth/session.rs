//! Session issuance and the staged refresh pipeline.
//!
//! A refresh (or status check) moves through fixed stages:
//! `UNVERIFIED -> TOKEN_CHECKED -> FINGERPRINT_CHECKED -> STORE_VERIFIED ->
//! ROTATED -> RESPONDED`. Each stage is its own type, so a later stage can
//! only be reached through the checks of every earlier one. Any stage may
//! short-circuit to `REJECTED`.

use axum::http::HeaderMap;
use tracing::{debug, error, info, warn};

use super::cookie::{CookiePolicy, get_cookie};
use super::errors::{AuthError, AuthErrorKind};
use super::state::HasAuthBackend;
use crate::db::{NewRefreshToken, PublicUser, StoreError, User};
use crate::fingerprint;
use crate::jwt::{IssuedToken, JwtConfig, JwtError, SessionClaims, SessionPayload, unix_now};

/// Pipeline stage, used in log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStage {
    Unverified,
    TokenChecked,
    FingerprintChecked,
    StoreVerified,
    Rotated,
    Responded,
    Rejected,
}

impl std::fmt::Display for SessionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionStage::Unverified => "UNVERIFIED",
            SessionStage::TokenChecked => "TOKEN_CHECKED",
            SessionStage::FingerprintChecked => "FINGERPRINT_CHECKED",
            SessionStage::StoreVerified => "STORE_VERIFIED",
            SessionStage::Rotated => "ROTATED",
            SessionStage::Responded => "RESPONDED",
            SessionStage::Rejected => "REJECTED",
        };
        f.write_str(name)
    }
}

/// A freshly minted access/refresh pair bound to a new fingerprint.
#[derive(Debug, Clone)]
pub struct SessionTokens {
    pub access: IssuedToken,
    pub refresh: IssuedToken,
    /// Raw fingerprint. Only ever sent to the client, never stored.
    pub fingerprint: String,
    pub fingerprint_hash: String,
}

impl SessionTokens {
    /// Generate a fingerprint and sign both tokens bound to its hash.
    pub fn mint(jwt: &JwtConfig, subject: &str, is_admin: bool) -> Result<Self, JwtError> {
        let fingerprint = fingerprint::generate();
        let fingerprint_hash = fingerprint::hash(&fingerprint);
        let payload = SessionPayload {
            subject: subject.to_string(),
            is_admin,
            fingerprint_hash: Some(fingerprint_hash.clone()),
        };

        Ok(Self {
            access: jwt.issue_access(&payload)?,
            refresh: jwt.issue_refresh(&payload)?,
            fingerprint,
            fingerprint_hash,
        })
    }

    /// The store record for the refresh half of this pair.
    pub fn record(&self, user_id: &str) -> NewRefreshToken {
        NewRefreshToken {
            token_id: self.refresh.jti.clone(),
            user_id: user_id.to_string(),
            fingerprint_hash: self.fingerprint_hash.clone(),
            issued_at: self.refresh.issued_at,
            expires_at: self.refresh.expires_at,
        }
    }

    /// `Set-Cookie` values for all four session cookies.
    pub fn set_cookies(&self, cookies: &CookiePolicy, csrf: &str) -> Vec<String> {
        vec![
            cookies.access_cookie(&self.access.token, self.access.duration),
            cookies.refresh_cookie(&self.refresh.token, self.refresh.duration),
            cookies.fingerprint_cookie(&self.fingerprint),
            cookies.csrf_cookie(csrf),
        ]
    }
}

/// Failure to start a new session on register or login.
#[derive(Debug)]
pub enum IssueError {
    Token(JwtError),
    Store(StoreError),
}

impl std::fmt::Display for IssueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IssueError::Token(e) => write!(f, "Failed to sign session tokens: {}", e),
            IssueError::Store(e) => write!(f, "Failed to persist refresh token: {}", e),
        }
    }
}

impl std::error::Error for IssueError {}

/// Start a new session for `user`: mint a bound pair and persist the refresh record.
pub async fn issue_session<S>(state: &S, user: &User) -> Result<SessionTokens, IssueError>
where
    S: HasAuthBackend,
{
    let tokens =
        SessionTokens::mint(state.jwt(), &user.user_id, user.is_admin).map_err(IssueError::Token)?;

    state
        .db()
        .tokens()
        .create_token(&tokens.record(&user.user_id))
        .await
        .map_err(IssueError::Store)?;

    debug!(user_id = %user.user_id, jti = %tokens.refresh.jti, "Session issued");
    Ok(tokens)
}

/// Outcome of a successful refresh: the rotated pair and who it belongs to.
#[derive(Debug, Clone)]
pub struct RefreshedSession {
    pub tokens: SessionTokens,
    pub user: PublicUser,
}

/// Run the refresh pipeline against the request headers.
///
/// When `expected_subject` is set (status check), a refresh token for any
/// other subject is rejected.
pub async fn refresh_session<S>(
    state: &S,
    headers: &HeaderMap,
    expected_subject: Option<&str>,
) -> Result<RefreshedSession, AuthError>
where
    S: HasAuthBackend,
{
    Unverified { state, headers }
        .check_token(expected_subject)?
        .check_fingerprint()?
        .verify_store()
        .await?
        .rotate()
        .await
        .map(Rotated::into_session)
}

fn reject<S: HasAuthBackend>(state: &S, stage: SessionStage, kind: AuthErrorKind) -> AuthError {
    match kind {
        AuthErrorKind::StoreError | AuthErrorKind::IdentityFetchFailure => {
            warn!(stage = %stage, outcome = %SessionStage::Rejected, reason = %kind, "Session rejected")
        }
        _ => info!(stage = %stage, outcome = %SessionStage::Rejected, reason = %kind, "Session rejected"),
    }
    AuthError::session(kind, state.cookies())
}

struct Unverified<'a, S> {
    state: &'a S,
    headers: &'a HeaderMap,
}

impl<'a, S: HasAuthBackend> Unverified<'a, S> {
    fn check_token(self, expected_subject: Option<&str>) -> Result<TokenChecked<'a, S>, AuthError> {
        let stage = SessionStage::Unverified;
        let token = get_cookie(self.headers, self.state.cookies().names.refresh)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| reject(self.state, stage, AuthErrorKind::NotAuthenticated))?;

        let claims = self.state.jwt().verify_refresh(token).map_err(|e| {
            debug!(error = %e, "Refresh token rejected");
            reject(self.state, stage, AuthErrorKind::TokenInvalid)
        })?;

        if let Some(expected) = expected_subject {
            if expected != claims.sub {
                warn!(
                    access_subject = %expected,
                    refresh_subject = %claims.sub,
                    "Refresh token subject does not match access token"
                );
                return Err(reject(self.state, stage, AuthErrorKind::TokenInvalid));
            }
        }

        debug!(stage = %SessionStage::TokenChecked, user_id = %claims.sub, "Session stage");
        Ok(TokenChecked {
            state: self.state,
            headers: self.headers,
            claims,
        })
    }
}

struct TokenChecked<'a, S> {
    state: &'a S,
    headers: &'a HeaderMap,
    claims: SessionClaims,
}

/// How the token is tied to the store record it rotates.
enum Binding {
    Fingerprint(String),
    /// Unbound legacy token; the record is located by `jti`.
    Legacy,
}

impl<'a, S: HasAuthBackend> TokenChecked<'a, S> {
    fn check_fingerprint(self) -> Result<FingerprintChecked<'a, S>, AuthError> {
        let stage = SessionStage::TokenChecked;

        let binding = match self.claims.fph.clone() {
            Some(expected) => {
                let presented = self
                    .state
                    .cookies()
                    .presented_fingerprint(self.headers)
                    .ok_or_else(|| reject(self.state, stage, AuthErrorKind::FingerprintMissing))?;
                if !fingerprint::matches(presented, &expected) {
                    return Err(reject(self.state, stage, AuthErrorKind::FingerprintMismatch));
                }
                Binding::Fingerprint(expected)
            }
            None if self.state.fingerprint_policy().allows_unbound() => {
                debug!(user_id = %self.claims.sub, "Accepting legacy unbound refresh token");
                Binding::Legacy
            }
            None => return Err(reject(self.state, stage, AuthErrorKind::TokenInvalid)),
        };

        debug!(stage = %SessionStage::FingerprintChecked, user_id = %self.claims.sub, "Session stage");
        Ok(FingerprintChecked {
            state: self.state,
            claims: self.claims,
            binding,
        })
    }
}

struct FingerprintChecked<'a, S> {
    state: &'a S,
    claims: SessionClaims,
    binding: Binding,
}

impl<'a, S: HasAuthBackend> FingerprintChecked<'a, S> {
    async fn verify_store(self) -> Result<StoreVerified<'a, S>, AuthError> {
        let stage = SessionStage::FingerprintChecked;
        let store = self.state.db().tokens();
        let store_failure = |e: String| {
            error!(user_id = %self.claims.sub, error = %e, "Failed to check refresh token");
            reject(self.state, stage, AuthErrorKind::StoreError)
        };

        let old_fingerprint_hash = match self.binding {
            Binding::Fingerprint(hash) => {
                let active = store
                    .verify_token(&self.claims.sub, &hash)
                    .await
                    .map_err(|e| store_failure(e.to_string()))?;
                if !active {
                    return Err(reject(self.state, stage, AuthErrorKind::StoreInactive));
                }
                hash
            }
            Binding::Legacy => {
                let now = unix_now().map_err(|e| store_failure(e.to_string()))?;
                let record = store
                    .get(&self.claims.jti)
                    .await
                    .map_err(|e| store_failure(e.to_string()))?
                    .filter(|r| r.user_id == self.claims.sub && r.is_active(now as i64))
                    .ok_or_else(|| reject(self.state, stage, AuthErrorKind::StoreInactive))?;
                record.fingerprint_hash
            }
        };

        debug!(stage = %SessionStage::StoreVerified, user_id = %self.claims.sub, "Session stage");
        Ok(StoreVerified {
            state: self.state,
            claims: self.claims,
            old_fingerprint_hash,
        })
    }
}

struct StoreVerified<'a, S> {
    state: &'a S,
    claims: SessionClaims,
    old_fingerprint_hash: String,
}

impl<'a, S: HasAuthBackend> StoreVerified<'a, S> {
    /// Load the subject, then rotate. The new pair takes its admin flag from
    /// the user row, not from the token being replaced.
    async fn rotate(self) -> Result<Rotated, AuthError> {
        let stage = SessionStage::StoreVerified;
        let user_id = self.claims.sub.as_str();

        let user = match self.state.db().users().get_by_id(user_id).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                return Err(reject(self.state, stage, AuthErrorKind::IdentityFetchFailure));
            }
            Err(e) => {
                error!(user_id = %user_id, error = %e, "Failed to load user");
                return Err(reject(self.state, stage, AuthErrorKind::IdentityFetchFailure));
            }
        };

        let tokens = SessionTokens::mint(self.state.jwt(), user_id, user.is_admin).map_err(|e| {
            error!(user_id = %user_id, error = %e, "Failed to sign rotated tokens");
            reject(self.state, stage, AuthErrorKind::StoreError)
        })?;

        let rotated = self
            .state
            .db()
            .tokens()
            .rotate_token(user_id, &self.old_fingerprint_hash, &tokens.record(user_id))
            .await;

        match rotated {
            Ok(_) => {}
            Err(StoreError::NotActive) => {
                info!(user_id = %user_id, "Lost refresh rotation race");
                return Err(reject(self.state, stage, AuthErrorKind::StoreInactive));
            }
            Err(e) => {
                error!(user_id = %user_id, error = %e, "Failed to rotate refresh token");
                return Err(reject(self.state, stage, AuthErrorKind::StoreError));
            }
        }

        debug!(stage = %SessionStage::Rotated, user_id = %user_id, jti = %tokens.refresh.jti, "Session stage");
        Ok(Rotated { tokens, user })
    }
}

struct Rotated {
    tokens: SessionTokens,
    user: User,
}

impl Rotated {
    fn into_session(self) -> RefreshedSession {
        RefreshedSession {
            tokens: self.tokens,
            user: PublicUser::from(self.user),
        }
    }
}
