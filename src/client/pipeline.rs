//! Request pipeline: security headers out, recovery on the way back.
//!
//! Outbound, every request carries `X-CSRF-Token` and `X-Fingerprint` from the
//! local store. Inbound, a CSRF rejection resyncs the token from its cookie
//! and retries, and a 401 runs refresh plus status check before retrying.
//! Each recovery is bounded by a [`RetryBudget`].

use std::sync::{Mutex, PoisonError};

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, info, warn};

use super::error::ClientError;
use super::state::{AuthAction, ClientAuthState, reduce};
use super::store::{ClientTokenStore, SyncOutcome};
use super::transport::{ApiRequest, ApiResponse, Transport};
use crate::auth::{CSRF_ERROR_CODE, CSRF_HEADER, CookieNames, FINGERPRINT_HEADER};
use crate::db::PublicUser;
use crate::jwt::ACCESS_TOKEN_DURATION_SECS;

const REGISTER_PATH: &str = "/api/auth/register";
const LOGIN_PATH: &str = "/api/auth/login";
const LOGOUT_PATH: &str = "/api/auth/logout";
const REFRESH_PATH: &str = "/api/auth/refresh-token";
const STATUS_PATH: &str = "/api/auth/is-authenticated";
const CSRF_PATH: &str = "/api/auth/csrf-token";
const ME_PATH: &str = "/api/users/me";

/// How many recoveries a single request may attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    pub csrf: u8,
    pub auth: u8,
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self { csrf: 1, auth: 1 }
    }
}

/// New-account input.
#[derive(Debug, Clone)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password: String,
    pub full_name: Option<String>,
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct SessionData {
    user: PublicUser,
    csrf: String,
    fingerprint: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshData {
    user: PublicUser,
    csrf: String,
    fingerprint: String,
    expires_at: Option<u64>,
}

#[derive(Deserialize)]
struct CsrfData {
    csrf: String,
}

fn decode<T: DeserializeOwned>(response: ApiResponse) -> Result<T, ClientError> {
    Ok(serde_json::from_value(response.body)?)
}

/// 401 from these endpoints is a real answer, not a stale session.
fn is_session_endpoint(path: &str) -> bool {
    [REGISTER_PATH, LOGIN_PATH, REFRESH_PATH, STATUS_PATH].contains(&path)
}

/// API client driving the session protocol over a [`Transport`].
pub struct ApiClient<T> {
    transport: T,
    names: CookieNames,
    store: ClientTokenStore,
    state: Mutex<ClientAuthState>,
    budget: RetryBudget,
}

impl<T: Transport> ApiClient<T> {
    /// `names` must match the server's cookie naming (dev or production).
    pub fn new(transport: T, names: CookieNames) -> Self {
        Self {
            transport,
            names,
            store: ClientTokenStore::new(ACCESS_TOKEN_DURATION_SECS),
            state: Mutex::new(ClientAuthState::default()),
            budget: RetryBudget::default(),
        }
    }

    pub fn with_budget(mut self, budget: RetryBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_access_ttl(mut self, access_ttl: u64) -> Self {
        self.store = ClientTokenStore::new(access_ttl);
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn tokens(&self) -> &ClientTokenStore {
        &self.store
    }

    /// Current auth state.
    pub fn state(&self) -> ClientAuthState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn dispatch(&self, action: AuthAction) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        *state = reduce(&state, action);
    }

    /// Reconcile the local fingerprint and CSRF token against the cookies.
    pub fn sync_all_tokens(&self) -> SyncOutcome {
        let fingerprint = self.transport.cookie(self.names.fingerprint);
        let csrf = self.transport.cookie(self.names.csrf);
        let outcome = self
            .store
            .sync_all_tokens(fingerprint.as_deref(), csrf.as_deref());
        if outcome.changed() {
            debug!(
                fingerprint_changed = outcome.fingerprint_changed,
                csrf_changed = outcome.csrf_changed,
                "Resynchronized tokens from cookies"
            );
        }
        outcome
    }

    /// Attach the security headers from the local store.
    fn prepare(&self, request: &ApiRequest) -> ApiRequest {
        let mut outbound = request.clone();
        let tokens = self.store.snapshot();

        match tokens.csrf {
            Some(csrf) => outbound.headers.push((CSRF_HEADER.to_string(), csrf)),
            None => debug!(path = %request.path, "No CSRF token to attach"),
        }
        match tokens.fingerprint {
            Some(fp) => outbound.headers.push((FINGERPRINT_HEADER.to_string(), fp)),
            None => debug!(path = %request.path, "No fingerprint to attach"),
        }
        outbound
    }

    async fn send_once(&self, request: &ApiRequest) -> Result<ApiResponse, ClientError> {
        let outbound = self.prepare(request);
        self.transport.send(&outbound).await
    }

    /// Send with the default budget. Non-success statuses become `ClientError::Api`.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ClientError> {
        self.send_with_budget(request, self.budget).await
    }

    /// Send, recovering from CSRF and auth failures at most as often as `budget` allows.
    pub async fn send_with_budget(
        &self,
        request: ApiRequest,
        mut budget: RetryBudget,
    ) -> Result<ApiResponse, ClientError> {
        loop {
            let response = self.send_csrf_guarded(&request, &mut budget.csrf).await?;
            if response.is_success() {
                return Ok(response);
            }

            if response.status == 401 && !is_session_endpoint(&request.path) {
                if budget.auth == 0 {
                    return Err(response.into_error());
                }
                budget.auth -= 1;

                if self.verify_auth().await? {
                    debug!(path = %request.path, "Retrying after session refresh");
                    continue;
                }
                return Err(ClientError::SessionExpired);
            }

            return Err(response.into_error());
        }
    }

    /// Send, resyncing the CSRF token from its cookie after a CSRF rejection.
    /// The final response is returned as is, whatever its status.
    async fn send_csrf_guarded(
        &self,
        request: &ApiRequest,
        csrf_budget: &mut u8,
    ) -> Result<ApiResponse, ClientError> {
        loop {
            let response = self.send_once(request).await?;
            let csrf_rejected =
                response.status == 403 && response.error_code() == Some(CSRF_ERROR_CODE);
            if !csrf_rejected || *csrf_budget == 0 {
                return Ok(response);
            }
            *csrf_budget -= 1;

            let cookie = self.transport.cookie(self.names.csrf);
            if !self.store.sync_csrf(cookie.as_deref()) {
                warn!(path = %request.path, "CSRF rejected and the cookie holds no newer token");
                return Ok(response);
            }
            debug!(path = %request.path, "Retrying after CSRF resync");
        }
    }

    fn apply_refresh(&self, data: RefreshData) -> PublicUser {
        self.store
            .set_session(&data.fingerprint, &data.csrf, data.expires_at);
        data.user
    }

    /// Refresh the session, then confirm it with a status check.
    /// Returns whether the session is usable.
    pub async fn verify_auth(&self) -> Result<bool, ClientError> {
        let mut csrf_budget = self.budget.csrf;

        let refreshed = self
            .send_csrf_guarded(&ApiRequest::post(REFRESH_PATH, None), &mut csrf_budget)
            .await?;
        if !refreshed.is_success() {
            info!(status = refreshed.status, "Session refresh failed");
            self.expire_session();
            return Ok(false);
        }
        self.apply_refresh(decode(refreshed)?);

        let status = self
            .send_csrf_guarded(&ApiRequest::get(STATUS_PATH), &mut csrf_budget)
            .await?;
        if !status.is_success() {
            info!(status = status.status, "Status check failed after refresh");
            self.expire_session();
            return Ok(false);
        }
        let user = self.apply_refresh(decode(status)?);
        self.dispatch(AuthAction::CheckAuthStatus(Some(user)));
        Ok(true)
    }

    /// Ask the server whether the session is valid, rotating it on success.
    pub async fn check_auth_status(&self) -> Result<bool, ClientError> {
        let mut csrf_budget = self.budget.csrf;
        let response = self
            .send_csrf_guarded(&ApiRequest::get(STATUS_PATH), &mut csrf_budget)
            .await?;
        if response.is_success() {
            let user = self.apply_refresh(decode(response)?);
            self.dispatch(AuthAction::CheckAuthStatus(Some(user)));
            return Ok(true);
        }
        if response.status == 401 {
            return self.verify_auth().await;
        }
        self.expire_session();
        Ok(false)
    }

    fn expire_session(&self) {
        self.store.clear();
        self.dispatch(AuthAction::CheckAuthStatus(None));
    }

    async fn start_session(&self, request: ApiRequest) -> Result<PublicUser, ClientError> {
        self.dispatch(AuthAction::Start);
        let result = match self.send(request).await {
            Ok(response) => decode::<Envelope<SessionData>>(response).map(|e| e.data),
            Err(e) => Err(e),
        };

        match result {
            Ok(data) => {
                self.store.set_session(&data.fingerprint, &data.csrf, None);
                self.dispatch(AuthAction::Succeeded(data.user.clone()));
                Ok(data.user)
            }
            Err(e) => {
                let message = match &e {
                    ClientError::Api { message, .. } => message.clone(),
                    other => other.to_string(),
                };
                self.dispatch(AuthAction::Failure(message));
                Err(e)
            }
        }
    }

    pub async fn register(&self, registration: &Registration) -> Result<PublicUser, ClientError> {
        let body = json!({
            "username": registration.username,
            "email": registration.email,
            "password": registration.password,
            "full_name": registration.full_name,
        });
        self.start_session(ApiRequest::post(REGISTER_PATH, Some(body)))
            .await
    }

    pub async fn login(&self, identifier: &str, password: &str) -> Result<PublicUser, ClientError> {
        let body = json!({ "identifier": identifier, "password": password });
        self.start_session(ApiRequest::post(LOGIN_PATH, Some(body)))
            .await
    }

    /// End the session. Local state is cleared even if the server call fails.
    pub async fn logout(&self) -> Result<(), ClientError> {
        let result = self.send(ApiRequest::post(LOGOUT_PATH, None)).await;
        self.store.clear();
        self.dispatch(AuthAction::Logout);
        result.map(|_| ())
    }

    /// Fetch (or re-issue) the CSRF token.
    pub async fn fetch_csrf_token(&self) -> Result<String, ClientError> {
        let response = self.send(ApiRequest::get(CSRF_PATH)).await?;
        let data: Envelope<CsrfData> = decode(response)?;
        self.store.sync_csrf(Some(&data.data.csrf));
        Ok(data.data.csrf)
    }

    pub async fn me(&self) -> Result<PublicUser, ClientError> {
        let response = self.send(ApiRequest::get(ME_PATH)).await?;
        let data: Envelope<PublicUser> = decode(response)?;
        Ok(data.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::DEV_COOKIE_NAMES;
    use serde_json::Value;
    use std::collections::{HashMap, VecDeque};

    /// Scripted transport: replies in order and records what it was sent.
    #[derive(Default)]
    struct MockTransport {
        replies: Mutex<VecDeque<ApiResponse>>,
        sent: Mutex<Vec<ApiRequest>>,
        cookies: Mutex<HashMap<String, String>>,
    }

    impl MockTransport {
        fn reply(self, status: u16, body: Value) -> Self {
            self.replies
                .lock()
                .unwrap()
                .push_back(ApiResponse { status, body });
            self
        }

        fn with_cookie(self, name: &str, value: &str) -> Self {
            self.cookies
                .lock()
                .unwrap()
                .insert(name.to_string(), value.to_string());
            self
        }

        fn sent(&self) -> Vec<ApiRequest> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl Transport for MockTransport {
        async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ClientError> {
            self.sent.lock().unwrap().push(request.clone());
            let reply = self.replies.lock().unwrap().pop_front();
            Ok(reply.unwrap_or(ApiResponse {
                status: 500,
                body: json!({ "success": false, "message": "no scripted reply" }),
            }))
        }

        fn cookie(&self, name: &str) -> Option<String> {
            self.cookies.lock().unwrap().get(name).cloned()
        }
    }

    fn csrf_rejection() -> Value {
        json!({ "success": false, "message": "Invalid CSRF token", "error": "EBADCSRFTOKEN" })
    }

    fn user_json() -> Value {
        json!({ "user_id": "u1", "username": "alice", "email": "alice@example.com" })
    }

    fn refresh_body(fingerprint: &str, csrf: &str) -> Value {
        json!({
            "message": "Token refreshed",
            "authenticated": true,
            "user": user_json(),
            "csrf": csrf,
            "fingerprint": fingerprint,
            "expiresAt": 4_000_000_000u64,
        })
    }

    #[tokio::test]
    async fn test_outbound_headers_attached() {
        let client = ApiClient::new(
            MockTransport::default().reply(200, json!({ "success": true })),
            DEV_COOKIE_NAMES,
        );
        client.tokens().set_session("fp", "csrf", None);

        client.send(ApiRequest::get("/api/anything")).await.unwrap();

        let sent = client.transport().sent();
        assert_eq!(sent[0].header(CSRF_HEADER), Some("csrf"));
        assert_eq!(sent[0].header(FINGERPRINT_HEADER), Some("fp"));
    }

    #[tokio::test]
    async fn test_missing_tokens_are_not_fatal() {
        let client = ApiClient::new(
            MockTransport::default().reply(200, json!({ "success": true })),
            DEV_COOKIE_NAMES,
        );
        client.send(ApiRequest::get("/api/anything")).await.unwrap();
        assert!(client.transport().sent()[0].headers.is_empty());
    }

    #[tokio::test]
    async fn test_csrf_rejection_retried_once_with_cookie_value() {
        let transport = MockTransport::default()
            .with_cookie("csrf_token", "fresh")
            .reply(403, csrf_rejection())
            .reply(200, json!({ "success": true }));
        let client = ApiClient::new(transport, DEV_COOKIE_NAMES);
        client.tokens().set_session("fp", "stale", None);

        client
            .send(ApiRequest::post("/api/posts", None))
            .await
            .unwrap();

        let sent = client.transport().sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].header(CSRF_HEADER), Some("stale"));
        assert_eq!(sent[1].header(CSRF_HEADER), Some("fresh"));
    }

    #[tokio::test]
    async fn test_csrf_rejection_not_retried_twice() {
        let transport = MockTransport::default()
            .with_cookie("csrf_token", "fresh")
            .reply(403, csrf_rejection())
            .reply(403, csrf_rejection());
        let client = ApiClient::new(transport, DEV_COOKIE_NAMES);

        let err = client
            .send(ApiRequest::post("/api/posts", None))
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(403));
        assert_eq!(client.transport().sent().len(), 2);
    }

    #[tokio::test]
    async fn test_csrf_rejection_without_cookie_propagates() {
        let transport = MockTransport::default().reply(403, csrf_rejection());
        let client = ApiClient::new(transport, DEV_COOKIE_NAMES);

        let err = client
            .send(ApiRequest::post("/api/posts", None))
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::Api { status: 403, .. }));
        assert_eq!(client.transport().sent().len(), 1);
    }

    #[tokio::test]
    async fn test_csrf_rejection_with_unchanged_cookie_propagates() {
        let transport = MockTransport::default()
            .with_cookie("csrf_token", "same")
            .reply(403, csrf_rejection())
            .reply(200, json!({ "success": true }));
        let client = ApiClient::new(transport, DEV_COOKIE_NAMES);
        client.tokens().set_session("fp", "same", None);

        let err = client
            .send(ApiRequest::post("/api/posts", None))
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(403));
        assert_eq!(client.transport().sent().len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_recovers_from_stale_csrf() {
        let transport = MockTransport::default()
            .with_cookie("csrf_token", "fresh")
            .reply(403, csrf_rejection())
            .reply(200, refresh_body("fp-2", "csrf-2"))
            .reply(200, refresh_body("fp-3", "csrf-2"));
        let client = ApiClient::new(transport, DEV_COOKIE_NAMES);
        client.tokens().set_session("fp-1", "stale", None);

        assert!(client.verify_auth().await.unwrap());

        let sent = client.transport().sent();
        let paths: Vec<&str> = sent.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, vec![REFRESH_PATH, REFRESH_PATH, STATUS_PATH]);
        assert_eq!(sent[0].header(CSRF_HEADER), Some("stale"));
        assert_eq!(sent[1].header(CSRF_HEADER), Some("fresh"));
        assert_eq!(client.tokens().fingerprint().as_deref(), Some("fp-3"));
        assert!(client.state().authenticated);
    }

    #[tokio::test]
    async fn test_refresh_csrf_rejection_without_resync_fails_verification() {
        let transport = MockTransport::default().reply(403, csrf_rejection());
        let client = ApiClient::new(transport, DEV_COOKIE_NAMES);
        client.tokens().set_session("fp", "csrf", None);

        assert!(!client.verify_auth().await.unwrap());
        assert_eq!(client.transport().sent().len(), 1);
        assert_eq!(client.tokens().fingerprint(), None);
        assert!(!client.state().authenticated);
    }

    #[tokio::test]
    async fn test_zero_budget_disables_retry() {
        let transport = MockTransport::default()
            .with_cookie("csrf_token", "fresh")
            .reply(403, csrf_rejection());
        let client = ApiClient::new(transport, DEV_COOKIE_NAMES)
            .with_budget(RetryBudget { csrf: 0, auth: 0 });

        assert!(client.send(ApiRequest::post("/api/posts", None)).await.is_err());
        assert_eq!(client.transport().sent().len(), 1);
    }

    #[tokio::test]
    async fn test_unauthorized_triggers_refresh_and_single_retry() {
        let transport = MockTransport::default()
            .reply(401, json!({ "success": false, "message": "Not authenticated" }))
            .reply(200, refresh_body("fp-2", "csrf-2"))
            .reply(200, refresh_body("fp-3", "csrf-2"))
            .reply(200, json!({ "success": true }));
        let client = ApiClient::new(transport, DEV_COOKIE_NAMES);
        client.tokens().set_session("fp-1", "csrf-1", None);

        client.send(ApiRequest::get("/api/feed")).await.unwrap();

        let paths: Vec<String> = client
            .transport()
            .sent()
            .into_iter()
            .map(|r| r.path)
            .collect();
        assert_eq!(
            paths,
            vec!["/api/feed", REFRESH_PATH, STATUS_PATH, "/api/feed"]
        );
        assert_eq!(client.tokens().fingerprint().as_deref(), Some("fp-3"));
        assert!(client.state().authenticated);
    }

    #[tokio::test]
    async fn test_failed_refresh_expires_session() {
        let transport = MockTransport::default()
            .reply(401, json!({ "success": false, "message": "Not authenticated" }))
            .reply(403, json!({ "success": false, "message": "Refresh token has been revoked or expired" }));
        let client = ApiClient::new(transport, DEV_COOKIE_NAMES);
        client.tokens().set_session("fp", "csrf", None);

        let err = client.send(ApiRequest::get("/api/feed")).await.unwrap_err();

        assert!(matches!(err, ClientError::SessionExpired));
        assert_eq!(client.tokens().fingerprint(), None);
        assert!(!client.state().authenticated);
    }

    #[tokio::test]
    async fn test_login_failure_does_not_refresh() {
        let transport = MockTransport::default()
            .reply(401, json!({ "success": false, "message": "Invalid credentials" }));
        let client = ApiClient::new(transport, DEV_COOKIE_NAMES);

        let err = client.login("alice", "wrong").await.unwrap_err();

        assert_eq!(err.status(), Some(401));
        assert_eq!(client.transport().sent().len(), 1);
        assert_eq!(client.state().error.as_deref(), Some("Invalid credentials"));
    }

    #[tokio::test]
    async fn test_login_stores_session() {
        let transport = MockTransport::default().reply(
            200,
            json!({
                "success": true,
                "data": { "user": user_json(), "csrf": "c", "fingerprint": "f" },
            }),
        );
        let client = ApiClient::new(transport, DEV_COOKIE_NAMES);

        let user = client.login("alice", "password123").await.unwrap();

        assert_eq!(user.username, "alice");
        assert_eq!(client.tokens().csrf().as_deref(), Some("c"));
        assert_eq!(client.tokens().fingerprint().as_deref(), Some("f"));
        assert!(client.state().authenticated);
    }

    #[tokio::test]
    async fn test_sync_all_tokens_from_cookies() {
        let transport = MockTransport::default()
            .with_cookie("x-fingerprint", "cookie-fp")
            .with_cookie("csrf_token", "cookie-csrf");
        let client = ApiClient::new(transport, DEV_COOKIE_NAMES);
        client.tokens().set_session("stale-fp", "stale-csrf", None);

        assert!(client.sync_all_tokens().changed());
        let writes = client.tokens().writes();
        assert!(!client.sync_all_tokens().changed());
        assert_eq!(client.tokens().writes(), writes);
        assert_eq!(client.tokens().csrf().as_deref(), Some("cookie-csrf"));
    }
}
