#![allow(dead_code)]

use std::collections::HashMap;

use axum::{
    Router,
    body::Body,
    http::{Request, Response, StatusCode, header},
};
use parley::{ServerConfig, create_app, db::Database, rate_limit::RateLimitSettings};
use serde_json::Value;
use tower::ServiceExt;

pub const ACCESS_SECRET: &[u8] = b"test-access-secret-0123456789abcdef";
pub const REFRESH_SECRET: &[u8] = b"test-refresh-secret-0123456789abcdef";
pub const PASSWORD: &str = "correct horse battery";

/// Oneshot requests have no peer address, so every caller shares one
/// rate-limit key. Keep the limits out of the way unless a test wants them.
pub fn test_config(db: Database) -> ServerConfig {
    let mut config = ServerConfig::new(db, ACCESS_SECRET, REFRESH_SECRET);
    config.rate_limits = RateLimitSettings {
        login_per_minute: 1000,
        register_per_minute: 1000,
        trust_proxy: false,
    };
    config
}

pub async fn create_test_app() -> (Router, Database) {
    let db = Database::open(":memory:")
        .await
        .expect("Failed to open test database");
    let app = create_app(&test_config(db.clone()));
    (app, db)
}

/// Cookies and echoed values of one browser session.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub user_id: String,
    pub access: String,
    pub refresh: String,
    pub fingerprint: String,
    pub csrf: String,
}

impl Session {
    /// `Cookie` header carrying every session cookie.
    pub fn cookie_header(&self) -> String {
        format!(
            "access_token={}; refresh_token={}; x-fingerprint={}; csrf_token={}",
            self.access, self.refresh, self.fingerprint, self.csrf
        )
    }

    /// Apply the cookies a response set. Cleared cookies become empty.
    pub fn update(&mut self, cookies: &HashMap<String, String>) {
        for (name, value) in cookies {
            match name.as_str() {
                "access_token" => self.access = value.clone(),
                "refresh_token" => self.refresh = value.clone(),
                "x-fingerprint" => self.fingerprint = value.clone(),
                "csrf_token" => self.csrf = value.clone(),
                _ => {}
            }
        }
    }
}

/// Name/value pairs from every `Set-Cookie` header.
pub fn set_cookies<B>(response: &Response<B>) -> HashMap<String, String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .collect()
}

/// Raw `Set-Cookie` header for `name`.
pub fn set_cookie_header<B>(response: &Response<B>, name: &str) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with(&format!("{}=", name)))
        .map(str::to_string)
}

pub async fn body_json(response: Response<Body>) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap_or(Value::Null)
}

pub fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Request carrying the session cookies and the CSRF header.
pub fn session_request(method: &str, uri: &str, session: &Session) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::COOKIE, session.cookie_header())
        .header("x-csrf-token", &session.csrf)
        .body(Body::empty())
        .unwrap()
}

pub async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.unwrap()
}

pub async fn register(app: &Router, username: &str) -> Session {
    let response = send(
        app,
        json_request(
            "POST",
            "/api/auth/register",
            serde_json::json!({
                "username": username,
                "email": format!("{}@example.com", username),
                "password": PASSWORD,
            }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let mut session = Session::default();
    session.update(&set_cookies(&response));
    let json = body_json(response).await;
    session.user_id = json["data"]["user"]["user_id"]
        .as_str()
        .unwrap()
        .to_string();
    session
}

pub async fn login(app: &Router, identifier: &str) -> Session {
    let response = send(
        app,
        json_request(
            "POST",
            "/api/auth/login",
            serde_json::json!({ "identifier": identifier, "password": PASSWORD }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let mut session = Session::default();
    session.update(&set_cookies(&response));
    let json = body_json(response).await;
    session.user_id = json["data"]["user"]["user_id"]
        .as_str()
        .unwrap()
        .to_string();
    session
}

/// POST /refresh-token with the session's cookies.
pub async fn refresh(app: &Router, session: &Session) -> Response<Body> {
    send(app, session_request("POST", "/api/auth/refresh-token", session)).await
}
