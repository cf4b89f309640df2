pub mod api;
pub mod auth;
pub mod cleanup;
pub mod cli;
pub mod client;
pub mod db;
pub mod fingerprint;
pub mod jwt;
pub mod password;
pub mod rate_limit;

use api::create_api_router;
use auth::{CookiePolicy, FingerprintPolicy};
use axum::Router;
use db::Database;
use jwt::{ACCESS_TOKEN_DURATION_SECS, Algorithm, JwtConfig, REFRESH_TOKEN_DURATION_SECS};
use rate_limit::{RateLimitConfig, RateLimitSettings};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Mount point of the API router.
pub const API_PATH: &str = "/api";

pub struct ServerConfig {
    /// Database connection (cloneable, uses connection pool internally)
    pub db: Database,
    /// Secret for signing access tokens
    pub access_secret: Vec<u8>,
    /// Secret for signing refresh tokens. Must differ from the access secret
    pub refresh_secret: Vec<u8>,
    /// HMAC algorithm for both token kinds
    pub algorithm: Algorithm,
    /// Access token lifetime in seconds
    pub access_ttl: u64,
    /// Refresh token lifetime in seconds
    pub refresh_ttl: u64,
    /// Production cookie naming (`__Host-`/`__Secure-` prefixes, always Secure)
    pub production: bool,
    /// Whether to set Secure flag on cookies outside production
    pub secure_cookies: bool,
    /// Whether tokens without a fingerprint hash are accepted
    pub fingerprint_policy: FingerprintPolicy,
    /// Per-client limits on login and registration
    pub rate_limits: RateLimitSettings,
    /// Interval between expired-token sweeps
    pub cleanup_interval: Duration,
}

impl ServerConfig {
    /// Configuration with default lifetimes, algorithm and limits.
    pub fn new(db: Database, access_secret: &[u8], refresh_secret: &[u8]) -> Self {
        Self {
            db,
            access_secret: access_secret.to_vec(),
            refresh_secret: refresh_secret.to_vec(),
            algorithm: Algorithm::HS256,
            access_ttl: ACCESS_TOKEN_DURATION_SECS,
            refresh_ttl: REFRESH_TOKEN_DURATION_SECS,
            production: false,
            secure_cookies: false,
            fingerprint_policy: FingerprintPolicy::Required,
            rate_limits: RateLimitSettings::default(),
            cleanup_interval: cleanup::DEFAULT_CLEANUP_INTERVAL,
        }
    }

    /// Cookie policy derived from this configuration.
    pub fn cookie_policy(&self) -> CookiePolicy {
        CookiePolicy::new(
            self.production,
            self.secure_cookies,
            format!("{}/auth", API_PATH),
        )
    }
}

/// Create the application router with the given configuration.
pub fn create_app(config: &ServerConfig) -> Router {
    let jwt = Arc::new(
        JwtConfig::new(&config.access_secret, &config.refresh_secret)
            .with_algorithm(config.algorithm)
            .with_lifetimes(config.access_ttl, config.refresh_ttl),
    );

    let api_router = create_api_router(
        config.db.clone(),
        jwt,
        Arc::new(config.cookie_policy()),
        config.fingerprint_policy,
        Arc::new(RateLimitConfig::new(&config.rate_limits)),
    );

    Router::new().nest(API_PATH, api_router)
}

/// Run cleanup tasks and spawn background scheduler.
/// Call this before starting the server.
pub async fn init_cleanup(db: &Database, every: Duration) {
    cleanup::run_cleanup(db).await;
    cleanup::spawn_cleanup_scheduler(db.clone(), every);
}

/// Run the server on the given listener. This function blocks until the server exits.
/// Call `init_cleanup` before this to run cleanup on startup.
pub async fn run_server(config: ServerConfig, listener: TcpListener) -> Result<(), std::io::Error> {
    let app = create_app(&config);
    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, make_service).await
}

/// Start the server on the given port in a background task. Use port 0 to let the OS choose a random port.
/// Returns the actual address the server is listening on.
/// Note: For production use, prefer `run_server` directly in main.
pub async fn start_server(
    config: ServerConfig,
    port: u16,
) -> Result<(tokio::task::JoinHandle<()>, SocketAddr), std::io::Error> {
    init_cleanup(&config.db, config.cleanup_interval).await;

    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    let local_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = run_server(config, listener).await {
            tracing::error!(error = %e, "Server error");
        }
    });

    Ok((handle, local_addr))
}
