//! Rate limiting for credential endpoints.
//!
//! Uses a token bucket algorithm with per-IP tracking to slow down
//! password guessing and registration spam.

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{Quota, RateLimiter, clock::DefaultClock, state::keyed::DefaultKeyedStateStore};
use std::{net::SocketAddr, num::NonZeroU32, sync::Arc};
use tracing::warn;

use crate::api::ApiError;

/// Per-IP rate limiter.
pub type IpLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Default login attempts per minute per IP.
pub const DEFAULT_LOGIN_PER_MINUTE: u32 = 10;

/// Default registrations per minute per IP.
pub const DEFAULT_REGISTER_PER_MINUTE: u32 = 3;

/// Limits as configured on the command line.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitSettings {
    pub login_per_minute: u32,
    pub register_per_minute: u32,
    /// Key clients by the first `X-Forwarded-For` entry instead of the socket address
    pub trust_proxy: bool,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            login_per_minute: DEFAULT_LOGIN_PER_MINUTE,
            register_per_minute: DEFAULT_REGISTER_PER_MINUTE,
            trust_proxy: false,
        }
    }
}

/// Rate limiters for the credential endpoints.
#[derive(Clone)]
pub struct RateLimitConfig {
    pub login: Arc<IpLimiter>,
    pub register: Arc<IpLimiter>,
    trust_proxy: bool,
}

fn per_minute(n: u32) -> Quota {
    Quota::per_minute(NonZeroU32::new(n).unwrap_or(NonZeroU32::MIN))
}

impl RateLimitConfig {
    pub fn new(settings: &RateLimitSettings) -> Self {
        Self {
            login: Arc::new(RateLimiter::keyed(per_minute(settings.login_per_minute))),
            register: Arc::new(RateLimiter::keyed(per_minute(settings.register_per_minute))),
            trust_proxy: settings.trust_proxy,
        }
    }

    /// Key for the client that sent `request`.
    fn client_key(&self, request: &Request) -> String {
        if self.trust_proxy {
            let forwarded = request
                .headers()
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|ip| !ip.is_empty());
            if let Some(ip) = forwarded {
                return ip.to_string();
            }
        }

        request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

async fn check(limiter: &IpLimiter, key: String, request: Request, next: Next) -> Response {
    match limiter.check_key(&key) {
        Ok(_) => next.run(request).await,
        Err(_) => {
            warn!(client = %key, path = %request.uri().path(), "Rate limit exceeded");
            ApiError::too_many_requests("Too many attempts. Please wait before trying again.")
                .into_response()
        }
    }
}

/// Middleware for rate limiting login.
pub async fn rate_limit_login(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    let key = config.client_key(&request);
    check(&config.login, key, request, next).await
}

/// Middleware for rate limiting registration.
pub async fn rate_limit_register(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    let key = config.client_key(&request);
    check(&config.register, key, request, next).await
}
