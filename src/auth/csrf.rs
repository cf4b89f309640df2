//! Double-submit CSRF protection.
//!
//! Unsafe requests must echo the CSRF cookie in the `X-CSRF-Token` header.
//! A cross-site page can make the browser send the cookie but cannot read
//! it, so it cannot produce the header.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;

use super::cookie::{CSRF_HEADER, CookiePolicy, get_cookie, get_header};
use crate::api::ApiError;

/// Error code clients look for to trigger a CSRF resync.
pub const CSRF_ERROR_CODE: &str = "EBADCSRFTOKEN";

fn is_safe(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE)
}

/// Check the header against the cookie in constant time.
pub fn csrf_matches(headers: &HeaderMap, cookies: &CookiePolicy) -> bool {
    let (Some(cookie), Some(header)) = (
        get_cookie(headers, cookies.names.csrf).filter(|v| !v.is_empty()),
        get_header(headers, CSRF_HEADER),
    ) else {
        return false;
    };

    cookie.len() == header.len() && openssl::memcmp::eq(cookie.as_bytes(), header.as_bytes())
}

/// Middleware rejecting unsafe requests whose CSRF header does not match the cookie.
pub async fn require_csrf(
    State(cookies): State<Arc<CookiePolicy>>,
    request: Request,
    next: Next,
) -> Response {
    if is_safe(request.method()) || csrf_matches(request.headers(), &cookies) {
        return next.run(request).await;
    }

    warn!(
        method = %request.method(),
        path = %request.uri().path(),
        "Rejected request with invalid CSRF token"
    );
    ApiError::Csrf.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, header};

    fn headers(cookie: Option<&'static str>, header_value: Option<&'static str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(c) = cookie {
            headers.insert(header::COOKIE, HeaderValue::from_static(c));
        }
        if let Some(h) = header_value {
            headers.insert(CSRF_HEADER, HeaderValue::from_static(h));
        }
        headers
    }

    #[test]
    fn test_matching_token() {
        let policy = CookiePolicy::new(false, false, "/api/auth");
        assert!(csrf_matches(
            &headers(Some("csrf_token=abc"), Some("abc")),
            &policy
        ));
    }

    #[test]
    fn test_mismatched_or_missing_token() {
        let policy = CookiePolicy::new(false, false, "/api/auth");
        assert!(!csrf_matches(
            &headers(Some("csrf_token=abc"), Some("abd")),
            &policy
        ));
        assert!(!csrf_matches(
            &headers(Some("csrf_token=abc"), Some("abcd")),
            &policy
        ));
        assert!(!csrf_matches(&headers(None, Some("abc")), &policy));
        assert!(!csrf_matches(&headers(Some("csrf_token=abc"), None), &policy));
        assert!(!csrf_matches(&headers(Some("csrf_token="), Some("")), &policy));
    }

    #[test]
    fn test_production_cookie_name() {
        let policy = CookiePolicy::new(true, false, "/api/auth");
        assert!(csrf_matches(
            &headers(Some("__Secure-csrf_token=abc"), Some("abc")),
            &policy
        ));
        assert!(!csrf_matches(
            &headers(Some("csrf_token=abc"), Some("abc")),
            &policy
        ));
    }

    #[test]
    fn test_safe_methods() {
        assert!(is_safe(&Method::GET));
        assert!(!is_safe(&Method::POST));
        assert!(!is_safe(&Method::DELETE));
    }
}
