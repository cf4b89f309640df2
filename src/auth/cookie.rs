//! Cookie naming, attributes and parsing for session cookies.

use axum::http::{HeaderMap, header};

/// Header carrying the raw fingerprint.
pub const FINGERPRINT_HEADER: &str = "x-fingerprint";

/// Header carrying the CSRF token (double-submit).
pub const CSRF_HEADER: &str = "x-csrf-token";

/// Names of the four session cookies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CookieNames {
    pub access: &'static str,
    pub refresh: &'static str,
    pub fingerprint: &'static str,
    pub csrf: &'static str,
}

/// Cookie names used in development (plain HTTP on localhost).
pub const DEV_COOKIE_NAMES: CookieNames = CookieNames {
    access: "access_token",
    refresh: "refresh_token",
    fingerprint: "x-fingerprint",
    csrf: "csrf_token",
};

/// Cookie names used in production. `__Host-` cookies must be Secure with
/// `Path=/`, so the path-scoped refresh cookie uses `__Secure-` instead.
pub const PROD_COOKIE_NAMES: CookieNames = CookieNames {
    access: "__Host-access_token",
    refresh: "__Secure-refresh_token",
    fingerprint: "__Host-x-fingerprint",
    csrf: "__Secure-csrf_token",
};

/// How session cookies are named and which attributes they carry.
#[derive(Debug, Clone)]
pub struct CookiePolicy {
    pub names: CookieNames,
    secure: bool,
    refresh_path: String,
}

impl CookiePolicy {
    /// `production` selects the prefixed names and forces `Secure`.
    /// `refresh_path` scopes the refresh cookie to the auth endpoints.
    pub fn new(production: bool, secure_cookies: bool, refresh_path: impl Into<String>) -> Self {
        Self {
            names: if production {
                PROD_COOKIE_NAMES
            } else {
                DEV_COOKIE_NAMES
            },
            secure: production || secure_cookies,
            refresh_path: refresh_path.into(),
        }
    }

    fn secure_attr(&self) -> &'static str {
        if self.secure { "; Secure" } else { "" }
    }

    pub fn access_cookie(&self, token: &str, max_age: u64) -> String {
        format!(
            "{}={}; HttpOnly; SameSite=Strict; Path=/; Max-Age={}{}",
            self.names.access,
            token,
            max_age,
            self.secure_attr()
        )
    }

    pub fn refresh_cookie(&self, token: &str, max_age: u64) -> String {
        format!(
            "{}={}; HttpOnly; SameSite=Strict; Path={}; Max-Age={}{}",
            self.names.refresh,
            token,
            self.refresh_path,
            max_age,
            self.secure_attr()
        )
    }

    /// Session cookie, readable by the client so it can resync its copy.
    pub fn fingerprint_cookie(&self, fingerprint: &str) -> String {
        format!(
            "{}={}; SameSite=Strict; Path=/{}",
            self.names.fingerprint,
            fingerprint,
            self.secure_attr()
        )
    }

    /// Session cookie, readable by the client for the double-submit header.
    pub fn csrf_cookie(&self, csrf: &str) -> String {
        format!(
            "{}={}; SameSite=Strict; Path=/{}",
            self.names.csrf,
            csrf,
            self.secure_attr()
        )
    }

    /// Raw fingerprint presented with a request: cookie first, then header.
    pub fn presented_fingerprint<'a>(&self, headers: &'a HeaderMap) -> Option<&'a str> {
        get_cookie(headers, self.names.fingerprint)
            .filter(|v| !v.is_empty())
            .or_else(|| get_header(headers, FINGERPRINT_HEADER))
    }

    /// `Set-Cookie` values that remove every session cookie.
    pub fn clear_all(&self) -> Vec<String> {
        let secure = self.secure_attr();
        vec![
            format!(
                "{}=; HttpOnly; SameSite=Strict; Path=/; Max-Age=0{}",
                self.names.access, secure
            ),
            format!(
                "{}=; HttpOnly; SameSite=Strict; Path={}; Max-Age=0{}",
                self.names.refresh, self.refresh_path, secure
            ),
            format!(
                "{}=; SameSite=Strict; Path=/; Max-Age=0{}",
                self.names.fingerprint, secure
            ),
            format!(
                "{}=; SameSite=Strict; Path=/; Max-Age=0{}",
                self.names.csrf, secure
            ),
        ]
    }
}

/// Extract a cookie value from the Cookie header.
pub fn get_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    for cookie_header in headers.get_all(header::COOKIE) {
        let Ok(cookie_header) = cookie_header.to_str() else {
            continue;
        };
        for part in cookie_header.split(';') {
            let part = part.trim();
            if let Some((key, value)) = part.split_once('=') {
                if key.trim() == name {
                    return Some(value.trim());
                }
            }
        }
    }
    None
}

/// Read a non-empty header value.
pub fn get_header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Token from an `Authorization: Bearer` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = get_header(headers, header::AUTHORIZATION.as_str())?;
    let (scheme, token) = value.split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() {
        Some(token.trim())
    } else {
        None
    }
}
