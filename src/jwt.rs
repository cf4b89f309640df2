//! JWT token generation and validation.
//!
//! Access and refresh tokens share one claim set but are signed with two
//! independent secrets, so a leaked refresh secret cannot mint access tokens
//! and vice versa. Every token carries a fresh `jti`.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub use jsonwebtoken::Algorithm;

/// Token type for distinguishing access vs refresh tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    /// Short-lived access token (15 minutes by default)
    Access,
    /// Long-lived refresh token (7 days by default), tracked in the database
    Refresh,
}

/// Claims carried by both token kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject (user id)
    pub sub: String,
    /// Whether the subject is an administrator
    pub is_admin: bool,
    /// Hash of the session fingerprint. `None` only for legacy unbound tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fph: Option<String>,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// JWT ID
    pub jti: String,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
    /// Token type
    #[serde(rename = "typ")]
    pub kind: TokenKind,
}

/// What the caller wants embedded in a token.
#[derive(Debug, Clone)]
pub struct SessionPayload {
    pub subject: String,
    pub is_admin: bool,
    pub fingerprint_hash: Option<String>,
}

/// Default access token lifetime: 15 minutes
pub const ACCESS_TOKEN_DURATION_SECS: u64 = 15 * 60;

/// Default refresh token lifetime: 7 days
pub const REFRESH_TOKEN_DURATION_SECS: u64 = 7 * 24 * 60 * 60;

/// Signing keys and lifetimes for both token kinds.
#[derive(Clone)]
pub struct JwtConfig {
    algorithm: Algorithm,
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    access_ttl: u64,
    refresh_ttl: u64,
}

/// A freshly signed token and the metadata the store needs to track it.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    /// The JWT string
    pub token: String,
    /// JWT ID
    pub jti: String,
    /// Issued at timestamp (Unix seconds)
    pub issued_at: u64,
    /// Expiration timestamp (Unix seconds)
    pub expires_at: u64,
    /// Token lifetime in seconds
    pub duration: u64,
}

impl JwtConfig {
    /// Create a configuration with HS256 and the default lifetimes.
    pub fn new(access_secret: &[u8], refresh_secret: &[u8]) -> Self {
        Self {
            algorithm: Algorithm::HS256,
            access_encoding: EncodingKey::from_secret(access_secret),
            access_decoding: DecodingKey::from_secret(access_secret),
            refresh_encoding: EncodingKey::from_secret(refresh_secret),
            refresh_decoding: DecodingKey::from_secret(refresh_secret),
            access_ttl: ACCESS_TOKEN_DURATION_SECS,
            refresh_ttl: REFRESH_TOKEN_DURATION_SECS,
        }
    }

    /// Use a different HMAC algorithm for signing and verification.
    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Override the access and refresh token lifetimes (seconds).
    pub fn with_lifetimes(mut self, access_ttl: u64, refresh_ttl: u64) -> Self {
        self.access_ttl = access_ttl;
        self.refresh_ttl = refresh_ttl;
        self
    }

    fn keys(&self, kind: TokenKind) -> (&EncodingKey, &DecodingKey, u64) {
        match kind {
            TokenKind::Access => (&self.access_encoding, &self.access_decoding, self.access_ttl),
            TokenKind::Refresh => (
                &self.refresh_encoding,
                &self.refresh_decoding,
                self.refresh_ttl,
            ),
        }
    }

    /// Sign a token of the given kind for the payload.
    pub fn issue(&self, payload: &SessionPayload, kind: TokenKind) -> Result<IssuedToken, JwtError> {
        let (encoding_key, _, ttl) = self.keys(kind);
        let now = unix_now()?;
        let jti = uuid::Uuid::new_v4().to_string();

        let claims = SessionClaims {
            sub: payload.subject.clone(),
            is_admin: payload.is_admin,
            fph: payload.fingerprint_hash.clone(),
            iat: now,
            jti: jti.clone(),
            exp: now + ttl,
            kind,
        };

        let token = jsonwebtoken::encode(&Header::new(self.algorithm), &claims, encoding_key)
            .map_err(JwtError::Encoding)?;

        Ok(IssuedToken {
            token,
            jti,
            issued_at: now,
            expires_at: now + ttl,
            duration: ttl,
        })
    }

    /// Issue an access token for the payload.
    pub fn issue_access(&self, payload: &SessionPayload) -> Result<IssuedToken, JwtError> {
        self.issue(payload, TokenKind::Access)
    }

    /// Issue a refresh token for the payload.
    pub fn issue_refresh(&self, payload: &SessionPayload) -> Result<IssuedToken, JwtError> {
        self.issue(payload, TokenKind::Refresh)
    }

    /// Validate and decode a token of the given kind.
    pub fn verify(&self, token: &str, kind: TokenKind) -> Result<SessionClaims, JwtError> {
        let (_, decoding_key, _) = self.keys(kind);
        let mut validation = Validation::new(self.algorithm);
        validation.leeway = 0;

        let token_data = jsonwebtoken::decode::<SessionClaims>(token, decoding_key, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => JwtError::Expired,
                ErrorKind::InvalidSignature => JwtError::InvalidSignature,
                _ => JwtError::Malformed(e),
            })?;

        if token_data.claims.kind != kind {
            return Err(JwtError::WrongTokenType);
        }

        Ok(token_data.claims)
    }

    pub fn verify_access(&self, token: &str) -> Result<SessionClaims, JwtError> {
        self.verify(token, TokenKind::Access)
    }

    pub fn verify_refresh(&self, token: &str) -> Result<SessionClaims, JwtError> {
        self.verify(token, TokenKind::Refresh)
    }
}

/// Current Unix time in seconds.
pub fn unix_now() -> Result<u64, JwtError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|_| JwtError::TimeError)
}

/// Errors that can occur during JWT operations.
#[derive(Debug)]
pub enum JwtError {
    /// Error encoding the token
    Encoding(jsonwebtoken::errors::Error),
    /// Signature does not match the secret
    InvalidSignature,
    /// Token is past its `exp`
    Expired,
    /// Anything else the decoder rejected (bad base64, bad JSON, missing claims)
    Malformed(jsonwebtoken::errors::Error),
    /// System time error
    TimeError,
    /// Wrong token type (e.g., using refresh token as access token)
    WrongTokenType,
}

impl std::fmt::Display for JwtError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JwtError::Encoding(e) => write!(f, "Failed to encode token: {}", e),
            JwtError::InvalidSignature => write!(f, "Invalid token signature"),
            JwtError::Expired => write!(f, "Token has expired"),
            JwtError::Malformed(e) => write!(f, "Malformed token: {}", e),
            JwtError::TimeError => write!(f, "System time error"),
            JwtError::WrongTokenType => write!(f, "Wrong token type"),
        }
    }
}

impl std::error::Error for JwtError {}

#[cfg(test)]
mod tests {
    use super::*;

    const ACCESS_SECRET: &[u8] = b"access-secret-key-for-testing-0123456789";
    const REFRESH_SECRET: &[u8] = b"refresh-secret-key-for-testing-012345678";

    fn config() -> JwtConfig {
        JwtConfig::new(ACCESS_SECRET, REFRESH_SECRET)
    }

    fn payload() -> SessionPayload {
        SessionPayload {
            subject: "uuid-123".to_string(),
            is_admin: false,
            fingerprint_hash: Some("abc123".to_string()),
        }
    }

    #[test]
    fn test_issue_and_verify_access_token() {
        let config = config();
        let result = config.issue_access(&payload()).unwrap();

        assert_eq!(result.duration, ACCESS_TOKEN_DURATION_SECS);
        assert_eq!(result.expires_at - result.issued_at, ACCESS_TOKEN_DURATION_SECS);

        let claims = config.verify_access(&result.token).unwrap();
        assert_eq!(claims.sub, "uuid-123");
        assert!(!claims.is_admin);
        assert_eq!(claims.fph.as_deref(), Some("abc123"));
        assert_eq!(claims.kind, TokenKind::Access);
        assert_eq!(claims.jti, result.jti);
    }

    #[test]
    fn test_issue_and_verify_refresh_token() {
        let config = config();
        let result = config.issue_refresh(&payload()).unwrap();

        assert_eq!(result.duration, REFRESH_TOKEN_DURATION_SECS);

        let claims = config.verify_refresh(&result.token).unwrap();
        assert_eq!(claims.kind, TokenKind::Refresh);
        assert_eq!(claims.exp, result.expires_at);
    }

    #[test]
    fn test_secrets_are_not_interchangeable() {
        let config = config();
        let access = config.issue_access(&payload()).unwrap();
        let refresh = config.issue_refresh(&payload()).unwrap();

        // Each kind is signed with its own secret, so cross-verification fails
        // on the signature before the type check is even reached.
        assert!(matches!(
            config.verify_refresh(&access.token),
            Err(JwtError::InvalidSignature)
        ));
        assert!(matches!(
            config.verify_access(&refresh.token),
            Err(JwtError::InvalidSignature)
        ));
    }

    #[test]
    fn test_wrong_token_type_rejected_with_shared_secret() {
        let config = JwtConfig::new(ACCESS_SECRET, ACCESS_SECRET);
        let refresh = config.issue_refresh(&payload()).unwrap();

        assert!(matches!(
            config.verify_access(&refresh.token),
            Err(JwtError::WrongTokenType)
        ));
    }

    #[test]
    fn test_admin_flag_in_token() {
        let config = config();
        let mut payload = payload();
        payload.is_admin = true;

        let result = config.issue_access(&payload).unwrap();
        let claims = config.verify_access(&result.token).unwrap();
        assert!(claims.is_admin);
    }

    #[test]
    fn test_legacy_token_without_fingerprint() {
        let config = config();
        let mut payload = payload();
        payload.fingerprint_hash = None;

        let result = config.issue_refresh(&payload).unwrap();
        let claims = config.verify_refresh(&result.token).unwrap();
        assert!(claims.fph.is_none());
    }

    #[test]
    fn test_malformed_token() {
        let result = config().verify_access("invalid-token");
        assert!(matches!(result, Err(JwtError::Malformed(_))));
    }

    #[test]
    fn test_wrong_secret() {
        let config1 = JwtConfig::new(b"secret-1", b"secret-r");
        let config2 = JwtConfig::new(b"secret-2", b"secret-r");

        let result = config1.issue_access(&payload()).unwrap();
        assert!(matches!(
            config2.verify_access(&result.token),
            Err(JwtError::InvalidSignature)
        ));
    }

    #[test]
    fn test_expired_token() {
        let encoding_key = EncodingKey::from_secret(ACCESS_SECRET);
        let now = unix_now().unwrap();

        let claims = SessionClaims {
            sub: "uuid-123".to_string(),
            is_admin: false,
            fph: None,
            iat: now - 100,
            jti: "jti".to_string(),
            exp: now - 50,
            kind: TokenKind::Access,
        };

        let token = jsonwebtoken::encode(&Header::default(), &claims, &encoding_key).unwrap();
        assert!(matches!(config().verify_access(&token), Err(JwtError::Expired)));
    }

    #[test]
    fn test_algorithm_mismatch_rejected() {
        let hs512 = config().with_algorithm(Algorithm::HS512);
        let token = hs512.issue_access(&payload()).unwrap().token;

        assert!(hs512.verify_access(&token).is_ok());
        assert!(config().verify_access(&token).is_err());
    }

    #[test]
    fn test_custom_lifetimes() {
        let config = config().with_lifetimes(60, 120);
        let access = config.issue_access(&payload()).unwrap();
        let refresh = config.issue_refresh(&payload()).unwrap();

        assert_eq!(access.duration, 60);
        assert_eq!(refresh.duration, 120);
    }

    #[test]
    fn test_unique_jti_for_identical_payloads() {
        let config = config();
        let first = config.issue_refresh(&payload()).unwrap();
        let second = config.issue_refresh(&payload()).unwrap();

        assert_ne!(first.jti, second.jti);
        assert_ne!(first.token, second.token);
    }
}
