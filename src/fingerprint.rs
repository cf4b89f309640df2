//! Session fingerprints and CSRF tokens.
//!
//! A fingerprint is a random secret handed to the client on every login and
//! rotation. Only its SHA-256 hash is embedded in tokens and stored, so a
//! stolen refresh token is useless without the raw value.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;

/// Number of random bytes in a fingerprint or CSRF token.
const SECRET_BYTES: usize = 32;

fn random_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Generate a new raw fingerprint (base64url, 43 characters).
pub fn generate() -> String {
    random_secret()
}

/// Hash a raw fingerprint. Lowercase hex SHA-256.
pub fn hash(raw: &str) -> String {
    openssl::sha::sha256(raw.as_bytes())
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Check a presented raw fingerprint against an expected hash in constant time.
pub fn matches(raw: &str, expected_hash: &str) -> bool {
    let actual = hash(raw);
    actual.len() == expected_hash.len()
        && openssl::memcmp::eq(actual.as_bytes(), expected_hash.as_bytes())
}

/// Generate a CSRF token for the double-submit cookie.
pub fn generate_csrf_token() -> String {
    random_secret()
}
