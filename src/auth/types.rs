//! Authentication user types.

use crate::jwt::SessionClaims;

/// Whether tokens without an embedded fingerprint hash are accepted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FingerprintPolicy {
    /// Every token must be bound to a fingerprint.
    #[default]
    Required,
    /// Tokens minted before fingerprint binding are still honored.
    AllowLegacy,
}

impl FingerprintPolicy {
    pub fn allows_unbound(self) -> bool {
        matches!(self, FingerprintPolicy::AllowLegacy)
    }
}

/// Authenticated user information extracted from a verified access token.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    /// JWT claims from the access token
    pub claims: SessionClaims,
}

impl AuthenticatedUser {
    pub fn user_id(&self) -> &str {
        &self.claims.sub
    }
}
