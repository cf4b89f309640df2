//! Authentication state trait and macro.

use super::cookie::CookiePolicy;
use super::types::FingerprintPolicy;
use crate::db::Database;
use crate::jwt::JwtConfig;

/// Trait for state types that provide what the session handlers need:
/// token signing, the stores, cookie naming and the fingerprint policy.
pub trait HasAuthBackend {
    fn jwt(&self) -> &JwtConfig;
    fn db(&self) -> &Database;
    fn cookies(&self) -> &CookiePolicy;
    fn fingerprint_policy(&self) -> FingerprintPolicy;
}

/// Macro to implement `HasAuthBackend` for state structs with the standard fields.
///
/// The struct must have these fields:
/// - `jwt: Arc<JwtConfig>`
/// - `db: Database`
/// - `cookies: Arc<CookiePolicy>`
/// - `fingerprint_policy: FingerprintPolicy`
///
/// # Example
/// ```ignore
/// #[derive(Clone)]
/// pub struct MyState {
///     pub db: Database,
///     pub jwt: Arc<JwtConfig>,
///     pub cookies: Arc<CookiePolicy>,
///     pub fingerprint_policy: FingerprintPolicy,
/// }
///
/// impl_has_auth_backend!(MyState);
/// ```
#[macro_export]
macro_rules! impl_has_auth_backend {
    ($state_type:ty) => {
        impl $crate::auth::HasAuthBackend for $state_type {
            fn jwt(&self) -> &$crate::jwt::JwtConfig {
                &self.jwt
            }
            fn db(&self) -> &$crate::db::Database {
                &self.db
            }
            fn cookies(&self) -> &$crate::auth::CookiePolicy {
                &self.cookies
            }
            fn fingerprint_policy(&self) -> $crate::auth::FingerprintPolicy {
                self.fingerprint_policy
            }
        }
    };
}
