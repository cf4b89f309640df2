//! Fingerprint-bound JWT session authentication.
//!
//! Dual-token system: short-lived access tokens (stateless) and long-lived
//! refresh tokens (tracked in the database). Both are bound to a random
//! per-session fingerprint held by the client, and every refresh rotates
//! the pair and the fingerprint.

mod cookie;
mod csrf;
mod errors;
mod extractors;
mod session;
mod state;
mod types;

pub use cookie::{
    CSRF_HEADER, CookieNames, CookiePolicy, DEV_COOKIE_NAMES, FINGERPRINT_HEADER,
    PROD_COOKIE_NAMES, bearer_token, get_cookie, get_header,
};
pub use csrf::{CSRF_ERROR_CODE, csrf_matches, require_csrf};
pub use errors::{AuthError, AuthErrorKind};
pub use extractors::AuthorizeUser;
pub use session::{
    IssueError, RefreshedSession, SessionStage, SessionTokens, issue_session, refresh_session,
};
pub use state::HasAuthBackend;
pub use types::{AuthenticatedUser, FingerprintPolicy};
