//! Client side of the session protocol.
//!
//! [`ApiClient`] keeps the fingerprint and CSRF token in step with the
//! server's cookies and recovers from stale CSRF tokens and expired access
//! tokens without bothering the caller.

mod error;
mod pipeline;
mod state;
mod store;
mod transport;

pub use error::ClientError;
pub use pipeline::{ApiClient, Registration, RetryBudget};
pub use state::{AuthAction, ClientAuthState, reduce};
pub use store::{ClientTokenStore, SyncOutcome, TokenPair, reconcile};
pub use transport::{ApiRequest, ApiResponse, DEFAULT_TIMEOUT, HttpTransport, Transport};
