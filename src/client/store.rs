//! Client-side copy of the session fingerprint and CSRF token.
//!
//! The server's cookies are the source of truth. The local copy only exists
//! so the pipeline can echo the values in request headers, and it is
//! resynchronized whenever it disagrees with a cookie that is present.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

/// Decide the new local value given the authoritative cookie.
///
/// A present, non-empty cookie wins. An absent cookie leaves the local copy
/// alone. Returns the new local value and whether it changed.
pub fn reconcile(cookie: Option<&str>, local: Option<&str>) -> (Option<String>, bool) {
    match cookie.filter(|c| !c.is_empty()) {
        Some(cookie) if local != Some(cookie) => (Some(cookie.to_string()), true),
        _ => (local.map(str::to_string), false),
    }
}

/// Values the client echoes back to the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenPair {
    pub fingerprint: Option<String>,
    pub csrf: Option<String>,
    /// Access token expiry, Unix seconds
    pub expires_at: Option<u64>,
}

/// What a sync changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    pub fingerprint_changed: bool,
    pub csrf_changed: bool,
}

impl SyncOutcome {
    pub fn changed(self) -> bool {
        self.fingerprint_changed || self.csrf_changed
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Thread-safe holder of the client's [`TokenPair`].
#[derive(Debug)]
pub struct ClientTokenStore {
    pair: Mutex<TokenPair>,
    writes: AtomicUsize,
    access_ttl: u64,
}

impl ClientTokenStore {
    /// `access_ttl` is the fallback lifetime when the server omits `expiresAt`.
    pub fn new(access_ttl: u64) -> Self {
        Self {
            pair: Mutex::new(TokenPair::default()),
            writes: AtomicUsize::new(0),
            access_ttl,
        }
    }

    fn lock(&self) -> MutexGuard<'_, TokenPair> {
        self.pair.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self, update: impl FnOnce(&mut TokenPair)) {
        let mut pair = self.lock();
        update(&mut *pair);
        drop(pair);
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TokenPair {
        self.lock().clone()
    }

    pub fn fingerprint(&self) -> Option<String> {
        self.lock().fingerprint.clone()
    }

    pub fn csrf(&self) -> Option<String> {
        self.lock().csrf.clone()
    }

    /// Number of writes so far. A sync that finds nothing to change does not write.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    /// Store the values of a freshly issued session.
    pub fn set_session(&self, fingerprint: &str, csrf: &str, expires_at: Option<u64>) {
        let expires_at = expires_at.unwrap_or_else(|| unix_now() + self.access_ttl);
        self.write(|pair| {
            pair.fingerprint = Some(fingerprint.to_string());
            pair.csrf = Some(csrf.to_string());
            pair.expires_at = Some(expires_at);
        });
    }

    /// Adopt the CSRF cookie if it differs. Returns the change flag.
    pub fn sync_csrf(&self, cookie: Option<&str>) -> bool {
        let local = self.csrf();
        let (csrf, changed) = reconcile(cookie, local.as_deref());
        if changed {
            self.write(|pair| pair.csrf = csrf);
        }
        changed
    }

    /// Reconcile both values against their cookies. Idempotent: with unchanged
    /// cookies a second call writes nothing.
    pub fn sync_all_tokens(
        &self,
        fingerprint_cookie: Option<&str>,
        csrf_cookie: Option<&str>,
    ) -> SyncOutcome {
        let current = self.snapshot();
        let (fingerprint, fingerprint_changed) =
            reconcile(fingerprint_cookie, current.fingerprint.as_deref());
        let (csrf, csrf_changed) = reconcile(csrf_cookie, current.csrf.as_deref());

        let outcome = SyncOutcome {
            fingerprint_changed,
            csrf_changed,
        };
        if outcome.changed() {
            self.write(|pair| {
                pair.fingerprint = fingerprint;
                pair.csrf = csrf;
            });
        }
        outcome
    }

    /// True when the access token is known to have expired.
    pub fn is_expired(&self) -> bool {
        self.lock().expires_at.is_some_and(|exp| exp <= unix_now())
    }

    pub fn clear(&self) {
        self.write(|pair| *pair = TokenPair::default());
    }
}
