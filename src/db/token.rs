//! Refresh token session records.
//!
//! One row per issued refresh token, keyed by the token's JWT ID and bound to
//! a (user, fingerprint hash) pair. Rotation revokes the old row and inserts
//! the new one in a single transaction. Revoked and expired rows are kept for
//! audit until the cleanup sweep removes them.

use sqlx::sqlite::SqlitePool;
use std::time::{SystemTime, UNIX_EPOCH};

/// How long past expiry a record is retained before the sweep deletes it.
pub const EXPIRED_RETENTION_SECS: i64 = 7 * 24 * 60 * 60;

/// A stored refresh token record.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct RefreshTokenRecord {
    pub token_id: String,
    pub user_id: String,
    pub fingerprint_hash: String,
    pub expires_at: i64,
    pub is_revoked: bool,
    pub revoked_at: Option<i64>,
    pub created_at: i64,
}

impl RefreshTokenRecord {
    /// Unrevoked and not yet expired at `now`.
    pub fn is_active(&self, now: i64) -> bool {
        !self.is_revoked && self.expires_at > now
    }
}

/// Input for a new record. `issued_at`/`expires_at` come straight from the
/// signed refresh token so the row's lifetime matches the token's.
#[derive(Debug, Clone)]
pub struct NewRefreshToken {
    pub token_id: String,
    pub user_id: String,
    pub fingerprint_hash: String,
    pub issued_at: u64,
    pub expires_at: u64,
}

/// Errors from the refresh token store.
#[derive(Debug)]
pub enum StoreError {
    /// Rotation found no active record for the old fingerprint.
    /// Another request already rotated it, or it was revoked.
    NotActive,
    /// Underlying database failure. Any transaction was rolled back.
    Database(sqlx::Error),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotActive => write!(f, "No active refresh token to rotate"),
            StoreError::Database(e) => write!(f, "Refresh token store error: {}", e),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::NotActive => None,
            StoreError::Database(e) => Some(e),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(e)
    }
}

/// Store for refresh token session records.
pub struct RefreshTokenStore {
    pool: SqlitePool,
}

impl RefreshTokenStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert an active record. Returns the token ID.
    pub async fn create_token(&self, token: &NewRefreshToken) -> Result<String, StoreError> {
        let mut conn = self.pool.acquire().await?;
        insert(&mut *conn, token).await?;
        Ok(token.token_id.clone())
    }

    /// True iff an unrevoked, unexpired record exists for exactly this pair.
    pub async fn verify_token(
        &self,
        user_id: &str,
        fingerprint_hash: &str,
    ) -> Result<bool, StoreError> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM refresh_tokens WHERE user_id = ? AND fingerprint_hash = ? AND is_revoked = 0 AND expires_at > ?",
        )
        .bind(user_id)
        .bind(fingerprint_hash)
        .bind(now())
        .fetch_one(&self.pool)
        .await?;
        Ok(count.0 > 0)
    }

    /// Revoke the active record for (user, old hash) and insert `new_token`,
    /// atomically. Returns the new token ID.
    ///
    /// If no active record matches, nothing is written and
    /// [`StoreError::NotActive`] is returned. Concurrent rotations of the same
    /// record therefore have exactly one winner.
    pub async fn rotate_token(
        &self,
        user_id: &str,
        old_fingerprint_hash: &str,
        new_token: &NewRefreshToken,
    ) -> Result<String, StoreError> {
        let now = now();
        let mut tx = self.pool.begin().await?;

        let revoked = sqlx::query(
            "UPDATE refresh_tokens SET is_revoked = 1, revoked_at = ? WHERE user_id = ? AND fingerprint_hash = ? AND is_revoked = 0 AND expires_at > ?",
        )
        .bind(now)
        .bind(user_id)
        .bind(old_fingerprint_hash)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if revoked.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StoreError::NotActive);
        }

        // Dropping `tx` on error rolls the revoke back.
        insert(&mut *tx, new_token).await?;
        tx.commit().await?;

        Ok(new_token.token_id.clone())
    }

    /// Revoke every active record for a user. Returns how many were revoked.
    pub async fn revoke_all_user_tokens(&self, user_id: &str) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "UPDATE refresh_tokens SET is_revoked = 1, revoked_at = ? WHERE user_id = ? AND is_revoked = 0",
        )
        .bind(now())
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }

    /// Delete records that expired more than [`EXPIRED_RETENTION_SECS`] ago.
    pub async fn remove_expired_tokens(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at < ?")
            .bind(now() - EXPIRED_RETENTION_SECS)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Get a record by token ID, whatever its state.
    pub async fn get(&self, token_id: &str) -> Result<Option<RefreshTokenRecord>, StoreError> {
        let row = sqlx::query_as::<_, RefreshTokenRecord>(
            "SELECT token_id, user_id, fingerprint_hash, expires_at, is_revoked, revoked_at, created_at FROM refresh_tokens WHERE token_id = ?",
        )
        .bind(token_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// All records for a user, newest first, including revoked ones.
    pub async fn list_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<RefreshTokenRecord>, StoreError> {
        let rows = sqlx::query_as::<_, RefreshTokenRecord>(
            "SELECT token_id, user_id, fingerprint_hash, expires_at, is_revoked, revoked_at, created_at FROM refresh_tokens WHERE user_id = ? ORDER BY created_at DESC, rowid DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

async fn insert(
    conn: &mut sqlx::SqliteConnection,
    token: &NewRefreshToken,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO refresh_tokens (token_id, user_id, fingerprint_hash, expires_at, is_revoked, created_at) VALUES (?, ?, ?, ?, 0, ?)",
    )
    .bind(&token.token_id)
    .bind(&token.user_id)
    .bind(&token.fingerprint_hash)
    .bind(token.expires_at as i64)
    .bind(token.issued_at as i64)
    .execute(conn)
    .await?;
    Ok(())
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
