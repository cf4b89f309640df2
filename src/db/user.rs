use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;
use std::sync::LazyLock;

use crate::password;

/// Verified against when the identity is unknown, so a miss costs the same
/// Argon2 work as a wrong password.
static DUMMY_HASH: LazyLock<Option<String>> =
    LazyLock::new(|| password::hash_password("parley-unknown-identity").ok());

#[derive(Clone)]
pub struct UserStore {
    pool: SqlitePool,
}

#[derive(Debug, Clone)]
pub struct User {
    pub user_id: String,
    pub username: String,
    pub email: String,
    pub full_name: Option<String>,
    pub password_hash: String,
    pub is_admin: bool,
    pub is_online: bool,
    pub created_at: String,
}

/// Fields safe to hand to clients. Never carries the password hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicUser {
    pub user_id: String,
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub is_online: bool,
    #[serde(default)]
    pub created_at: String,
}

impl From<User> for PublicUser {
    fn from(user: User) -> Self {
        Self {
            user_id: user.user_id,
            username: user.username,
            email: user.email,
            full_name: user.full_name,
            is_admin: user.is_admin,
            is_online: user.is_online,
            created_at: user.created_at,
        }
    }
}

/// Input for creating a user. The password must already be hashed.
#[derive(Debug, Clone, Copy)]
pub struct NewUser<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub full_name: Option<&'a str>,
    pub password_hash: &'a str,
}

#[derive(sqlx::FromRow)]
struct UserRow {
    user_id: String,
    username: String,
    email: String,
    full_name: Option<String>,
    password_hash: String,
    is_admin: i32,
    is_online: i32,
    created_at: String,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            user_id: row.user_id,
            username: row.username,
            email: row.email,
            full_name: row.full_name,
            password_hash: row.password_hash,
            is_admin: row.is_admin != 0,
            is_online: row.is_online != 0,
            created_at: row.created_at,
        }
    }
}

/// Errors from the user store.
#[derive(Debug)]
pub enum UserStoreError {
    /// Username or email is already registered
    Duplicate,
    /// Stored password hash could not be parsed
    CorruptCredential(argon2::password_hash::Error),
    Database(sqlx::Error),
}

impl std::fmt::Display for UserStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UserStoreError::Duplicate => write!(f, "Username or email already registered"),
            UserStoreError::CorruptCredential(e) => write!(f, "Unusable password hash: {}", e),
            UserStoreError::Database(e) => write!(f, "Database error: {}", e),
        }
    }
}

impl std::error::Error for UserStoreError {}

impl From<sqlx::Error> for UserStoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => UserStoreError::Duplicate,
            _ => UserStoreError::Database(e),
        }
    }
}

impl UserStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Register a new user. Fails with `Duplicate` if the username or email is taken.
    pub async fn create(&self, new_user: &NewUser<'_>) -> Result<User, UserStoreError> {
        let user_id = uuid::Uuid::new_v4().to_string();

        sqlx::query(
            "INSERT INTO users (user_id, username, email, full_name, password_hash) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&user_id)
        .bind(new_user.username)
        .bind(new_user.email)
        .bind(new_user.full_name)
        .bind(new_user.password_hash)
        .execute(&self.pool)
        .await?;

        self.get_by_id(&user_id)
            .await?
            .ok_or(UserStoreError::Database(sqlx::Error::RowNotFound))
    }

    /// Look up a user by username or email and check the password.
    /// Returns `None` for an unknown identity and for a wrong password alike.
    pub async fn authenticate(
        &self,
        identifier: &str,
        password: &str,
    ) -> Result<Option<User>, UserStoreError> {
        let Some(user) = self.get_by_identifier(identifier).await? else {
            if let Some(dummy) = DUMMY_HASH.as_deref() {
                let _ = password::verify_password(password, dummy);
            }
            return Ok(None);
        };

        let valid = password::verify_password(password, &user.password_hash)
            .map_err(UserStoreError::CorruptCredential)?;

        Ok(valid.then_some(user))
    }

    /// Get a user by ID.
    pub async fn get_by_id(&self, user_id: &str) -> Result<Option<User>, sqlx::Error> {
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT user_id, username, email, full_name, password_hash, is_admin, is_online, created_at FROM users WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(User::from))
    }

    /// Get a user by username or email (case-insensitive).
    pub async fn get_by_identifier(&self, identifier: &str) -> Result<Option<User>, sqlx::Error> {
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT user_id, username, email, full_name, password_hash, is_admin, is_online, created_at FROM users WHERE username = ? OR email = ?",
        )
        .bind(identifier)
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(User::from))
    }

    /// Set the online/presence flag.
    pub async fn update_presence(&self, user_id: &str, online: bool) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE users SET is_online = ? WHERE user_id = ?")
            .bind(online)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete a user by ID.
    pub async fn delete(&self, user_id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM users WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
