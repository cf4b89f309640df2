//! CLI argument parsing, validation, and startup helpers.

use std::time::Duration;

use crate::ServerConfig;
use crate::auth::FingerprintPolicy;
use crate::db::Database;
use crate::jwt::{ACCESS_TOKEN_DURATION_SECS, Algorithm, REFRESH_TOKEN_DURATION_SECS};
use crate::rate_limit::{DEFAULT_LOGIN_PER_MINUTE, DEFAULT_REGISTER_PER_MINUTE, RateLimitSettings};
use clap::Parser;
use tracing::{error, info};

const MIN_SECRET_LENGTH: usize = 32;

const ACCESS_SECRET_ENV: &str = "ACCESS_TOKEN_SECRET";
const REFRESH_SECRET_ENV: &str = "REFRESH_TOKEN_SECRET";

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

/// Token signing algorithm.
#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SigningAlgorithm {
    #[default]
    Hs256,
    Hs384,
    Hs512,
}

impl From<SigningAlgorithm> for Algorithm {
    fn from(alg: SigningAlgorithm) -> Self {
        match alg {
            SigningAlgorithm::Hs256 => Algorithm::HS256,
            SigningAlgorithm::Hs384 => Algorithm::HS384,
            SigningAlgorithm::Hs512 => Algorithm::HS512,
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "parley",
    about = "Social API server with fingerprint-bound session tokens"
)]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PARLEY_PORT", default_value = "7291")]
    pub port: u16,

    /// Path to SQLite database file
    #[arg(short, long, env = "PARLEY_DATABASE", default_value = "parley.db")]
    pub database: String,

    /// Path to file containing the access token secret. Prefer ACCESS_TOKEN_SECRET
    #[arg(long)]
    pub access_token_secret_file: Option<String>,

    /// Path to file containing the refresh token secret. Prefer REFRESH_TOKEN_SECRET
    #[arg(long)]
    pub refresh_token_secret_file: Option<String>,

    /// Access token lifetime in seconds
    #[arg(long, env = "ACCESS_TOKEN_TTL", default_value_t = ACCESS_TOKEN_DURATION_SECS,
        value_parser = clap::value_parser!(u64).range(1..))]
    pub access_token_ttl: u64,

    /// Refresh token lifetime in seconds
    #[arg(long, env = "REFRESH_TOKEN_TTL", default_value_t = REFRESH_TOKEN_DURATION_SECS,
        value_parser = clap::value_parser!(u64).range(1..))]
    pub refresh_token_ttl: u64,

    /// Token signing algorithm
    #[arg(long, default_value = "hs256")]
    pub algorithm: SigningAlgorithm,

    /// Production mode: `__Host-`/`__Secure-` cookie names and Secure cookies
    #[arg(long, env = "PARLEY_PRODUCTION")]
    pub production: bool,

    /// Set the Secure flag on cookies outside production (HTTPS deployments)
    #[arg(long)]
    pub secure_cookies: bool,

    /// Accept tokens issued before fingerprint binding existed
    #[arg(long)]
    pub allow_unbound_tokens: bool,

    /// Trust X-Forwarded-For for client addresses (only behind a reverse proxy)
    #[arg(long)]
    pub trust_proxy: bool,

    /// Login attempts allowed per minute per client
    #[arg(long, default_value_t = DEFAULT_LOGIN_PER_MINUTE,
        value_parser = clap::value_parser!(u32).range(1..))]
    pub login_rate_limit: u32,

    /// Registrations allowed per minute per client
    #[arg(long, default_value_t = DEFAULT_REGISTER_PER_MINUTE,
        value_parser = clap::value_parser!(u32).range(1..))]
    pub register_rate_limit: u32,

    /// Seconds between sweeps of expired refresh tokens
    #[arg(long, default_value = "3600", value_parser = clap::value_parser!(u64).range(1..))]
    pub cleanup_interval: u64,

    /// Log output format
    #[arg(short, long, default_value = "pretty")]
    pub log_format: LogFormat,
}

/// Initialize logging based on the specified format.
pub fn init_logging(format: &LogFormat) {
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt::init(),
        LogFormat::Json => tracing_subscriber::fmt().json().init(),
        LogFormat::Compact => tracing_subscriber::fmt().compact().init(),
    }
}

/// Load one secret from an environment variable or a file.
/// The variable is removed after reading to prevent leaking it to child processes.
fn load_secret(env_var: &str, file: Option<&str>) -> Option<String> {
    let secret = if let Ok(secret) = std::env::var(env_var) {
        // SAFETY: We're single-threaded at this point during startup,
        // and no other code is reading this environment variable.
        unsafe { std::env::remove_var(env_var) };
        secret
    } else if let Some(path) = file {
        match std::fs::read_to_string(path) {
            Ok(content) => content.trim().to_string(),
            Err(e) => {
                error!(path = %path, error = %e, "Failed to read secret file");
                return None;
            }
        }
    } else {
        error!(
            "{} is required. Set the environment variable (recommended) or pass a secret file",
            env_var
        );
        return None;
    };

    if secret.len() < MIN_SECRET_LENGTH {
        error!(
            "{} is shorter than {} characters. Use a longer secret",
            env_var, MIN_SECRET_LENGTH
        );
        return None;
    }

    Some(secret)
}

/// Check that two secrets are usable together.
pub fn validate_secret_pair(access: &str, refresh: &str) -> Result<(), String> {
    if access.len() < MIN_SECRET_LENGTH || refresh.len() < MIN_SECRET_LENGTH {
        return Err(format!(
            "Token secrets must be at least {} characters",
            MIN_SECRET_LENGTH
        ));
    }
    if access == refresh {
        return Err("Access and refresh token secrets must differ".to_string());
    }
    Ok(())
}

/// Load both token secrets. Returns None and logs an error if either is unusable.
pub fn load_token_secrets(args: &Args) -> Option<(String, String)> {
    let access = load_secret(ACCESS_SECRET_ENV, args.access_token_secret_file.as_deref())?;
    let refresh = load_secret(REFRESH_SECRET_ENV, args.refresh_token_secret_file.as_deref())?;

    if let Err(e) = validate_secret_pair(&access, &refresh) {
        error!("{}", e);
        return None;
    }

    Some((access, refresh))
}

/// Build ServerConfig from validated arguments.
pub fn build_config(
    args: &Args,
    db: Database,
    access_secret: String,
    refresh_secret: String,
) -> ServerConfig {
    ServerConfig {
        db,
        access_secret: access_secret.into_bytes(),
        refresh_secret: refresh_secret.into_bytes(),
        algorithm: args.algorithm.into(),
        access_ttl: args.access_token_ttl,
        refresh_ttl: args.refresh_token_ttl,
        production: args.production,
        secure_cookies: args.secure_cookies,
        fingerprint_policy: if args.allow_unbound_tokens {
            FingerprintPolicy::AllowLegacy
        } else {
            FingerprintPolicy::Required
        },
        rate_limits: RateLimitSettings {
            login_per_minute: args.login_rate_limit,
            register_per_minute: args.register_rate_limit,
            trust_proxy: args.trust_proxy,
        },
        cleanup_interval: Duration::from_secs(args.cleanup_interval),
    }
}

/// Open the database, logging errors if it fails.
pub async fn open_database(path: &str) -> Option<Database> {
    match Database::open(path).await {
        Ok(db) => {
            info!(path = %path, "Database opened");
            Some(db)
        }
        Err(e) => {
            error!(path = %path, error = %e, "Failed to open database");
            None
        }
    }
}
