//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    pub jwt_secret: String,
    pub token_ttl_days: i64,
    pub uploads_dir: PathBuf,
    pub login_attempt_ttl_secs: u64,
    pub cors_origin: Option<String>,
    pub max_upload_bytes: usize,
    /// Telegram application credentials from my.telegram.org; only the
    /// server binary needs them.
    pub telegram_api_id: Option<i32>,
    pub telegram_api_hash: Option<String>,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // --- Server and Database Settings ---
        let bind_address = parse_or(&lookup, "BIND_ADDRESS", "0.0.0.0:8000")?;
        let database_url = required(&lookup, "DATABASE_URL")?;

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Bearer Tokens ---
        let jwt_secret = required(&lookup, "JWT_SECRET")?;
        let token_ttl_days: i64 = parse_or(&lookup, "TOKEN_TTL_DAYS", "7")?;
        if !(1..=3650).contains(&token_ttl_days) {
            return Err(ConfigError::InvalidValue(
                "TOKEN_TTL_DAYS".to_string(),
                "must be between 1 and 3650 days".to_string(),
            ));
        }

        // --- Gallery Settings ---
        let uploads_dir = lookup("UPLOADS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("uploads"));
        let login_attempt_ttl_secs = parse_or(&lookup, "LOGIN_ATTEMPT_TTL_SECS", "600")?;
        let cors_origin = lookup("CORS_ORIGIN").filter(|o| !o.trim().is_empty());
        let max_upload_bytes = parse_or(&lookup, "MAX_UPLOAD_BYTES", "20971520")?;

        // --- Telegram Application ---
        let telegram_api_id = lookup("TG_API_ID")
            .map(|raw| {
                raw.parse::<i32>()
                    .map_err(|e| ConfigError::InvalidValue("TG_API_ID".to_string(), e.to_string()))
            })
            .transpose()?;
        let telegram_api_hash = lookup("TG_API_HASH").filter(|h| !h.trim().is_empty());

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            jwt_secret,
            token_ttl_days,
            uploads_dir,
            login_attempt_ttl_secs,
            cors_origin,
            max_upload_bytes,
            telegram_api_id,
            telegram_api_hash,
        })
    }
}

fn required<F>(lookup: &F, key: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).ok_or_else(|| ConfigError::MissingVar(key.to_string()))
}

fn parse_or<F, T>(lookup: &F, key: &str, default: &str) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = lookup(key).unwrap_or_else(|| default.to_string());
    raw.parse::<T>()
        .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_required_vars_are_set() {
        let config = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/gallery"),
            ("JWT_SECRET", "s3cret"),
        ]))
        .unwrap();

        assert_eq!(config.bind_address, "0.0.0.0:8000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.log_level, Level::INFO);
        assert_eq!(config.token_ttl_days, 7);
        assert_eq!(config.uploads_dir, PathBuf::from("uploads"));
        assert_eq!(config.login_attempt_ttl_secs, 600);
        assert_eq!(config.cors_origin, None);
        assert_eq!(config.max_upload_bytes, 20 * 1024 * 1024);
        assert_eq!(config.telegram_api_id, None);
        assert_eq!(config.telegram_api_hash, None);
    }

    #[test]
    fn telegram_credentials_are_read_when_present() {
        let config = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://x"),
            ("JWT_SECRET", "s"),
            ("TG_API_ID", "12345"),
            ("TG_API_HASH", "0123abcd"),
        ]))
        .unwrap();
        assert_eq!(config.telegram_api_id, Some(12345));
        assert_eq!(config.telegram_api_hash.as_deref(), Some("0123abcd"));

        let bad = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://x"),
            ("JWT_SECRET", "s"),
            ("TG_API_ID", "abc"),
        ]));
        assert!(matches!(bad, Err(ConfigError::InvalidValue(ref key, _)) if key == "TG_API_ID"));
    }

    #[test]
    fn missing_secret_is_reported_by_name() {
        let err = Config::from_lookup(lookup_from(&[("DATABASE_URL", "postgres://x")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(ref key) if key == "JWT_SECRET"));
    }

    #[test]
    fn malformed_values_fail_startup() {
        let base = [("DATABASE_URL", "postgres://x"), ("JWT_SECRET", "s")];

        let mut bad_addr = base.to_vec();
        bad_addr.push(("BIND_ADDRESS", "not-an-address"));
        assert!(matches!(
            Config::from_lookup(lookup_from(&bad_addr)),
            Err(ConfigError::InvalidValue(ref key, _)) if key == "BIND_ADDRESS"
        ));

        let mut zero_ttl = base.to_vec();
        zero_ttl.push(("TOKEN_TTL_DAYS", "0"));
        assert!(matches!(
            Config::from_lookup(lookup_from(&zero_ttl)),
            Err(ConfigError::InvalidValue(ref key, _)) if key == "TOKEN_TTL_DAYS"
        ));
    }
}
