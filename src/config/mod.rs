//! Configuration module for the SpaceY backend.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to SQLite database file
    pub db_path: PathBuf,
    /// Path to Tantivy search index directory
    pub index_path: PathBuf,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    pub log_format: LogFormat,
    /// Secret used to sign bearer tokens. Generated per process when unset.
    pub jwt_secret: String,
    /// Whether `jwt_secret` came from the environment
    pub jwt_secret_configured: bool,
    /// Lifetime of issued tokens, in seconds
    pub token_ttl_secs: i64,
    /// Sender address for notification mails
    pub mail_from: String,
    /// Administrator account created or promoted at startup
    pub admin_username: Option<String>,
    pub admin_password: Option<String>,
    /// Interval of the expired-cycle sweep, in seconds
    pub cycle_sweep_secs: u64,
}

/// A malformed environment variable.
#[derive(Debug)]
pub struct ConfigError {
    pub variable: &'static str,
    pub message: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid {}: {}", self.variable, self.message)
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let db_path = env::var("SPACEY_DB_PATH")
            .unwrap_or_else(|_| "./data/spacey.sqlite".to_string())
            .into();

        let index_path = env::var("SPACEY_INDEX_PATH")
            .unwrap_or_else(|_| "./data/index".to_string())
            .into();

        let bind_addr = parse_var("SPACEY_BIND_ADDR", "127.0.0.1:8080")?;

        let log_level = env::var("SPACEY_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let log_format = match env::var("SPACEY_LOG_FORMAT").as_deref() {
            Err(_) | Ok("text") => LogFormat::Text,
            Ok("json") => LogFormat::Json,
            Ok(other) => {
                return Err(ConfigError {
                    variable: "SPACEY_LOG_FORMAT",
                    message: format!("expected 'text' or 'json', got '{}'", other),
                })
            }
        };

        let (jwt_secret, jwt_secret_configured) = match env::var("SPACEY_JWT_SECRET") {
            Ok(secret) if !secret.is_empty() => (secret, true),
            _ => (
                format!("{}{}", uuid::Uuid::new_v4(), uuid::Uuid::new_v4()),
                false,
            ),
        };

        let token_ttl_secs = parse_var("SPACEY_TOKEN_TTL_SECS", "86400")?;

        let mail_from =
            env::var("SPACEY_MAIL_FROM").unwrap_or_else(|_| "no-reply@spacey.local".to_string());

        let admin_username = env::var("SPACEY_ADMIN_USERNAME").ok();
        let admin_password = env::var("SPACEY_ADMIN_PASSWORD").ok();

        let cycle_sweep_secs: u64 = parse_var("SPACEY_CYCLE_SWEEP_SECS", "30")?;
        if cycle_sweep_secs == 0 {
            return Err(ConfigError {
                variable: "SPACEY_CYCLE_SWEEP_SECS",
                message: "must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            db_path,
            index_path,
            bind_addr,
            log_level,
            log_format,
            jwt_secret,
            jwt_secret_configured,
            token_ttl_secs,
            mail_from,
            admin_username,
            admin_password,
            cycle_sweep_secs,
        })
    }
}

fn parse_var<T>(variable: &'static str, default: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = env::var(variable).unwrap_or_else(|_| default.to_string());
    raw.parse().map_err(|e: T::Err| ConfigError {
        variable,
        message: e.to_string(),
    })
}
