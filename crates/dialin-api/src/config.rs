use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub database_path: PathBuf,
    pub jwt_secret: String,
    pub jwt_issuer: Option<String>,
    pub jwt_audience: String,
    pub auth_clock_skew: Duration,
    pub rate_limit_window: Duration,
    /// Pull and export requests per user per window
    pub pull_requests_per_window: u32,
    /// Pushed records per user per window
    pub push_records_per_window: u32,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("database_path", &self.database_path)
            .field("jwt_secret", &"[REDACTED]")
            .field("jwt_issuer", &self.jwt_issuer)
            .field("jwt_audience", &self.jwt_audience)
            .field("auth_clock_skew", &self.auth_clock_skew)
            .field("rate_limit_window", &self.rate_limit_window)
            .field("pull_requests_per_window", &self.pull_requests_per_window)
            .field("push_records_per_window", &self.push_records_per_window)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "DIALIN_API_BIND_ADDR", "127.0.0.1:8080");
        let database_path = PathBuf::from(value_or_default(
            &lookup,
            "DIALIN_DATABASE_PATH",
            "dialin-server.db",
        ));

        let jwt_secret = required_trimmed(&lookup, "AUTH_JWT_SECRET")?;
        if jwt_secret.len() < 16 {
            return Err(ConfigError::Invalid(
                "AUTH_JWT_SECRET must be at least 16 characters".to_string(),
            ));
        }
        let jwt_issuer = optional_trimmed(&lookup, "AUTH_JWT_ISSUER");
        let jwt_audience = value_or_default(&lookup, "AUTH_JWT_AUDIENCE", "authenticated");

        let auth_clock_skew_secs = value_or_default(&lookup, "AUTH_CLOCK_SKEW_SECS", "60")
            .parse::<u64>()
            .map_err(|_| {
                ConfigError::Invalid(
                    "AUTH_CLOCK_SKEW_SECS must be an integer in [0, 300]".to_string(),
                )
            })?;
        if auth_clock_skew_secs > 300 {
            return Err(ConfigError::Invalid(
                "AUTH_CLOCK_SKEW_SECS must be in [0, 300]".to_string(),
            ));
        }

        let rate_limit_window_secs = value_or_default(&lookup, "RATE_LIMIT_WINDOW_SECS", "60")
            .parse::<u64>()
            .map_err(|_| {
                ConfigError::Invalid(
                    "RATE_LIMIT_WINDOW_SECS must be an integer in [10, 3600]".to_string(),
                )
            })?;
        if !(10..=3_600).contains(&rate_limit_window_secs) {
            return Err(ConfigError::Invalid(
                "RATE_LIMIT_WINDOW_SECS must be in [10, 3600]".to_string(),
            ));
        }

        let pull_requests_per_window =
            per_window_limit(&lookup, "SYNC_PULL_REQUESTS_PER_WINDOW", "120", 5_000)?;
        let push_records_per_window =
            per_window_limit(&lookup, "SYNC_PUSH_RECORDS_PER_WINDOW", "2000", 100_000)?;

        Ok(Self {
            bind_addr,
            database_path,
            jwt_secret,
            jwt_issuer,
            jwt_audience,
            auth_clock_skew: Duration::from_secs(auth_clock_skew_secs),
            rate_limit_window: Duration::from_secs(rate_limit_window_secs),
            pull_requests_per_window,
            push_records_per_window,
        })
    }
}

fn per_window_limit(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: &str,
    max: u32,
) -> Result<u32, ConfigError> {
    let limit = value_or_default(&lookup, name, default)
        .parse::<u32>()
        .map_err(|_| ConfigError::Invalid(format!("{name} must be an integer in [1, {max}]")))?;
    if !(1..=max).contains(&limit) {
        return Err(ConfigError::Invalid(format!("{name} must be in [1, {max}]")));
    }
    Ok(limit)
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn required_trimmed(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    optional_trimmed(lookup, name).ok_or(ConfigError::MissingVar(name))
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
