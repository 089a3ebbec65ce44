//! Client sync configuration read from the environment.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::util::is_http_url;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Sync is disabled when unset
    pub api_url: Option<String>,
    pub auth_token: Option<String>,
    pub sync_interval: Duration,
    pub http_timeout: Duration,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ClientConfig")
            .field("api_url", &self.api_url)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .field("sync_interval", &self.sync_interval)
            .field("http_timeout", &self.http_timeout)
            .finish()
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            auth_token: None,
            sync_interval: Duration::from_secs(30),
            http_timeout: Duration::from_secs(15),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_url = optional_trimmed(&lookup, "DIALIN_API_URL")
            .map(|value| value.trim_end_matches('/').to_string());
        if let Some(url) = api_url.as_deref() {
            if !is_http_url(url) {
                return Err(ConfigError::Invalid(
                    "DIALIN_API_URL must start with http:// or https://".to_string(),
                ));
            }
        }

        let auth_token = optional_trimmed(&lookup, "DIALIN_AUTH_TOKEN");

        let sync_interval_secs = bounded_secs(&lookup, "DIALIN_SYNC_INTERVAL_SECS", 30, 5..=3_600)?;
        let http_timeout_secs = bounded_secs(&lookup, "DIALIN_HTTP_TIMEOUT_SECS", 15, 1..=120)?;

        Ok(Self {
            api_url,
            auth_token,
            sync_interval: Duration::from_secs(sync_interval_secs),
            http_timeout: Duration::from_secs(http_timeout_secs),
        })
    }

    /// Whether enough is configured to talk to a sync server.
    pub const fn sync_enabled(&self) -> bool {
        self.api_url.is_some() && self.auth_token.is_some()
    }
}

fn bounded_secs(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: u64,
    range: std::ops::RangeInclusive<u64>,
) -> Result<u64, ConfigError> {
    let Some(raw) = optional_trimmed(lookup, name) else {
        return Ok(default);
    };
    let value = raw.parse::<u64>().map_err(|_| {
        ConfigError::Invalid(format!(
            "{name} must be an integer in [{}, {}]",
            range.start(),
            range.end()
        ))
    })?;
    if !range.contains(&value) {
        return Err(ConfigError::Invalid(format!(
            "{name} must be in [{}, {}]",
            range.start(),
            range.end()
        )));
    }
    Ok(value)
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
