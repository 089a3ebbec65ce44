use std::io;

use dialin_core::config::ConfigError;
use dialin_core::sync::TransportError;
use dialin_core::SyncError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] dialin_core::Error),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("ID cannot be empty")]
    EmptyId,
    #[error("{0} not found for id/prefix: {1}")]
    NotFound(&'static str, String),
    #[error("{0}")]
    AmbiguousId(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Sync is not configured. Set DIALIN_API_URL and DIALIN_AUTH_TOKEN to enable `dialin sync`.")]
    SyncNotConfigured,
    #[error("The sync server rejected DIALIN_AUTH_TOKEN. Update the token and retry.")]
    SyncUnauthorized,
}
