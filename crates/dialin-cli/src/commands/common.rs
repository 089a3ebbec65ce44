use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use dialin_core::config::ClientConfig;
use dialin_core::db::SqliteStorage;
use dialin_core::models::{EntityKind, EntityPayload, Record, RecordId};
use dialin_core::sync::HttpTransport;
use dialin_core::{EntityStore, Replica, SyncCoordinator};

use crate::error::CliError;

const SHORT_ID_LEN: usize = 13;
const AMBIGUOUS_PREVIEW: usize = 3;

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("DIALIN_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("dialin")
        .join("dialin.db")
}

pub async fn open_replica(path: &Path) -> Result<Replica, CliError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let storage = SqliteStorage::open(path)?;
    Ok(Replica::open(Arc::new(storage)).await?)
}

/// Client config from the environment; errors when sync is not set up.
pub fn load_sync_config() -> Result<ClientConfig, CliError> {
    let config = ClientConfig::from_env()?;
    if !config.sync_enabled() {
        return Err(CliError::SyncNotConfigured);
    }
    Ok(config)
}

pub fn build_coordinator(
    replica: Replica,
    config: &ClientConfig,
) -> Result<SyncCoordinator<HttpTransport>, CliError> {
    let transport = HttpTransport::from_config(config)?;
    Ok(SyncCoordinator::new(replica, transport))
}

pub fn normalize_identifier(id: &str) -> Result<String, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyId)
    } else {
        Ok(trimmed.to_string())
    }
}

/// Find a live record by full id or unique id prefix.
pub async fn resolve_record<P: EntityPayload>(
    store: &EntityStore<P>,
    query: &str,
) -> Result<Record<P>, CliError> {
    let query = normalize_identifier(query)?;
    let label = kind_label(P::KIND);

    if let Ok(id) = query.parse::<RecordId>() {
        return store
            .get_visible(id)
            .await
            .ok_or(CliError::NotFound(label, query));
    }

    let needle = query.to_ascii_lowercase();
    let mut matches: Vec<Record<P>> = store
        .list_visible()
        .await
        .into_iter()
        .filter(|record| record.id.as_str().starts_with(&needle))
        .collect();

    match matches.len() {
        0 => Err(CliError::NotFound(label, query)),
        1 => Ok(matches.remove(0)),
        _ => {
            let options = matches
                .iter()
                .take(AMBIGUOUS_PREVIEW)
                .map(|record| short_id(record.id))
                .collect::<Vec<_>>()
                .join(", ");
            Err(CliError::AmbiguousId(format!(
                "ID prefix '{query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

pub const fn kind_label(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::CoffeeBag => "Bag",
        EntityKind::CoffeeBrew => "Brew",
    }
}

pub fn short_id(id: RecordId) -> String {
    id.as_str().chars().take(SHORT_ID_LEN).collect()
}

pub fn truncate(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = collapsed.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}

/// `YYYY-MM-DD` as midnight UTC.
pub fn parse_date(value: &str) -> Result<DateTime<Utc>, String> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|date_time| date_time.and_utc())
        .ok_or_else(|| format!("expected a date like 2024-05-01, got '{value}'"))
}

/// Non-negative, finite number.
pub fn parse_measurement(value: &str) -> Result<f64, String> {
    let parsed = value
        .trim()
        .parse::<f64>()
        .map_err(|_| format!("'{value}' is not a number"))?;
    if !parsed.is_finite() || parsed < 0.0 {
        return Err(format!("'{value}' must be a non-negative number"));
    }
    Ok(parsed)
}
