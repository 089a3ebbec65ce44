use std::path::Path;

use dialin_core::config::ClientConfig;
use dialin_core::sync::Watermark;
use serde::Serialize;

use crate::commands::common::{format_sync_timestamp, open_replica};
use crate::error::CliError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub device_id: String,
    pub database: String,
    pub sync_enabled: bool,
    pub api_url: Option<String>,
    pub last_sync_server_time: Option<i64>,
    pub pending_bags: usize,
    pub pending_brews: usize,
    pub pending_deletions: usize,
}

pub async fn collect_status(db_path: &Path, config: &ClientConfig) -> Result<StatusReport, CliError> {
    let replica = open_replica(db_path).await?;
    let watermark = Watermark::new(replica.storage.clone()).load().await?;
    let pending = replica.pending_changes().await;

    Ok(StatusReport {
        device_id: replica.device_id.to_string(),
        database: db_path.display().to_string(),
        sync_enabled: config.sync_enabled(),
        api_url: config.api_url.clone(),
        last_sync_server_time: watermark,
        pending_bags: pending.bags,
        pending_brews: pending.brews,
        pending_deletions: pending.deletions,
    })
}

pub async fn run_status(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let config = ClientConfig::from_env()?;
    let status = collect_status(db_path, &config).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    for line in format_status_lines(&status) {
        println!("{line}");
    }
    Ok(())
}

pub fn format_status_lines(status: &StatusReport) -> Vec<String> {
    let sync = match (&status.api_url, status.sync_enabled) {
        (Some(url), true) => format!("enabled ({url})"),
        (Some(url), false) => format!("missing DIALIN_AUTH_TOKEN ({url})"),
        (None, _) => "not configured".to_string(),
    };
    let last_sync = status
        .last_sync_server_time
        .map_or_else(|| "never".to_string(), format_sync_timestamp);

    vec![
        format!("Device:     {}", status.device_id),
        format!("Database:   {}", status.database),
        format!("Sync:       {sync}"),
        format!("Last sync:  {last_sync}"),
        format!(
            "Pending:    {} bags, {} brews, {} deletions",
            status.pending_bags, status.pending_brews, status.pending_deletions
        ),
    ]
}
