use std::path::Path;
use std::sync::Arc;

use dialin_core::scheduler::SchedulerState;
use dialin_core::{SyncError, SyncOutcome, SyncReport, SyncScheduler};

use crate::commands::common::{build_coordinator, format_sync_timestamp, load_sync_config, open_replica};
use crate::error::CliError;

pub async fn run_sync(db_path: &Path) -> Result<(), CliError> {
    let config = load_sync_config()?;
    let replica = open_replica(db_path).await?;
    let coordinator = build_coordinator(replica, &config)?;

    match coordinator.sync_now().await {
        Ok(SyncOutcome::Completed(report)) => {
            println!("{}", format_sync_report(&report));
            Ok(())
        }
        Ok(SyncOutcome::Skipped) => {
            println!("Sync already in progress");
            Ok(())
        }
        Err(SyncError::Unauthorized) => Err(CliError::SyncUnauthorized),
        Err(error) => Err(error.into()),
    }
}

/// Run the scheduler until Ctrl-C or an authorization failure.
pub async fn run_sync_watch(db_path: &Path) -> Result<(), CliError> {
    let config = load_sync_config()?;
    let replica = open_replica(db_path).await?;
    let coordinator = Arc::new(build_coordinator(replica, &config)?);

    let handle = SyncScheduler::start(coordinator, config.sync_interval);
    let mut state = handle.subscribe();
    println!(
        "Syncing every {}s; press Ctrl-C to stop",
        config.sync_interval.as_secs()
    );

    let result = loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => break signal.map_err(CliError::Io),
            changed = state.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let snapshot = state.borrow_and_update().clone();
                println!("{}", format_scheduler_state(&snapshot));
                if snapshot.paused {
                    break Err(CliError::SyncUnauthorized);
                }
            }
        }
    };

    handle.stop().await;
    result
}

pub async fn run_sync_reset(db_path: &Path) -> Result<(), CliError> {
    let replica = open_replica(db_path).await?;
    dialin_core::sync::Watermark::new(replica.storage.clone())
        .clear()
        .await?;
    println!("Sync state cleared; the next sync pulls everything");
    Ok(())
}

pub fn format_sync_report(report: &SyncReport) -> String {
    let mut line = format!(
        "Sync completed: pulled {} ({} applied, {} removed), pushed {} ({} conflicts)",
        report.pulled,
        report.adopted,
        report.removed,
        report.pushed,
        report.conflicts
    );
    if report.failed > 0 {
        line.push_str(&format!(", {} kept for retry", report.failed));
    }
    if report.purged > 0 {
        line.push_str(&format!(", {} deletions finalized", report.purged));
    }
    line.push_str(&format!(" at {}", format_sync_timestamp(report.server_time)));
    line
}

pub fn format_scheduler_state(state: &SchedulerState) -> String {
    let mut line = format!(
        "rounds: {} ok, {} failed",
        state.rounds_completed, state.rounds_failed
    );
    if let Some(error) = &state.last_error {
        line.push_str(&format!("; last error: {error}"));
    }
    if state.paused {
        line.push_str("; paused until re-authentication");
    }
    line
}
