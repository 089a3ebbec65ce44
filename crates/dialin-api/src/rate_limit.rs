//! Per-user sync budgets over fixed windows.
//!
//! Pulls and exports cost one unit per request. Pushes cost one unit per
//! record, so the push budget bounds how much one account writes per window
//! however the client batches. A batch larger than the whole push budget is
//! only admitted into an unused window.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Mutex;

use crate::auth::user_fingerprint;
use crate::config::AppConfig;
use crate::error::AppError;

/// Expired windows are swept once this many are tracked.
const SWEEP_THRESHOLD: usize = 4_096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lane {
    /// Pull and export requests
    Pull,
    /// Pushed records
    Push,
}

impl Lane {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pull => "pull",
            Self::Push => "push",
        }
    }
}

/// Totals since startup, reported by `/healthz`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaSnapshot {
    pub pull_requests: u64,
    pub pull_rejections: u64,
    pub push_records: u64,
    pub push_rejections: u64,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    opened_at: Instant,
    spent: u32,
}

#[derive(Default)]
struct Ledger {
    windows: HashMap<(Lane, String), Window>,
    totals: QuotaSnapshot,
}

pub struct SyncQuota {
    ledger: Mutex<Ledger>,
    window: Duration,
    pull_requests: u32,
    push_records: u32,
}

impl SyncQuota {
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.rate_limit_window,
            config.pull_requests_per_window,
            config.push_records_per_window,
        )
    }

    pub fn new(window: Duration, pull_requests: u32, push_records: u32) -> Self {
        Self {
            ledger: Mutex::new(Ledger::default()),
            window,
            pull_requests,
            push_records,
        }
    }

    pub async fn charge_pull(&self, user_id: &str) -> Result<(), AppError> {
        self.charge(Lane::Pull, user_id, 1).await
    }

    /// Charge a decoded push batch. Empty batches still cost one unit.
    pub async fn charge_push(&self, user_id: &str, records: usize) -> Result<(), AppError> {
        let cost = u32::try_from(records).unwrap_or(u32::MAX).max(1);
        self.charge(Lane::Push, user_id, cost).await
    }

    pub async fn snapshot(&self) -> QuotaSnapshot {
        self.ledger.lock().await.totals
    }

    async fn charge(&self, lane: Lane, user_id: &str, cost: u32) -> Result<(), AppError> {
        let budget = match lane {
            Lane::Pull => self.pull_requests,
            Lane::Push => self.push_records,
        };
        let now = Instant::now();
        let mut guard = self.ledger.lock().await;
        let ledger = &mut *guard;

        if ledger.windows.len() >= SWEEP_THRESHOLD {
            let length = self.window;
            ledger
                .windows
                .retain(|_, window| now.duration_since(window.opened_at) < length);
        }

        let window = ledger
            .windows
            .entry((lane, user_id.to_string()))
            .or_insert(Window {
                opened_at: now,
                spent: 0,
            });
        if now.duration_since(window.opened_at) >= self.window {
            *window = Window {
                opened_at: now,
                spent: 0,
            };
        }

        if window.spent > 0 && window.spent.saturating_add(cost) > budget {
            let retry_after_secs = self
                .window
                .saturating_sub(now.duration_since(window.opened_at))
                .as_secs()
                .max(1);
            match lane {
                Lane::Pull => ledger.totals.pull_rejections += 1,
                Lane::Push => ledger.totals.push_rejections += 1,
            }
            tracing::warn!(
                lane = lane.label(),
                user = user_fingerprint(user_id),
                cost,
                spent = window.spent,
                budget,
                retry_after_secs,
                "Sync budget exhausted"
            );
            return Err(AppError::too_many_requests(
                format!("Sync {} budget exhausted for this window", lane.label()),
                retry_after_secs,
            ));
        }

        window.spent = window.spent.saturating_add(cost);
        match lane {
            Lane::Pull => ledger.totals.pull_requests += 1,
            Lane::Push => ledger.totals.push_records += u64::from(cost),
        }
        Ok(())
    }
}
