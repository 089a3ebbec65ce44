//! Pull-then-push sync rounds against a [`SyncTransport`].

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::watch;

use super::transport::{SyncTransport, TransportError};
use super::watermark::Watermark;
use super::wire::{PullData, PushCounts, PushRequest, WireRecord};
use crate::models::{EntityKind, EntityPayload, Record};
use crate::replica::Replica;
use crate::store::{EntityStore, RemoteApplied};
use crate::util;

/// Where the current round is. Observable through
/// [`SyncCoordinator::subscribe_phase`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Authenticating,
    Pulling,
    Merging,
    Pushing,
    Cleaning,
    Failed,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Sync is not authorized; sign in again")]
    Unauthorized,
    #[error(transparent)]
    Transport(TransportError),
    #[error("Local store error during sync: {0}")]
    Store(#[from] crate::Error),
}

impl SyncError {
    /// Whether the next scheduled round may simply retry.
    pub const fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Unauthorized)
    }
}

impl From<TransportError> for SyncError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Unauthorized => Self::Unauthorized,
            other => Self::Transport(other),
        }
    }
}

/// Summary of one completed round
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub pulled: usize,
    pub adopted: usize,
    pub removed: usize,
    pub pushed: usize,
    pub created: usize,
    pub updated: usize,
    pub conflicts: usize,
    pub failed: usize,
    pub purged: usize,
    pub server_time: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed(SyncReport),
    /// Another round was already running
    Skipped,
}

/// Drives sync rounds for one replica.
///
/// At most one round runs at a time; a request made while a round is in
/// flight returns [`SyncOutcome::Skipped`] instead of queueing.
pub struct SyncCoordinator<T> {
    replica: Replica,
    watermark: Watermark,
    transport: T,
    in_flight: AtomicBool,
    phase: watch::Sender<SyncPhase>,
}

impl<T: SyncTransport> SyncCoordinator<T> {
    pub fn new(replica: Replica, transport: T) -> Self {
        let watermark = Watermark::new(replica.storage.clone());
        let (phase, _) = watch::channel(SyncPhase::Idle);
        Self {
            replica,
            watermark,
            transport,
            in_flight: AtomicBool::new(false),
            phase,
        }
    }

    pub const fn replica(&self) -> &Replica {
        &self.replica
    }

    pub const fn transport(&self) -> &T {
        &self.transport
    }

    pub fn is_syncing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn phase(&self) -> SyncPhase {
        *self.phase.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<SyncPhase> {
        self.phase.subscribe()
    }

    /// Last committed watermark, if any round has completed.
    pub async fn watermark(&self) -> crate::Result<Option<i64>> {
        self.watermark.load().await
    }

    /// Forget the watermark so the next round is a full sync. Local records
    /// and their dirty flags are kept.
    pub async fn reset_sync_state(&self) -> crate::Result<()> {
        self.watermark.clear().await?;
        tracing::info!("Cleared sync watermark");
        Ok(())
    }

    /// Run one round unless another is already in flight.
    pub async fn sync_now(&self) -> Result<SyncOutcome, SyncError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Sync already in flight; ignoring request");
            return Ok(SyncOutcome::Skipped);
        }
        let _guard = InFlightGuard {
            flag: &self.in_flight,
            phase: &self.phase,
        };

        match self.run_round().await {
            Ok(report) => {
                tracing::info!(
                    pulled = report.pulled,
                    adopted = report.adopted,
                    removed = report.removed,
                    pushed = report.pushed,
                    conflicts = report.conflicts,
                    failed = report.failed,
                    purged = report.purged,
                    server_time = report.server_time,
                    "Sync round completed"
                );
                Ok(SyncOutcome::Completed(report))
            }
            Err(error) => {
                self.phase.send_replace(SyncPhase::Failed);
                tracing::warn!(%error, recoverable = error.is_recoverable(), "Sync round failed");
                Err(error)
            }
        }
    }

    fn enter(&self, phase: SyncPhase) {
        self.phase.send_replace(phase);
    }

    async fn run_round(&self) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::default();

        self.enter(SyncPhase::Authenticating);
        self.transport.check_auth().await?;

        self.enter(SyncPhase::Pulling);
        let since = self.watermark.load().await?;
        let pull = self.transport.pull(since).await?;
        report.pulled = pull.data.len();
        tracing::debug!(?since, records = report.pulled, "Pulled remote changes");

        self.enter(SyncPhase::Merging);
        let PullData {
            coffee_bags,
            coffee_brews,
        } = pull.data;
        apply_pulled(&self.replica.bags, coffee_bags, &mut report).await?;
        apply_pulled(&self.replica.brews, coffee_brews, &mut report).await?;

        self.enter(SyncPhase::Pushing);
        let dirty_bags = dirty_set(&self.replica.bags).await;
        let dirty_brews = dirty_set(&self.replica.brews).await;
        if dirty_bags.is_empty() && dirty_brews.is_empty() {
            tracing::debug!("No local changes to push");
        } else {
            let request = PushRequest {
                device_id: self.replica.device_id.clone(),
                coffee_bags: dirty_bags.iter().map(WireRecord::from_record).collect(),
                coffee_brews: dirty_brews.iter().map(WireRecord::from_record).collect(),
            };
            let response = self.transport.push(&request).await?;
            let synced_at = util::now();

            for kind in EntityKind::ALL {
                let counts = response.results.for_kind(kind);
                report.created += counts.created;
                report.updated += counts.updated;
                report.conflicts += counts.conflicts;
                report.failed += counts.failed.len();
            }
            report.pushed = request.len();

            let results = &response.results;
            mark_acknowledged(
                &self.replica.bags,
                &dirty_bags,
                results.for_kind(EntityKind::CoffeeBag),
                synced_at,
            )
            .await?;
            mark_acknowledged(
                &self.replica.brews,
                &dirty_brews,
                results.for_kind(EntityKind::CoffeeBrew),
                synced_at,
            )
            .await?;
        }

        self.watermark.store(pull.server_time).await?;
        report.server_time = pull.server_time;

        self.enter(SyncPhase::Cleaning);
        report.purged = self.replica.bags.purge_clean_tombstones().await?
            + self.replica.brews.purge_clean_tombstones().await?;

        Ok(report)
    }
}

struct InFlightGuard<'a> {
    flag: &'a AtomicBool,
    phase: &'a watch::Sender<SyncPhase>,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.phase.send_replace(SyncPhase::Idle);
        self.flag.store(false, Ordering::Release);
    }
}

async fn apply_pulled<P: EntityPayload>(
    store: &EntityStore<P>,
    records: Vec<WireRecord<P>>,
    report: &mut SyncReport,
) -> Result<(), SyncError> {
    for wire in records {
        let id = wire.id;
        match store.reconcile_remote(wire.into_record()).await? {
            RemoteApplied::Adopted => {
                tracing::debug!(kind = %P::KIND, %id, "Adopted remote version");
                report.adopted += 1;
            }
            RemoteApplied::Removed => {
                tracing::debug!(kind = %P::KIND, %id, "Removed record deleted remotely");
                report.removed += 1;
            }
            RemoteApplied::Unchanged => {}
        }
    }
    Ok(())
}

/// Dirty live records followed by dirty tombstones.
async fn dirty_set<P: EntityPayload>(store: &EntityStore<P>) -> Vec<Record<P>> {
    let mut dirty = store.list_dirty().await;
    dirty.extend(store.list_dirty_tombstones().await);
    dirty
}

async fn mark_acknowledged<P: EntityPayload>(
    store: &EntityStore<P>,
    pushed: &[Record<P>],
    counts: &PushCounts,
    synced_at: DateTime<Utc>,
) -> crate::Result<()> {
    let acknowledged: Vec<_> = pushed
        .iter()
        .filter(|record| !counts.failed.contains(&record.id))
        .map(|record| (record.id, record.updated_at))
        .collect();
    if !counts.failed.is_empty() {
        tracing::warn!(
            kind = %P::KIND,
            failed = counts.failed.len(),
            "Server failed to store some records; keeping them dirty"
        );
    }
    store.mark_synced(&acknowledged, synced_at).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::device::DeviceId;
    use crate::models::{BagFields, CoffeeBag};
    use crate::storage::{MemoryStorage, Storage};
    use crate::testing::FakeTransport;
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    async fn coordinator(transport: FakeTransport) -> SyncCoordinator<FakeTransport> {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let replica = Replica::open(storage).await.unwrap();
        SyncCoordinator::new(replica, transport)
    }

    fn completed(outcome: SyncOutcome) -> SyncReport {
        match outcome {
            SyncOutcome::Completed(report) => report,
            SyncOutcome::Skipped => panic!("round was skipped"),
        }
    }

    #[tokio::test]
    async fn first_round_pushes_dirty_records_and_commits_watermark() {
        let sync = coordinator(FakeTransport::new(500)).await;
        let bag = sync
            .replica()
            .bags
            .create(BagFields::new("Kenya", "Sey"))
            .await
            .unwrap();

        let report = completed(sync.sync_now().await.unwrap());

        assert_eq!(report.pushed, 1);
        assert_eq!(report.created, 1);
        assert_eq!(report.server_time, 500);
        let pushes = sync.transport().pushes();
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].device_id, sync.replica().device_id);
        assert_eq!(pushes[0].coffee_bags[0].id, bag.id);
        assert!(sync.replica().bags.list_dirty().await.is_empty());
        assert!(sync.replica().bags.get_by_id(bag.id).await.unwrap().synced_at.is_some());
        assert_eq!(sync.watermark().await.unwrap(), Some(500));
        assert_eq!(sync.phase(), SyncPhase::Idle);
    }

    #[tokio::test]
    async fn later_rounds_pull_since_watermark_and_skip_empty_push() {
        let sync = coordinator(FakeTransport::new(500)).await;
        sync.replica()
            .bags
            .create(BagFields::new("Kenya", "Sey"))
            .await
            .unwrap();

        sync.sync_now().await.unwrap();
        sync.transport().set_server_time(900);
        let report = completed(sync.sync_now().await.unwrap());

        assert_eq!(report.pushed, 0);
        assert_eq!(sync.transport().pulls(), vec![None, Some(500)]);
        assert_eq!(sync.transport().pushes().len(), 1);
        assert_eq!(sync.watermark().await.unwrap(), Some(900));
    }

    #[tokio::test]
    async fn failed_push_leaves_dirty_flags_and_watermark() {
        let sync = coordinator(FakeTransport::new(500)).await;
        sync.replica()
            .bags
            .create(BagFields::new("Kenya", "Sey"))
            .await
            .unwrap();
        sync.transport().fail_push(true);

        let error = sync.sync_now().await.unwrap_err();

        assert!(matches!(error, SyncError::Transport(_)));
        assert!(error.is_recoverable());
        assert_eq!(sync.replica().bags.list_dirty().await.len(), 1);
        assert_eq!(sync.watermark().await.unwrap(), None);
        assert!(!sync.is_syncing());
        assert_eq!(sync.phase(), SyncPhase::Idle);
    }

    #[tokio::test]
    async fn unauthorized_round_stops_before_pull() {
        let sync = coordinator(FakeTransport::new(500)).await;
        sync.transport().set_authorized(false);

        let error = sync.sync_now().await.unwrap_err();

        assert!(matches!(error, SyncError::Unauthorized));
        assert!(!error.is_recoverable());
        assert!(sync.transport().pulls().is_empty());
    }

    #[tokio::test]
    async fn pulled_records_are_merged_and_tombstones_remove_local_copies() {
        let sync = coordinator(FakeTransport::new(500)).await;
        let local = sync
            .replica()
            .bags
            .create(BagFields::new("Local", "Onyx"))
            .await
            .unwrap();

        let remote_new = CoffeeBag::new(BagFields::new("Remote", "Sey"), DeviceId::from("dev-b"));
        let mut remote_tombstone = local.clone();
        remote_tombstone.updated_at = local.updated_at + Duration::seconds(1);
        remote_tombstone.deleted_at = Some(remote_tombstone.updated_at);
        sync.transport().set_pull_data(PullData {
            coffee_bags: vec![
                WireRecord::from_record(&remote_new),
                WireRecord::from_record(&remote_tombstone),
            ],
            coffee_brews: Vec::new(),
        });

        let report = completed(sync.sync_now().await.unwrap());

        assert_eq!(report.adopted, 1);
        assert_eq!(report.removed, 1);
        assert_eq!(report.pushed, 0);
        let visible = sync.replica().bags.list_visible().await;
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, remote_new.id);
        assert!(!visible[0].is_dirty);
        assert!(sync.replica().bags.get_by_id(local.id).await.is_none());
    }

    #[tokio::test]
    async fn pulling_the_same_response_twice_is_idempotent() {
        let sync = coordinator(FakeTransport::new(500)).await;
        let remote = CoffeeBag::new(BagFields::new("Remote", "Sey"), DeviceId::from("dev-b"));
        sync.transport().set_pull_data(PullData {
            coffee_bags: vec![WireRecord::from_record(&remote)],
            coffee_brews: Vec::new(),
        });

        let first = completed(sync.sync_now().await.unwrap());
        let after_first = sync.replica().bags.list_visible().await;
        let second = completed(sync.sync_now().await.unwrap());
        let after_second = sync.replica().bags.list_visible().await;

        assert_eq!(first.adopted, 1);
        assert_eq!(second.adopted, 0);
        assert_eq!(after_first, after_second);
    }

    #[tokio::test]
    async fn records_the_server_failed_to_store_stay_dirty() {
        let sync = coordinator(FakeTransport::new(500)).await;
        let bags = &sync.replica().bags;
        let stored = bags.create(BagFields::new("Stored", "Sey")).await.unwrap();
        let rejected = bags.create(BagFields::new("Rejected", "Sey")).await.unwrap();
        sync.transport().fail_ids(vec![rejected.id]);

        let report = completed(sync.sync_now().await.unwrap());

        assert_eq!(report.failed, 1);
        let dirty: Vec<_> = bags.list_dirty().await.into_iter().map(|r| r.id).collect();
        assert_eq!(dirty, vec![rejected.id]);
        assert!(!bags.get_by_id(stored.id).await.unwrap().is_dirty);
    }

    #[tokio::test]
    async fn acknowledged_tombstones_are_purged() {
        let sync = coordinator(FakeTransport::new(500)).await;
        let bag = sync
            .replica()
            .bags
            .create(BagFields::new("Kenya", "Sey"))
            .await
            .unwrap();
        sync.sync_now().await.unwrap();

        sync.replica().bags.soft_delete(bag.id).await.unwrap();
        let report = completed(sync.sync_now().await.unwrap());

        assert_eq!(report.purged, 1);
        assert!(sync.replica().bags.get_by_id(bag.id).await.is_none());
        let pushes = sync.transport().pushes();
        assert!(pushes[1].coffee_bags[0].deleted_at.is_some());
    }

    #[tokio::test]
    async fn overlapping_request_is_skipped_not_queued() {
        let sync = Arc::new(coordinator(FakeTransport::new(500).gated()).await);

        let running = {
            let sync = sync.clone();
            tokio::spawn(async move { sync.sync_now().await })
        };
        sync.transport().wait_until_pulling().await;

        assert!(sync.is_syncing());
        assert_eq!(sync.phase(), SyncPhase::Pulling);
        assert_eq!(sync.sync_now().await.unwrap(), SyncOutcome::Skipped);

        sync.transport().open_gate();
        let outcome = running.await.unwrap().unwrap();
        assert!(matches!(outcome, SyncOutcome::Completed(_)));
        assert_eq!(sync.transport().pulls().len(), 1);
    }

    #[tokio::test]
    async fn reset_sync_state_forces_full_pull() {
        let sync = coordinator(FakeTransport::new(500)).await;
        sync.sync_now().await.unwrap();

        sync.reset_sync_state().await.unwrap();
        sync.sync_now().await.unwrap();

        assert_eq!(sync.transport().pulls(), vec![None, None]);
    }
}
