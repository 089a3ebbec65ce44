//! Several replicas syncing against one in-process server.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dialin_api::{AppError, SqliteBackingStore, SyncService};
use dialin_core::models::{BagFields, BrewFields, RecordId};
use dialin_core::sync::{
    PullResponse, PushRequest, PushResponse, SyncTransport, TransportError, TransportResult,
};
use dialin_core::{MemoryStorage, Replica, SyncCoordinator, SyncError, SyncOutcome, SyncReport};
use pretty_assertions::assert_eq;

/// Calls the server's sync service directly, as one authenticated owner.
struct LoopbackTransport {
    service: SyncService,
    owner_id: String,
    authorized: AtomicBool,
}

impl LoopbackTransport {
    fn new(service: SyncService, owner_id: &str) -> Self {
        Self {
            service,
            owner_id: owner_id.to_string(),
            authorized: AtomicBool::new(true),
        }
    }
}

fn transport_error(error: AppError) -> TransportError {
    match error {
        AppError::Unauthorized(_) => TransportError::Unauthorized,
        other => TransportError::Api(other.to_string()),
    }
}

#[async_trait]
impl SyncTransport for LoopbackTransport {
    async fn check_auth(&self) -> TransportResult<()> {
        if self.authorized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::Unauthorized)
        }
    }

    async fn pull(&self, since: Option<i64>) -> TransportResult<PullResponse> {
        self.service
            .pull(&self.owner_id, since)
            .await
            .map_err(transport_error)
    }

    async fn push(&self, request: &PushRequest) -> TransportResult<PushResponse> {
        self.service
            .push(&self.owner_id, request.clone())
            .await
            .map_err(transport_error)
    }
}

type Device = SyncCoordinator<LoopbackTransport>;

fn server() -> SyncService {
    SyncService::new(Arc::new(SqliteBackingStore::open_in_memory().unwrap()))
}

async fn device(service: &SyncService, owner_id: &str) -> Device {
    let replica = Replica::open(Arc::new(MemoryStorage::new())).await.unwrap();
    SyncCoordinator::new(replica, LoopbackTransport::new(service.clone(), owner_id))
}

async fn sync(device: &Device) -> SyncReport {
    match device.sync_now().await.unwrap() {
        SyncOutcome::Completed(report) => report,
        SyncOutcome::Skipped => panic!("round unexpectedly skipped"),
    }
}

/// Conflicting edits on different devices must not share a millisecond.
async fn tick() {
    tokio::time::sleep(Duration::from_millis(2)).await;
}

type BagState = Vec<(RecordId, BagFields, DateTime<Utc>)>;
type BrewState = Vec<(RecordId, BrewFields, DateTime<Utc>)>;

async fn snapshot(device: &Device) -> (BagState, BrewState) {
    let mut bags: BagState = device
        .replica()
        .bags
        .list_visible()
        .await
        .into_iter()
        .map(|bag| (bag.id, bag.payload, bag.updated_at))
        .collect();
    bags.sort_by_key(|(id, _, _)| *id);

    let mut brews: BrewState = device
        .replica()
        .brews
        .list_visible()
        .await
        .into_iter()
        .map(|brew| (brew.id, brew.payload, brew.updated_at))
        .collect();
    brews.sort_by_key(|(id, _, _)| *id);

    (bags, brews)
}

#[tokio::test]
async fn later_edit_on_second_device_reaches_first_device() {
    let service = server();
    let a = device(&service, "owner").await;
    let b = device(&service, "owner").await;

    let created = a
        .replica()
        .bags
        .create(BagFields::new("Kenya", "Sey"))
        .await
        .unwrap();

    let report = sync(&b).await;
    assert_eq!(report.pulled, 0);

    let report = sync(&a).await;
    assert_eq!(report.created, 1);

    let report = sync(&b).await;
    assert_eq!(report.adopted, 1);
    let adopted = b.replica().bags.get_visible(created.id).await.unwrap();
    assert_eq!(adopted.updated_at, created.updated_at);
    assert!(!adopted.is_dirty);

    tick().await;
    let edited = b
        .replica()
        .bags
        .update(created.id, |fields| fields.name = "Kenya Kiambu".to_string())
        .await
        .unwrap();
    assert!(edited.updated_at > created.updated_at);
    let report = sync(&b).await;
    assert_eq!(report.updated, 1);

    sync(&a).await;
    let on_a = a.replica().bags.get_visible(created.id).await.unwrap();
    assert_eq!(on_a.payload.name, "Kenya Kiambu");
    assert_eq!(on_a.updated_at, edited.updated_at);
    assert_eq!(snapshot(&a).await, snapshot(&b).await);
}

#[tokio::test]
async fn deletion_reaches_device_that_only_pulled() {
    let service = server();
    let a = device(&service, "owner").await;
    let b = device(&service, "owner").await;

    let bag = a
        .replica()
        .bags
        .create(BagFields::new("Colombia", "Onyx"))
        .await
        .unwrap();
    sync(&a).await;
    sync(&b).await;
    assert!(b.replica().bags.get_by_id(bag.id).await.is_some());

    tick().await;
    a.replica().bags.soft_delete(bag.id).await.unwrap();
    let report = sync(&a).await;
    assert_eq!(report.updated, 1);
    assert_eq!(report.purged, 1);
    assert!(a.replica().bags.get_by_id(bag.id).await.is_none());

    let report = sync(&b).await;
    assert_eq!(report.removed, 1);
    assert!(b.replica().bags.get_by_id(bag.id).await.is_none());

    let full = service.pull("owner", None).await.unwrap();
    assert_eq!(full.data.coffee_bags.len(), 1);
    assert!(full.data.coffee_bags[0].is_deleted());
}

#[tokio::test]
async fn reset_device_drops_record_deleted_while_it_was_clean() {
    let service = server();
    let a = device(&service, "owner").await;
    let b = device(&service, "owner").await;

    let bag = a
        .replica()
        .bags
        .create(BagFields::new("Ethiopia", "Friedhats"))
        .await
        .unwrap();
    sync(&a).await;
    sync(&b).await;

    tick().await;
    a.replica().bags.soft_delete(bag.id).await.unwrap();
    sync(&a).await;

    b.reset_sync_state().await.unwrap();
    let report = sync(&b).await;
    assert_eq!(report.removed, 1);
    assert_eq!(report.pushed, 0);
    sync(&b).await;

    assert!(b.replica().bags.get_by_id(bag.id).await.is_none());
    assert_eq!(snapshot(&a).await, snapshot(&b).await);

    let fresh = device(&service, "owner").await;
    let report = sync(&fresh).await;
    assert_eq!(report.pulled, 1);
    assert_eq!(report.adopted, 0);
    assert_eq!(snapshot(&fresh).await, snapshot(&a).await);
}

#[tokio::test]
async fn three_devices_converge_after_interleaved_edits() {
    let service = server();
    let a = device(&service, "owner").await;
    let b = device(&service, "owner").await;
    let c = device(&service, "owner").await;

    let shared = a
        .replica()
        .bags
        .create(BagFields::new("Ethiopia", "Tim Wendelboe"))
        .await
        .unwrap();
    let doomed = a
        .replica()
        .bags
        .create(BagFields::new("Decaf", "Local"))
        .await
        .unwrap();
    sync(&a).await;
    sync(&b).await;
    sync(&c).await;

    // Concurrent offline work on all three devices
    tick().await;
    b.replica()
        .bags
        .update(shared.id, |fields| fields.notes = "from b".to_string())
        .await
        .unwrap();
    tick().await;
    c.replica()
        .bags
        .update(shared.id, |fields| fields.notes = "from c".to_string())
        .await
        .unwrap();
    tick().await;
    a.replica().bags.soft_delete(doomed.id).await.unwrap();
    let brew = b
        .replica()
        .brews
        .create(BrewFields::new(shared.id, 11.5, 18.0, 27.0, 9.0))
        .await
        .unwrap();
    let c_bag = c
        .replica()
        .bags
        .create(BagFields::new("Guatemala", "Square Mile"))
        .await
        .unwrap();

    for _ in 0..2 {
        sync(&c).await;
        sync(&b).await;
        sync(&a).await;
    }

    let expected = snapshot(&a).await;
    assert_eq!(snapshot(&b).await, expected);
    assert_eq!(snapshot(&c).await, expected);

    let (bags, brews) = expected;
    let ids: Vec<RecordId> = bags.iter().map(|(id, _, _)| *id).collect();
    assert!(ids.contains(&shared.id));
    assert!(ids.contains(&c_bag.id));
    assert!(!ids.contains(&doomed.id));
    let shared_fields = &bags.iter().find(|(id, _, _)| *id == shared.id).unwrap().1;
    assert_eq!(shared_fields.notes, "from c");
    assert_eq!(brews.len(), 1);
    assert_eq!(brews[0].0, brew.id);

    for device in [&a, &b, &c] {
        assert_eq!(device.replica().pending_changes().await.total(), 0);
    }
}

#[tokio::test]
async fn repeating_a_full_pull_changes_nothing() {
    let service = server();
    let a = device(&service, "owner").await;
    let b = device(&service, "owner").await;

    let bag = a
        .replica()
        .bags
        .create(BagFields::new("Kenya", "Sey"))
        .await
        .unwrap();
    a.replica()
        .brews
        .create(BrewFields::new(bag.id, 12.0, 18.0, 30.0, 8.5))
        .await
        .unwrap();
    sync(&a).await;

    let first = sync(&b).await;
    assert_eq!(first.adopted, 2);
    let after_first = snapshot(&b).await;

    b.reset_sync_state().await.unwrap();
    assert_eq!(b.watermark().await.unwrap(), None);
    let second = sync(&b).await;
    assert_eq!(second.pulled, 2);
    assert_eq!(second.adopted, 0);
    assert_eq!(second.pushed, 0);
    assert_eq!(snapshot(&b).await, after_first);
}

#[tokio::test]
async fn owners_never_see_each_other() {
    let service = server();
    let alice = device(&service, "alice").await;
    let bob = device(&service, "bob").await;

    alice
        .replica()
        .bags
        .create(BagFields::new("Private", "Roaster"))
        .await
        .unwrap();
    sync(&alice).await;

    let report = sync(&bob).await;
    assert_eq!(report.pulled, 0);
    assert!(bob.replica().bags.list_visible().await.is_empty());
}

#[tokio::test]
async fn rejected_round_keeps_offline_edits_for_retry() {
    let service = server();
    let a = device(&service, "owner").await;
    let bag = a
        .replica()
        .bags
        .create(BagFields::new("Kenya", "Sey"))
        .await
        .unwrap();

    a.transport().authorized.store(false, Ordering::SeqCst);
    let err = a.sync_now().await.unwrap_err();
    assert!(matches!(err, SyncError::Unauthorized));
    assert!(a.replica().bags.get_by_id(bag.id).await.unwrap().is_dirty);
    assert_eq!(a.watermark().await.unwrap(), None);

    a.transport().authorized.store(true, Ordering::SeqCst);
    let report = sync(&a).await;
    assert_eq!(report.created, 1);
    assert!(!a.replica().bags.get_by_id(bag.id).await.unwrap().is_dirty);
}
