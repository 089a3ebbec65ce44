//! Per-entity-type replica table: in-memory map backed by the [`Storage`] port.
//!
//! Every mutation is applied to memory first, then persisted while the write
//! lock is still held. If the durable write fails the in-memory change is
//! rolled back and the error is returned to the caller.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::device::DeviceId;
use crate::error::{Error, Result};
use crate::merge::{merge, MergeOutcome};
use crate::models::{EntityPayload, Record, RecordId};
use crate::storage::Storage;
use crate::util;

/// Result of applying one pulled record to the local replica
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteApplied {
    /// Remote version inserted or replaced the local copy
    Adopted,
    /// Remote tombstone removed the local copy
    Removed,
    /// Local copy kept (same-or-newer, or tombstone for an unknown id)
    Unchanged,
}

/// Replica table for one entity type
pub struct EntityStore<P: EntityPayload> {
    storage: Arc<dyn Storage>,
    device_id: DeviceId,
    records: RwLock<HashMap<RecordId, Record<P>>>,
}

impl<P: EntityPayload> EntityStore<P> {
    /// Create an empty store. Call [`EntityStore::load`] to hydrate it.
    pub fn new(storage: Arc<dyn Storage>, device_id: DeviceId) -> Self {
        Self {
            storage,
            device_id,
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Create a store and hydrate it from durable storage.
    pub async fn open(storage: Arc<dyn Storage>, device_id: DeviceId) -> Result<Self> {
        let store = Self::new(storage, device_id);
        store.load().await?;
        Ok(store)
    }

    const fn namespace() -> &'static str {
        P::KIND.table()
    }

    pub const fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// Replace the in-memory state with everything in durable storage.
    pub async fn load(&self) -> Result<usize> {
        let rows = self.storage.list(Self::namespace()).await?;
        let mut loaded = HashMap::with_capacity(rows.len());
        for raw in rows {
            let record: Record<P> = serde_json::from_str(&raw)?;
            loaded.insert(record.id, record);
        }

        let count = loaded.len();
        *self.records.write().await = loaded;
        tracing::debug!(kind = %P::KIND, count, "Loaded local records");
        Ok(count)
    }

    /// Create a new dirty record authored by this device.
    pub async fn create(&self, payload: P) -> Result<Record<P>> {
        self.add(Record::new(payload, self.device_id.clone())).await
    }

    /// Insert a locally created record. It is always stored as dirty and
    /// unsynced.
    pub async fn add(&self, mut record: Record<P>) -> Result<Record<P>> {
        record.is_dirty = true;
        record.synced_at = None;

        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(Error::AlreadyExists(record.id.to_string()));
        }

        records.insert(record.id, record.clone());
        if let Err(err) = self.persist(&record).await {
            records.remove(&record.id);
            return Err(err);
        }
        Ok(record)
    }

    /// Apply a partial edit to a live record.
    ///
    /// `id` and `created_at` are kept; `updated_at` strictly increases and the
    /// record becomes dirty.
    pub async fn update<F>(&self, id: RecordId, edit: F) -> Result<Record<P>>
    where
        F: FnOnce(&mut P) + Send,
    {
        let mut records = self.records.write().await;
        let previous = live_record(&records, id)?.clone();

        let mut next = previous.clone();
        edit(&mut next.payload);
        next.updated_at = util::next_timestamp(previous.updated_at);
        next.is_dirty = true;
        next.device_id = self.device_id.clone();

        self.replace(&mut records, next, previous).await
    }

    /// Tombstone a live record. The row is retained until the deletion has
    /// been acknowledged by the server.
    pub async fn soft_delete(&self, id: RecordId) -> Result<Record<P>> {
        let mut records = self.records.write().await;
        let previous = live_record(&records, id)?.clone();

        let mut next = previous.clone();
        let stamp = util::next_timestamp(previous.updated_at);
        next.updated_at = stamp;
        next.deleted_at = Some(stamp);
        next.is_dirty = true;
        next.device_id = self.device_id.clone();

        self.replace(&mut records, next, previous).await
    }

    /// Physically remove a record. Returns whether it existed.
    pub async fn hard_delete(&self, id: RecordId) -> Result<bool> {
        let mut records = self.records.write().await;
        self.remove_locked(&mut records, id).await
    }

    /// Any record with this id, tombstones included.
    pub async fn get_by_id(&self, id: RecordId) -> Option<Record<P>> {
        self.records.read().await.get(&id).cloned()
    }

    /// A record with this id unless it is tombstoned.
    pub async fn get_visible(&self, id: RecordId) -> Option<Record<P>> {
        self.records
            .read()
            .await
            .get(&id)
            .filter(|record| !record.is_deleted())
            .cloned()
    }

    /// Live records, newest first.
    pub async fn list_visible(&self) -> Vec<Record<P>> {
        let mut visible: Vec<_> = self
            .records
            .read()
            .await
            .values()
            .filter(|record| !record.is_deleted())
            .cloned()
            .collect();
        visible.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        visible
    }

    /// Dirty live records.
    pub async fn list_dirty(&self) -> Vec<Record<P>> {
        self.collect_sorted(|record| record.is_dirty && !record.is_deleted())
            .await
    }

    /// Dirty tombstones.
    pub async fn list_dirty_tombstones(&self) -> Vec<Record<P>> {
        self.collect_sorted(|record| record.is_dirty && record.is_deleted())
            .await
    }

    /// Mark pushed records clean.
    ///
    /// Each entry carries the `updated_at` that was pushed; a record edited
    /// again since then keeps its dirty flag. Returns how many were cleared.
    pub async fn mark_synced(
        &self,
        pushed: &[(RecordId, DateTime<Utc>)],
        synced_at: DateTime<Utc>,
    ) -> Result<usize> {
        let mut records = self.records.write().await;
        let mut cleared = 0;

        for (id, pushed_updated_at) in pushed {
            let Some(previous) = records.get(id).cloned() else {
                continue;
            };
            if previous.updated_at != *pushed_updated_at {
                tracing::debug!(kind = %P::KIND, id = %id, "Record changed during push; keeping it dirty");
                continue;
            }

            let mut next = previous.clone();
            next.is_dirty = false;
            next.synced_at = Some(synced_at);
            self.replace(&mut records, next, previous).await?;
            cleared += 1;
        }

        Ok(cleared)
    }

    /// Store a record that arrived authoritatively from the server.
    pub async fn upsert_from_remote(&self, record: Record<P>) -> Result<()> {
        let mut records = self.records.write().await;
        self.upsert_remote_locked(&mut records, record).await
    }

    /// Apply one pulled record.
    ///
    /// A remote tombstone removes the local copy outright. Anything else goes
    /// through [`merge`] and is stored via the remote-upsert path when the
    /// remote version wins. Lookup, decision and write happen under one lock.
    pub async fn reconcile_remote(&self, remote: Record<P>) -> Result<RemoteApplied> {
        let mut records = self.records.write().await;

        if remote.is_deleted() {
            let removed = self.remove_locked(&mut records, remote.id).await?;
            return Ok(if removed {
                RemoteApplied::Removed
            } else {
                RemoteApplied::Unchanged
            });
        }

        match merge(records.get(&remote.id), remote) {
            MergeOutcome::AdoptRemote(adopted) => {
                self.upsert_remote_locked(&mut records, adopted).await?;
                Ok(RemoteApplied::Adopted)
            }
            MergeOutcome::NoChange => Ok(RemoteApplied::Unchanged),
        }
    }

    /// Remove tombstones the server has acknowledged. Returns how many were
    /// purged.
    pub async fn purge_clean_tombstones(&self) -> Result<usize> {
        let mut records = self.records.write().await;
        let ids: Vec<RecordId> = records
            .values()
            .filter(|record| record.is_deleted() && !record.is_dirty)
            .map(|record| record.id)
            .collect();

        let mut purged = 0;
        for id in ids {
            if self.remove_locked(&mut records, id).await? {
                purged += 1;
            }
        }
        Ok(purged)
    }

    async fn collect_sorted<F>(&self, keep: F) -> Vec<Record<P>>
    where
        F: Fn(&Record<P>) -> bool,
    {
        let mut matching: Vec<_> = self
            .records
            .read()
            .await
            .values()
            .filter(|record| keep(record))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then(a.id.cmp(&b.id)));
        matching
    }

    async fn upsert_remote_locked(
        &self,
        records: &mut HashMap<RecordId, Record<P>>,
        mut record: Record<P>,
    ) -> Result<()> {
        record.is_dirty = false;
        record.synced_at = Some(util::now());

        let previous = records.insert(record.id, record.clone());
        if let Err(err) = self.persist(&record).await {
            restore(records, record.id, previous);
            return Err(err);
        }
        Ok(())
    }

    async fn remove_locked(
        &self,
        records: &mut HashMap<RecordId, Record<P>>,
        id: RecordId,
    ) -> Result<bool> {
        let Some(previous) = records.remove(&id) else {
            return Ok(false);
        };
        if let Err(err) = self.storage.delete(Self::namespace(), &id.as_str()).await {
            records.insert(id, previous);
            return Err(err);
        }
        Ok(true)
    }

    async fn replace(
        &self,
        records: &mut HashMap<RecordId, Record<P>>,
        next: Record<P>,
        previous: Record<P>,
    ) -> Result<Record<P>> {
        records.insert(next.id, next.clone());
        if let Err(err) = self.persist(&next).await {
            records.insert(previous.id, previous);
            return Err(err);
        }
        Ok(next)
    }

    async fn persist(&self, record: &Record<P>) -> Result<()> {
        let value = serde_json::to_string(record)?;
        self.storage
            .put(Self::namespace(), &record.id.as_str(), &value)
            .await
    }
}

fn live_record<P>(records: &HashMap<RecordId, Record<P>>, id: RecordId) -> Result<&Record<P>>
where
    P: EntityPayload,
{
    records
        .get(&id)
        .filter(|record| !record.is_deleted())
        .ok_or_else(|| Error::NotFound(id.to_string()))
}

fn restore<P>(
    records: &mut HashMap<RecordId, Record<P>>,
    id: RecordId,
    previous: Option<Record<P>>,
) {
    match previous {
        Some(previous) => {
            records.insert(id, previous);
        }
        None => {
            records.remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BagFields, CoffeeBag};
    use crate::storage::MemoryStorage;
    use crate::testing::FlakyStorage;
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    fn bag_store() -> EntityStore<BagFields> {
        EntityStore::new(Arc::new(MemoryStorage::new()), DeviceId::from("dev-a"))
    }

    fn remote_bag(name: &str) -> CoffeeBag {
        let mut bag = CoffeeBag::new(BagFields::new(name, "Sey"), DeviceId::from("dev-b"));
        bag.is_dirty = false;
        bag
    }

    #[tokio::test]
    async fn create_then_list_visible() {
        let store = bag_store();
        let first = store.create(BagFields::new("First", "Onyx")).await.unwrap();
        let second = store.create(BagFields::new("Second", "Onyx")).await.unwrap();

        let visible = store.list_visible().await;
        assert_eq!(visible.len(), 2);
        assert!(visible.iter().any(|bag| bag.id == first.id));
        assert!(visible.iter().any(|bag| bag.id == second.id));
        assert_eq!(store.list_dirty().await.len(), 2);
    }

    #[tokio::test]
    async fn add_rejects_duplicate_id() {
        let store = bag_store();
        let bag = store.create(BagFields::new("Kenya", "Sey")).await.unwrap();

        let err = store.add(bag).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn update_bumps_timestamp_and_keeps_identity() {
        let store = bag_store();
        let bag = store.create(BagFields::new("Kenya", "Sey")).await.unwrap();

        let updated = store
            .update(bag.id, |fields| fields.notes = "juicy".to_string())
            .await
            .unwrap();

        assert_eq!(updated.id, bag.id);
        assert_eq!(updated.created_at, bag.created_at);
        assert!(updated.updated_at > bag.updated_at);
        assert!(updated.is_dirty);
        assert_eq!(updated.payload.notes, "juicy");
    }

    #[tokio::test]
    async fn update_of_missing_or_deleted_record_is_not_found() {
        let store = bag_store();
        let missing = store.update(RecordId::new(), |_| {}).await.unwrap_err();
        assert!(matches!(missing, Error::NotFound(_)));

        let bag = store.create(BagFields::new("Kenya", "Sey")).await.unwrap();
        store.soft_delete(bag.id).await.unwrap();
        let deleted = store.update(bag.id, |_| {}).await.unwrap_err();
        assert!(matches!(deleted, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn soft_delete_keeps_row_as_dirty_tombstone() {
        let store = bag_store();
        let bag = store.create(BagFields::new("Kenya", "Sey")).await.unwrap();

        let tombstone = store.soft_delete(bag.id).await.unwrap();

        assert_eq!(tombstone.deleted_at, Some(tombstone.updated_at));
        assert!(tombstone.updated_at > bag.updated_at);
        assert!(store.list_visible().await.is_empty());
        assert!(store.get_visible(bag.id).await.is_none());
        assert!(store.get_by_id(bag.id).await.is_some());
        assert_eq!(store.list_dirty().await.len(), 0);
        assert_eq!(store.list_dirty_tombstones().await.len(), 1);
    }

    #[tokio::test]
    async fn mark_synced_skips_records_edited_after_push() {
        let store = bag_store();
        let a = store.create(BagFields::new("A", "Onyx")).await.unwrap();
        let b = store.create(BagFields::new("B", "Onyx")).await.unwrap();
        let pushed = vec![(a.id, a.updated_at), (b.id, b.updated_at)];

        store
            .update(b.id, |fields| fields.name = "B2".to_string())
            .await
            .unwrap();
        let cleared = store.mark_synced(&pushed, util::now()).await.unwrap();

        assert_eq!(cleared, 1);
        let dirty: Vec<_> = store.list_dirty().await.into_iter().map(|r| r.id).collect();
        assert_eq!(dirty, vec![b.id]);
        assert!(store.get_by_id(a.id).await.unwrap().synced_at.is_some());
    }

    #[tokio::test]
    async fn reconcile_adopts_newer_and_ignores_older() {
        let store = bag_store();
        let local = store.create(BagFields::new("Local", "Onyx")).await.unwrap();

        let mut older = local.clone();
        older.payload.name = "Older".to_string();
        older.updated_at = local.updated_at - Duration::seconds(1);
        assert_eq!(
            store.reconcile_remote(older).await.unwrap(),
            RemoteApplied::Unchanged
        );

        let mut newer = local.clone();
        newer.payload.name = "Newer".to_string();
        newer.updated_at = local.updated_at + Duration::seconds(1);
        assert_eq!(
            store.reconcile_remote(newer).await.unwrap(),
            RemoteApplied::Adopted
        );

        let stored = store.get_by_id(local.id).await.unwrap();
        assert_eq!(stored.payload.name, "Newer");
        assert!(!stored.is_dirty);
        assert!(stored.synced_at.is_some());
    }

    #[tokio::test]
    async fn remote_tombstone_hard_deletes_local_copy() {
        let store = bag_store();
        let remote = remote_bag("Kenya");
        store.reconcile_remote(remote.clone()).await.unwrap();

        let mut tombstone = remote;
        tombstone.updated_at = tombstone.updated_at + Duration::seconds(1);
        tombstone.deleted_at = Some(tombstone.updated_at);

        assert_eq!(
            store.reconcile_remote(tombstone.clone()).await.unwrap(),
            RemoteApplied::Removed
        );
        assert!(store.get_by_id(tombstone.id).await.is_none());
        assert_eq!(
            store.reconcile_remote(tombstone).await.unwrap(),
            RemoteApplied::Unchanged
        );
    }

    #[tokio::test]
    async fn purge_only_removes_clean_tombstones() {
        let store = bag_store();
        let pushed = store.create(BagFields::new("Pushed", "Onyx")).await.unwrap();
        let pending = store.create(BagFields::new("Pending", "Onyx")).await.unwrap();
        let live = store.create(BagFields::new("Live", "Onyx")).await.unwrap();

        let pushed = store.soft_delete(pushed.id).await.unwrap();
        store.soft_delete(pending.id).await.unwrap();
        store
            .mark_synced(&[(pushed.id, pushed.updated_at), (live.id, live.updated_at)], util::now())
            .await
            .unwrap();

        assert_eq!(store.purge_clean_tombstones().await.unwrap(), 1);
        assert!(store.get_by_id(pushed.id).await.is_none());
        assert!(store.get_by_id(pending.id).await.is_some());
        assert!(store.get_by_id(live.id).await.is_some());
    }

    #[tokio::test]
    async fn failed_write_rolls_back_memory() {
        let storage = Arc::new(FlakyStorage::new());
        let store: EntityStore<BagFields> =
            EntityStore::new(storage.clone(), DeviceId::from("dev-a"));
        let bag = store.create(BagFields::new("Kenya", "Sey")).await.unwrap();

        storage.fail_writes(true);

        assert!(store.create(BagFields::new("Lost", "Sey")).await.is_err());
        assert!(store
            .update(bag.id, |fields| fields.name = "Changed".to_string())
            .await
            .is_err());
        assert!(store.soft_delete(bag.id).await.is_err());
        assert!(store.hard_delete(bag.id).await.is_err());

        let visible = store.list_visible().await;
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0], bag);

        storage.fail_writes(false);
        assert!(store.hard_delete(bag.id).await.unwrap());
    }

    #[tokio::test]
    async fn load_restores_persisted_state() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let store: EntityStore<BagFields> =
            EntityStore::new(storage.clone(), DeviceId::from("dev-a"));
        let bag = store.create(BagFields::new("Kenya", "Sey")).await.unwrap();
        store.soft_delete(bag.id).await.unwrap();
        let kept = store.create(BagFields::new("Kept", "Sey")).await.unwrap();

        let reopened: EntityStore<BagFields> =
            EntityStore::open(storage, DeviceId::from("dev-a")).await.unwrap();

        assert_eq!(reopened.list_visible().await, vec![kept]);
        assert_eq!(reopened.list_dirty_tombstones().await.len(), 1);
    }

    #[tokio::test]
    async fn upsert_from_remote_stores_record_as_clean_and_synced() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let store: EntityStore<BagFields> =
            EntityStore::new(storage.clone(), DeviceId::from("dev-a"));
        let local = store.create(BagFields::new("Kenya", "Sey")).await.unwrap();

        let mut incoming = local.clone();
        incoming.payload.notes = "from the server".to_string();
        incoming.is_dirty = true;
        incoming.synced_at = None;

        let before = util::now();
        store.upsert_from_remote(incoming).await.unwrap();

        let stored = store.get_by_id(local.id).await.unwrap();
        assert_eq!(stored.payload.notes, "from the server");
        assert!(!stored.is_dirty);
        assert!(stored.synced_at.is_some_and(|synced| synced >= before));
        assert!(store.list_dirty().await.is_empty());

        let reopened: EntityStore<BagFields> =
            EntityStore::open(storage, DeviceId::from("dev-a")).await.unwrap();
        assert_eq!(reopened.get_by_id(local.id).await, Some(stored));
    }
}
