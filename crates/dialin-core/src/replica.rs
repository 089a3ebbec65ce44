//! One device's local copy of the synced dataset.

use std::sync::Arc;

use crate::device::{load_or_create_device_id, DeviceId};
use crate::error::Result;
use crate::models::{BagFields, BrewFields};
use crate::storage::Storage;
use crate::store::EntityStore;

/// Entity stores sharing one storage backend and device identity.
#[derive(Clone)]
pub struct Replica {
    pub storage: Arc<dyn Storage>,
    pub device_id: DeviceId,
    pub bags: Arc<EntityStore<BagFields>>,
    pub brews: Arc<EntityStore<BrewFields>>,
}

/// Locally dirty record counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingChanges {
    pub bags: usize,
    pub brews: usize,
    pub deletions: usize,
}

impl PendingChanges {
    pub const fn total(&self) -> usize {
        self.bags + self.brews + self.deletions
    }
}

impl Replica {
    /// Resolve the device identity and hydrate every entity store.
    pub async fn open(storage: Arc<dyn Storage>) -> Result<Self> {
        let device_id = load_or_create_device_id(storage.as_ref()).await?;
        let bags = EntityStore::open(storage.clone(), device_id.clone()).await?;
        let brews = EntityStore::open(storage.clone(), device_id.clone()).await?;

        Ok(Self {
            storage,
            device_id,
            bags: Arc::new(bags),
            brews: Arc::new(brews),
        })
    }

    pub async fn pending_changes(&self) -> PendingChanges {
        PendingChanges {
            bags: self.bags.list_dirty().await.len(),
            brews: self.brews.list_dirty().await.len(),
            deletions: self.bags.list_dirty_tombstones().await.len()
                + self.brews.list_dirty_tombstones().await.len(),
        }
    }
}
