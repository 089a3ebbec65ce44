//! JSON payloads exchanged with the sync server.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::device::DeviceId;
use crate::models::{BagFields, BrewFields, EntityKind, EntityPayload, Record, RecordId};

/// Attributed to pulled records that arrive without a device id.
const UNKNOWN_DEVICE: &str = "unknown";

/// A record as it travels over the wire.
///
/// Replica-local bookkeeping (`isDirty`) never leaves the device. `syncedAt`
/// is filled in by the server on pull responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireRecord<P> {
    pub id: RecordId,
    #[serde(flatten)]
    pub payload: P,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub synced_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub device_id: Option<DeviceId>,
}

impl<P: EntityPayload> WireRecord<P> {
    pub fn from_record(record: &Record<P>) -> Self {
        Self {
            id: record.id,
            payload: record.payload.clone(),
            created_at: record.created_at,
            updated_at: record.updated_at,
            deleted_at: record.deleted_at,
            synced_at: record.synced_at,
            device_id: Some(record.device_id.clone()),
        }
    }

    /// Convert into a clean local record.
    pub fn into_record(self) -> Record<P> {
        Record {
            id: self.id,
            payload: self.payload,
            created_at: self.created_at,
            updated_at: self.updated_at,
            deleted_at: self.deleted_at,
            is_dirty: false,
            synced_at: self.synced_at,
            device_id: self
                .device_id
                .unwrap_or_else(|| DeviceId::from(UNKNOWN_DEVICE)),
        }
    }

    pub const fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullData {
    #[serde(default)]
    pub coffee_bags: Vec<WireRecord<BagFields>>,
    #[serde(default)]
    pub coffee_brews: Vec<WireRecord<BrewFields>>,
}

impl PullData {
    pub fn len(&self) -> usize {
        self.coffee_bags.len() + self.coffee_brews.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Body of `GET /sync/pull`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    pub success: bool,
    pub data: PullData,
    /// Server change-stamp high-water mark (ms since epoch); the next pull's
    /// `since`.
    pub server_time: i64,
}

/// Body of `POST /sync/push`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    pub device_id: DeviceId,
    #[serde(default)]
    pub coffee_bags: Vec<WireRecord<BagFields>>,
    #[serde(default)]
    pub coffee_brews: Vec<WireRecord<BrewFields>>,
}

impl PushRequest {
    pub fn len(&self) -> usize {
        self.coffee_bags.len() + self.coffee_brews.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-entity-type push outcome counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushCounts {
    pub created: usize,
    pub updated: usize,
    pub conflicts: usize,
    /// Records whose upsert hit a server-side storage error
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<RecordId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResults {
    #[serde(default)]
    pub coffee_bags: PushCounts,
    #[serde(default)]
    pub coffee_brews: PushCounts,
}

impl PushResults {
    pub const fn for_kind(&self, kind: EntityKind) -> &PushCounts {
        match kind {
            EntityKind::CoffeeBag => &self.coffee_bags,
            EntityKind::CoffeeBrew => &self.coffee_brews,
        }
    }

    pub fn for_kind_mut(&mut self, kind: EntityKind) -> &mut PushCounts {
        match kind {
            EntityKind::CoffeeBag => &mut self.coffee_bags,
            EntityKind::CoffeeBrew => &mut self.coffee_brews,
        }
    }

    pub fn conflicts(&self) -> usize {
        self.coffee_bags.conflicts + self.coffee_brews.conflicts
    }

    pub fn failed(&self) -> usize {
        self.coffee_bags.failed.len() + self.coffee_brews.failed.len()
    }
}

/// Body of a successful `POST /sync/push`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
    pub success: bool,
    pub results: PushResults,
    pub server_time: i64,
}
