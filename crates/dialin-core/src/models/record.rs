//! Syncable record envelope shared by every entity type

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::device::DeviceId;
use crate::util;

/// A unique identifier for a record, using UUID v7 (time-sortable).
///
/// Generated on the client at creation time and never changed afterwards; it
/// is the primary key on every replica and on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(Uuid);

impl RecordId {
    /// Create a new unique record ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Entity types that take part in sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    CoffeeBag,
    CoffeeBrew,
}

impl EntityKind {
    /// All kinds in dependency order (bags before the brews that reference them).
    pub const ALL: [Self; 2] = [Self::CoffeeBag, Self::CoffeeBrew];

    /// Storage namespace / table name.
    pub const fn table(self) -> &'static str {
        match self {
            Self::CoffeeBag => "coffee_bags",
            Self::CoffeeBrew => "coffee_brews",
        }
    }

    /// Key used for this kind in pull/push payloads.
    pub const fn wire_key(self) -> &'static str {
        match self {
            Self::CoffeeBag => "coffeeBags",
            Self::CoffeeBrew => "coffeeBrews",
        }
    }

    /// Singular name written to the audit log.
    pub const fn audit_name(self) -> &'static str {
        match self {
            Self::CoffeeBag => "coffeeBag",
            Self::CoffeeBrew => "coffeeBrew",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.audit_name())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.audit_name() == s || kind.table() == s || kind.wire_key() == s)
            .ok_or_else(|| format!("unknown entity kind: {s}"))
    }
}

/// Entity-specific fields carried inside a [`Record`].
pub trait EntityPayload:
    Clone + fmt::Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Which entity type this payload belongs to.
    const KIND: EntityKind;
}

/// A synced entity: client-generated id, payload, and sync metadata.
///
/// `is_dirty` and `synced_at` are replica-local bookkeeping; the owning user
/// only exists on the server and never appears here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record<P> {
    pub id: RecordId,
    #[serde(flatten)]
    pub payload: P,
    pub created_at: DateTime<Utc>,
    /// Sole ordering key for conflict resolution
    pub updated_at: DateTime<Utc>,
    /// Tombstone marker; the row is kept until the deletion is acknowledged
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_dirty: bool,
    #[serde(default)]
    pub synced_at: Option<DateTime<Utc>>,
    /// Device that produced the latest mutation (audit only)
    pub device_id: DeviceId,
}

impl<P: EntityPayload> Record<P> {
    /// Create a brand-new, unsynced record authored by `device_id`.
    pub fn new(payload: P, device_id: DeviceId) -> Self {
        let now = util::now();
        Self {
            id: RecordId::new(),
            payload,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            is_dirty: true,
            synced_at: None,
            device_id,
        }
    }

    pub const fn kind(&self) -> EntityKind {
        P::KIND
    }

    /// Whether this record is a tombstone.
    pub const fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}
