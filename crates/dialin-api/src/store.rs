//! Authoritative, owner-scoped record store.
//!
//! Each upsert is its own transaction: last-write-wins by `updatedAt`, and an
//! accepted write is stamped with a strictly increasing change stamp (ms since
//! epoch). Pulls filter on that stamp, so the client watermark only ever holds
//! server clock values.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dialin_core::models::EntityPayload;
use dialin_core::sync::WireRecord;
use dialin_core::{util, DeviceId, EntityKind, Error, RecordId, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::migrations;
use crate::auth::user_fingerprint;

/// Per-record push outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
    /// Stored version is same-or-newer, or the id belongs to another owner
    Conflict,
}

impl UpsertOutcome {
    pub const fn status(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Conflict => "conflict",
        }
    }
}

/// A pushed record ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingRecord {
    pub kind: EntityKind,
    pub id: RecordId,
    pub updated_at: DateTime<Utc>,
    pub deleted: bool,
    /// Full wire representation
    pub body: Value,
}

impl IncomingRecord {
    pub fn from_wire<P: EntityPayload>(record: &WireRecord<P>) -> Result<Self> {
        Ok(Self {
            kind: P::KIND,
            id: record.id,
            updated_at: record.updated_at,
            deleted: record.is_deleted(),
            body: serde_json::to_value(record)?,
        })
    }
}

/// A stored record as returned to pulls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub kind: EntityKind,
    /// Wire JSON with `syncedAt` and `deviceId` filled in
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    /// Ordered by change stamp
    pub records: Vec<StoredRecord>,
    /// High-water mark: every returned stamp is `<=` it, every later write `>`
    pub server_time: i64,
}

/// One `sync_log` row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    pub owner_id: String,
    pub device_id: String,
    pub operation: &'static str,
    pub entity_type: EntityKind,
    pub entity_id: RecordId,
    pub timestamp: i64,
    pub status: &'static str,
    pub details: Option<String>,
}

#[async_trait]
pub trait BackingStore: Send + Sync {
    /// Atomically apply one record under last-write-wins.
    async fn upsert_lww(
        &self,
        owner_id: &str,
        device_id: &DeviceId,
        record: IncomingRecord,
    ) -> Result<UpsertOutcome>;

    /// Records for `owner_id` changed after `since`, tombstones included.
    /// Without `since` every record of the owner is returned.
    async fn changes_since(&self, owner_id: &str, since: Option<i64>) -> Result<ChangeSet>;

    /// Current high-water mark.
    async fn server_time(&self) -> Result<i64>;

    async fn append_audit(&self, entry: &AuditEntry) -> Result<()>;
}

/// `SQLite` implementation of [`BackingStore`]
pub struct SqliteBackingStore {
    inner: Mutex<Inner>,
}

struct Inner {
    conn: Connection,
    last_stamp: i64,
}

impl SqliteBackingStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path.as_ref())?;
        if let Err(error) = conn.query_row("PRAGMA journal_mode = WAL;", [], |_| Ok(())) {
            tracing::warn!("Failed to enable WAL journal mode: {error}");
        }
        tracing::debug!("Opened server database at {}", path.as_ref().display());
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        migrations::run(&conn)?;
        let stored: i64 = conn.query_row(
            "SELECT COALESCE(MAX(change_stamp), 0) FROM records",
            [],
            |row| row.get(0),
        )?;
        Ok(Self {
            inner: Mutex::new(Inner {
                conn,
                last_stamp: stored.max(now_millis()),
            }),
        })
    }
}

impl Inner {
    fn next_stamp(&mut self) -> i64 {
        let stamp = now_millis().max(self.last_stamp + 1);
        self.last_stamp = stamp;
        stamp
    }

    fn high_water_mark(&mut self) -> i64 {
        self.last_stamp = self.last_stamp.max(now_millis());
        self.last_stamp
    }
}

#[async_trait]
impl BackingStore for SqliteBackingStore {
    async fn upsert_lww(
        &self,
        owner_id: &str,
        device_id: &DeviceId,
        record: IncomingRecord,
    ) -> Result<UpsertOutcome> {
        let mut inner = self.inner.lock().await;
        let incoming_us = record.updated_at.timestamp_micros();
        let kind = record.kind.table();
        let id = record.id.as_str();

        let existing: Option<(String, i64)> = inner
            .conn
            .query_row(
                "SELECT owner_id, updated_at_us FROM records WHERE kind = ? AND id = ?",
                params![kind, id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match &existing {
            Some((stored_owner, _)) if stored_owner != owner_id => {
                tracing::warn!(
                    kind,
                    id,
                    user = user_fingerprint(owner_id),
                    "Rejected write to a record owned by another user"
                );
                return Ok(UpsertOutcome::Conflict);
            }
            Some((_, stored_us)) if incoming_us <= *stored_us => {
                return Ok(UpsertOutcome::Conflict);
            }
            _ => {}
        }

        let stamp = inner.next_stamp();
        let mut body = record.body;
        if let Value::Object(fields) = &mut body {
            fields.insert(
                "syncedAt".to_string(),
                serde_json::to_value(util::from_millis(stamp))?,
            );
            fields.insert(
                "deviceId".to_string(),
                Value::String(device_id.as_str().to_string()),
            );
        }
        let body = serde_json::to_string(&body)?;

        let tx = inner.conn.transaction()?;
        let outcome = if existing.is_some() {
            tx.execute(
                "UPDATE records
                 SET device_id = ?, updated_at_us = ?, deleted = ?, change_stamp = ?, body = ?
                 WHERE kind = ? AND id = ? AND owner_id = ? AND updated_at_us < ?",
                params![
                    device_id.as_str(),
                    incoming_us,
                    record.deleted,
                    stamp,
                    body,
                    kind,
                    id,
                    owner_id,
                    incoming_us
                ],
            )?;
            UpsertOutcome::Updated
        } else {
            tx.execute(
                "INSERT INTO records
                 (kind, id, owner_id, device_id, updated_at_us, deleted, change_stamp, body)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    kind,
                    id,
                    owner_id,
                    device_id.as_str(),
                    incoming_us,
                    record.deleted,
                    stamp,
                    body
                ],
            )?;
            UpsertOutcome::Created
        };
        tx.commit()?;

        Ok(outcome)
    }

    async fn changes_since(&self, owner_id: &str, since: Option<i64>) -> Result<ChangeSet> {
        let mut inner = self.inner.lock().await;
        let server_time = inner.high_water_mark();

        // Tombstones are returned on full pulls too, so a reset replica drops
        // clean copies of records deleted meanwhile.
        let mut stmt = inner.conn.prepare(
            "SELECT kind, body FROM records
             WHERE owner_id = ? AND change_stamp > ?
             ORDER BY change_stamp",
        )?;
        let rows = stmt
            .query_map(params![owner_id, since.unwrap_or(i64::MIN)], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<rusqlite::Result<Vec<(String, String)>>>()?;
        drop(stmt);

        let records = rows
            .into_iter()
            .map(|(kind, body)| {
                let kind = kind.parse::<EntityKind>().map_err(Error::Storage)?;
                Ok(StoredRecord { kind, body })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ChangeSet {
            records,
            server_time,
        })
    }

    async fn server_time(&self) -> Result<i64> {
        Ok(self.inner.lock().await.high_water_mark())
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<()> {
        let inner = self.inner.lock().await;
        inner.conn.execute(
            "INSERT INTO sync_log
             (owner_id, device_id, operation, entity_type, entity_id, timestamp, status, details)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                entry.owner_id,
                entry.device_id,
                entry.operation,
                entry.entity_type.audit_name(),
                entry.entity_id.as_str(),
                entry.timestamp,
                entry.status,
                entry.details
            ],
        )?;
        Ok(())
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
