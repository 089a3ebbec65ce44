//! `SQLite` adapter for the [`Storage`] port

use std::path::Path;

use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};
use tokio::sync::Mutex;

use super::Database;
use crate::error::Result;
use crate::storage::Storage;

/// Durable key-value storage backed by a local `SQLite` file
pub struct SqliteStorage {
    db: Mutex<Database>,
}

impl SqliteStorage {
    /// Open (or create) the replica database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(Self::from_database(Database::open(path)?))
    }

    /// Open an in-memory replica database.
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::from_database(Database::open_in_memory()?))
    }

    pub fn from_database(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        let db = self.db.lock().await;
        let value = db
            .connection()
            .query_row(
                "SELECT value FROM kv_store WHERE namespace = ? AND key = ?",
                params![namespace, key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    async fn put(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.connection().execute(
            "INSERT INTO kv_store (namespace, key, value) VALUES (?, ?, ?)
             ON CONFLICT(namespace, key) DO UPDATE SET value = excluded.value",
            params![namespace, key, value],
        )?;
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.connection().execute(
            "DELETE FROM kv_store WHERE namespace = ? AND key = ?",
            params![namespace, key],
        )?;
        Ok(())
    }

    async fn list(&self, namespace: &str) -> Result<Vec<String>> {
        let db = self.db.lock().await;
        let mut stmt = db
            .connection()
            .prepare("SELECT value FROM kv_store WHERE namespace = ? ORDER BY key")?;
        let values = stmt
            .query_map(params![namespace], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(values)
    }
}
