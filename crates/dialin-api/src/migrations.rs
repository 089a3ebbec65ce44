//! Server database migrations

use dialin_core::Result;
use rusqlite::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 1;

/// Run all pending migrations
pub fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }

    Ok(())
}

fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get::<_, i32>(0).map(|value| value != 0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    Ok(version)
}

/// Migration to version 1: owner-scoped records and the push audit log
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute("BEGIN TRANSACTION", [])?;

    let statements = [
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )",
        // Wire JSON per record; ordering columns are denormalized for queries
        "CREATE TABLE IF NOT EXISTS records (
            kind TEXT NOT NULL,
            id TEXT NOT NULL,
            owner_id TEXT NOT NULL,
            device_id TEXT,
            updated_at_us INTEGER NOT NULL,
            deleted INTEGER NOT NULL DEFAULT 0,
            change_stamp INTEGER NOT NULL,
            body TEXT NOT NULL,
            PRIMARY KEY (kind, id)
        )",
        "CREATE INDEX IF NOT EXISTS idx_records_owner_stamp
            ON records(owner_id, change_stamp)",
        "CREATE TABLE IF NOT EXISTS sync_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner_id TEXT NOT NULL,
            device_id TEXT NOT NULL,
            operation TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            status TEXT NOT NULL,
            details TEXT
        )",
        "CREATE INDEX IF NOT EXISTS idx_sync_log_owner ON sync_log(owner_id, timestamp)",
        "INSERT INTO schema_version (version) VALUES (1)",
    ];

    for stmt in statements {
        if let Err(e) = conn.execute(stmt, []) {
            conn.execute("ROLLBACK", []).ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn.execute("COMMIT", []) {
        conn.execute("ROLLBACK", []).ok();
        return Err(e.into());
    }

    tracing::info!("Migrated server database to version {CURRENT_VERSION}");
    Ok(())
}
