//! Database connection management

use crate::error::Result;
use rusqlite::Connection;
use std::path::Path;

use super::migrations;

/// Database wrapper for a local `SQLite` connection
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open a database at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        let database = Self { conn };
        database.configure(true)?;
        database.migrate()?;
        tracing::debug!("Opened local database at {}", path.as_ref().display());
        Ok(database)
    }

    /// Open an in-memory database (useful for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let database = Self { conn };
        database.configure(false)?;
        database.migrate()?;
        Ok(database)
    }

    /// Configure `SQLite` pragmas
    fn configure(&self, on_disk: bool) -> Result<()> {
        if on_disk {
            // journal_mode returns a row, so it has to go through a query
            self.conn
                .query_row("PRAGMA journal_mode = WAL;", [], |_| Ok(()))
                .ok();
            self.conn.execute_batch("PRAGMA synchronous = NORMAL;").ok();
        }
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(())
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        migrations::run(&self.conn)
    }

    /// Get a reference to the underlying connection
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_in_memory() {
        let db = Database::open_in_memory().unwrap();
        let val: i32 = db
            .connection()
            .query_row("SELECT 1", [], |row| row.get(0))
            .unwrap();
        assert_eq!(val, 1);
    }

    #[test]
    fn test_open_on_disk_creates_file() {
        let tmp = tempdir().unwrap();
        let db_path = tmp.path().join("replica.db");
        Database::open(&db_path).unwrap();
        assert!(db_path.exists());

        // Re-opening an existing file must not fail on migrations
        Database::open(&db_path).unwrap();
    }
}
