//! Local `SQLite` persistence for Dial-In replicas

mod connection;
mod migrations;
mod storage;

pub use connection::Database;
pub use storage::SqliteStorage;
