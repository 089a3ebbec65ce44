//! Dial-In sync server: owner-scoped pull/push over an authoritative
//! last-write-wins record store.

pub mod auth;
pub mod config;
pub mod error;
pub mod migrations;
pub mod rate_limit;
pub mod routes;
pub mod store;
pub mod sync;

pub use config::AppConfig;
pub use error::AppError;
pub use routes::{app_router, AppState};
pub use store::{BackingStore, SqliteBackingStore};
pub use sync::SyncService;
