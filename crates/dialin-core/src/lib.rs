//! dialin-core - Core library for Dial-In
//!
//! Records, the local replica store and the offline-first sync engine shared
//! by the CLI and the sync server.

pub mod config;
pub mod db;
pub mod device;
pub mod error;
pub mod export;
pub mod merge;
pub mod models;
pub mod replica;
pub mod scheduler;
pub mod storage;
pub mod store;
pub mod sync;
pub mod util;

#[cfg(test)]
mod testing;

pub use device::DeviceId;
pub use error::{Error, Result};
pub use models::{BagFields, BrewFields, CoffeeBag, CoffeeBrew, EntityKind, Record, RecordId};
pub use replica::Replica;
pub use scheduler::{SchedulerHandle, SyncScheduler, SyncTrigger};
pub use storage::{MemoryStorage, Storage};
pub use store::EntityStore;
pub use sync::{SyncCoordinator, SyncError, SyncOutcome, SyncPhase, SyncReport};
