//! Data models for Dial-In

mod bag;
mod brew;
mod record;

pub use bag::{BagFields, CoffeeBag};
pub use brew::{BrewFields, CoffeeBrew};
pub use record::{EntityKind, EntityPayload, Record, RecordId};
