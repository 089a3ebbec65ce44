//! Coffee brew model

use serde::{Deserialize, Serialize};

use super::record::{EntityKind, EntityPayload, Record, RecordId};

/// A single shot/brew pulled from a bag.
pub type CoffeeBrew = Record<BrewFields>;

/// Measurements of a brew. References exactly one bag; referential integrity
/// is left to the backing store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrewFields {
    pub coffee_bag_id: RecordId,
    pub grind_setting: f64,
    /// Dose in grams
    pub dry_weight: f64,
    /// Seconds
    pub brew_time: f64,
    pub pressure_reading: f64,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
}

impl EntityPayload for BrewFields {
    const KIND: EntityKind = EntityKind::CoffeeBrew;
}

impl BrewFields {
    pub const fn new(
        coffee_bag_id: RecordId,
        grind_setting: f64,
        dry_weight: f64,
        brew_time: f64,
        pressure_reading: f64,
    ) -> Self {
        Self {
            coffee_bag_id,
            grind_setting,
            dry_weight,
            brew_time,
            pressure_reading,
            notes: None,
            picture: None,
        }
    }
}
