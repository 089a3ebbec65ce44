//! Coffee bag model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::record::{EntityKind, EntityPayload, Record};

/// A bag of coffee beans being dialed in.
pub type CoffeeBag = Record<BagFields>;

/// User-editable fields of a coffee bag
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BagFields {
    pub name: String,
    pub roaster_name: String,
    #[serde(default)]
    pub style: String,
    #[serde(default)]
    pub notes: String,
    /// Remote picture reference; blobs are uploaded elsewhere
    #[serde(default)]
    pub picture: Option<String>,
    #[serde(default)]
    pub date_roasted: Option<DateTime<Utc>>,
    #[serde(default)]
    pub date_opened: Option<DateTime<Utc>>,
    #[serde(default)]
    pub archived_at: Option<DateTime<Utc>>,
}

impl EntityPayload for BagFields {
    const KIND: EntityKind = EntityKind::CoffeeBag;
}

impl BagFields {
    pub fn new(name: impl Into<String>, roaster_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            roaster_name: roaster_name.into(),
            ..Self::default()
        }
    }

    /// "Name (Roaster)" label used in listings and exports
    #[must_use]
    pub fn label(&self) -> String {
        if self.roaster_name.trim().is_empty() {
            self.name.clone()
        } else {
            format!("{} ({})", self.name, self.roaster_name)
        }
    }
}
