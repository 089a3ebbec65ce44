//! Stable per-installation device identity.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::storage::{Storage, META_NAMESPACE};

const DEVICE_ID_KEY: &str = "device_id";

/// Identifier of the device that produced a mutation.
///
/// Informational only: it is carried on pushes and stored for audit, but never
/// used to order writes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Generate a fresh random identifier
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DeviceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for DeviceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Load this installation's device id, creating and persisting one on first use.
pub async fn load_or_create_device_id(storage: &dyn Storage) -> Result<DeviceId> {
    if let Some(raw) = storage.get(META_NAMESPACE, DEVICE_ID_KEY).await? {
        let device_id: DeviceId = serde_json::from_str(&raw)?;
        if !device_id.as_str().trim().is_empty() {
            return Ok(device_id);
        }
        tracing::warn!("Stored device id is blank; generating a new one");
    }

    let device_id = DeviceId::generate();
    storage
        .put(
            META_NAMESPACE,
            DEVICE_ID_KEY,
            &serde_json::to_string(&device_id)?,
        )
        .await?;
    tracing::info!(device_id = %device_id, "Registered new device identity");
    Ok(device_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[tokio::test]
    async fn device_id_is_stable_across_loads() {
        let storage = MemoryStorage::new();
        let first = load_or_create_device_id(&storage).await.unwrap();
        let second = load_or_create_device_id(&storage).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn blank_device_id_is_replaced() {
        let storage = MemoryStorage::new();
        storage.put(META_NAMESPACE, DEVICE_ID_KEY, "\"  \"").await.unwrap();

        let device_id = load_or_create_device_id(&storage).await.unwrap();
        assert!(!device_id.as_str().trim().is_empty());
    }

    #[test]
    fn device_id_serializes_as_plain_string() {
        let json = serde_json::to_string(&DeviceId::from("abc")).unwrap();
        assert_eq!(json, "\"abc\"");
    }
}
