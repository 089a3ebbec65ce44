//! Durable persistence port used by the entity store, device identity and
//! watermark.
//!
//! Values are opaque JSON strings addressed by `(namespace, key)`; adapters
//! only need get/put/delete/list.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::Result;

/// Namespace holding replica-local metadata (device id, watermark).
pub const META_NAMESPACE: &str = "meta";

/// Key-value persistence port.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Fetch one value
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>>;

    /// Insert or replace one value
    async fn put(&self, namespace: &str, key: &str, value: &str) -> Result<()>;

    /// Remove one value; removing a missing key is not an error
    async fn delete(&self, namespace: &str, key: &str) -> Result<()>;

    /// All values in a namespace, ordered by key
    async fn list(&self, namespace: &str) -> Result<Vec<String>>;
}

/// Volatile storage, used by tests and throwaway replicas.
#[derive(Default)]
pub struct MemoryStorage {
    namespaces: Mutex<BTreeMap<String, BTreeMap<String, String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        let namespaces = self.namespaces.lock().await;
        Ok(namespaces
            .get(namespace)
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    async fn put(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
        let mut namespaces = self.namespaces.lock().await;
        namespaces
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<()> {
        let mut namespaces = self.namespaces.lock().await;
        if let Some(entries) = namespaces.get_mut(namespace) {
            entries.remove(key);
        }
        Ok(())
    }

    async fn list(&self, namespace: &str) -> Result<Vec<String>> {
        let namespaces = self.namespaces.lock().await;
        Ok(namespaces
            .get(namespace)
            .map(|entries| entries.values().cloned().collect())
            .unwrap_or_default())
    }
}
