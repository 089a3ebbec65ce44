//! Persisted pull resumption point.

use std::sync::Arc;

use crate::error::Result;
use crate::storage::{Storage, META_NAMESPACE};

const WATERMARK_KEY: &str = "last_sync_server_time";

/// Server-issued `serverTime` of the last fully completed round.
///
/// Always a server clock value; the local clock is never written here.
#[derive(Clone)]
pub struct Watermark {
    storage: Arc<dyn Storage>,
}

impl Watermark {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub async fn load(&self) -> Result<Option<i64>> {
        let Some(raw) = self.storage.get(META_NAMESPACE, WATERMARK_KEY).await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    pub async fn store(&self, server_time: i64) -> Result<()> {
        self.storage
            .put(META_NAMESPACE, WATERMARK_KEY, &server_time.to_string())
            .await
    }

    pub async fn clear(&self) -> Result<()> {
        self.storage.delete(META_NAMESPACE, WATERMARK_KEY).await
    }
}
