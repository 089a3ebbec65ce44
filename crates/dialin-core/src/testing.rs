//! Test doubles for the storage port and the sync transport.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::{Notify, Semaphore};

use crate::error::{Error, Result};
use crate::models::RecordId;
use crate::storage::{MemoryStorage, Storage};
use crate::sync::{
    PullData, PullResponse, PushCounts, PushRequest, PushResponse, PushResults, SyncTransport,
    TransportError, TransportResult, WireRecord,
};

/// In-memory storage whose writes can be made to fail on demand.
#[derive(Default)]
pub struct FlakyStorage {
    inner: MemoryStorage,
    fail_writes: AtomicBool,
}

impl FlakyStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_write(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(Error::Storage("injected write failure".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Storage for FlakyStorage {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        self.inner.get(namespace, key).await
    }

    async fn put(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
        self.check_write()?;
        self.inner.put(namespace, key, value).await
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<()> {
        self.check_write()?;
        self.inner.delete(namespace, key).await
    }

    async fn list(&self, namespace: &str) -> Result<Vec<String>> {
        self.inner.list(namespace).await
    }
}

/// Scripted transport: every pull returns the configured data, every push is
/// recorded and acknowledged as created unless told otherwise.
pub struct FakeTransport {
    authorized: AtomicBool,
    fail_push: AtomicBool,
    server_time: AtomicI64,
    auth_checks: AtomicUsize,
    pull_data: Mutex<PullData>,
    failed_ids: Mutex<Vec<RecordId>>,
    pulls: Mutex<Vec<Option<i64>>>,
    pushes: Mutex<Vec<PushRequest>>,
    gate: Option<Semaphore>,
    pulling: Notify,
}

impl FakeTransport {
    pub fn new(server_time: i64) -> Self {
        Self {
            authorized: AtomicBool::new(true),
            fail_push: AtomicBool::new(false),
            server_time: AtomicI64::new(server_time),
            auth_checks: AtomicUsize::new(0),
            pull_data: Mutex::new(PullData::default()),
            failed_ids: Mutex::new(Vec::new()),
            pulls: Mutex::new(Vec::new()),
            pushes: Mutex::new(Vec::new()),
            gate: None,
            pulling: Notify::new(),
        }
    }

    /// Block every pull until [`FakeTransport::open_gate`] is called.
    pub fn gated(mut self) -> Self {
        self.gate = Some(Semaphore::new(0));
        self
    }

    pub fn open_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    /// Resolves once a pull has started.
    pub async fn wait_until_pulling(&self) {
        self.pulling.notified().await;
    }

    pub fn set_authorized(&self, authorized: bool) {
        self.authorized.store(authorized, Ordering::SeqCst);
    }

    pub fn set_server_time(&self, server_time: i64) {
        self.server_time.store(server_time, Ordering::SeqCst);
    }

    pub fn set_pull_data(&self, data: PullData) {
        *self.pull_data.lock().unwrap() = data;
    }

    pub fn fail_push(&self, fail: bool) {
        self.fail_push.store(fail, Ordering::SeqCst);
    }

    pub fn fail_ids(&self, ids: Vec<RecordId>) {
        *self.failed_ids.lock().unwrap() = ids;
    }

    pub fn auth_checks(&self) -> usize {
        self.auth_checks.load(Ordering::SeqCst)
    }

    pub fn pulls(&self) -> Vec<Option<i64>> {
        self.pulls.lock().unwrap().clone()
    }

    pub fn pushes(&self) -> Vec<PushRequest> {
        self.pushes.lock().unwrap().clone()
    }

    fn counts<P>(&self, records: &[WireRecord<P>]) -> PushCounts {
        let failed_ids = self.failed_ids.lock().unwrap();
        let failed: Vec<RecordId> = records
            .iter()
            .map(|record| record.id)
            .filter(|id| failed_ids.contains(id))
            .collect();
        PushCounts {
            created: records.len() - failed.len(),
            failed,
            ..PushCounts::default()
        }
    }
}

#[async_trait]
impl SyncTransport for FakeTransport {
    async fn check_auth(&self) -> TransportResult<()> {
        self.auth_checks.fetch_add(1, Ordering::SeqCst);
        if self.authorized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::Unauthorized)
        }
    }

    async fn pull(&self, since: Option<i64>) -> TransportResult<PullResponse> {
        self.pulls.lock().unwrap().push(since);
        self.pulling.notify_one();
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.unwrap();
        }

        Ok(PullResponse {
            success: true,
            data: self.pull_data.lock().unwrap().clone(),
            server_time: self.server_time.load(Ordering::SeqCst),
        })
    }

    async fn push(&self, request: &PushRequest) -> TransportResult<PushResponse> {
        if self.fail_push.load(Ordering::SeqCst) {
            return Err(TransportError::Api("connection reset (503)".to_string()));
        }
        self.pushes.lock().unwrap().push(request.clone());

        Ok(PushResponse {
            success: true,
            results: PushResults {
                coffee_bags: self.counts(&request.coffee_bags),
                coffee_brews: self.counts(&request.coffee_brews),
            },
            server_time: self.server_time.load(Ordering::SeqCst) + 1,
        })
    }
}
