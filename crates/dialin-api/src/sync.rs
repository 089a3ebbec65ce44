//! Pull, push and export over a [`BackingStore`].

use std::sync::Arc;

use chrono::Utc;
use dialin_core::export::{build_export, render_export, ExportFormat};
use dialin_core::models::{BagFields, BrewFields, EntityPayload, Record};
use dialin_core::sync::{PullData, PullResponse, PushRequest, PushResponse, PushResults, WireRecord};
use dialin_core::{DeviceId, EntityKind};

use crate::error::AppError;
use crate::auth::user_fingerprint;
use crate::store::{AuditEntry, BackingStore, IncomingRecord, StoredRecord, UpsertOutcome};

const PUSH_OPERATION: &str = "push";
const FAILED_STATUS: &str = "error";

#[derive(Clone)]
pub struct SyncService {
    store: Arc<dyn BackingStore>,
}

impl SyncService {
    pub fn new(store: Arc<dyn BackingStore>) -> Self {
        Self { store }
    }

    pub async fn pull(&self, owner_id: &str, since: Option<i64>) -> Result<PullResponse, AppError> {
        let changes = self.store.changes_since(owner_id, since).await?;
        let data = decode_records(changes.records)?;

        tracing::debug!(
            user = user_fingerprint(owner_id),
            since,
            records = data.len(),
            server_time = changes.server_time,
            "Served pull"
        );

        Ok(PullResponse {
            success: true,
            data,
            server_time: changes.server_time,
        })
    }

    /// Apply a validated push batch. Each record is upserted on its own, so a
    /// storage failure on one record is reported in `failed` while the rest of
    /// the batch still lands. Bags go first so brews never precede their bag.
    pub async fn push(&self, owner_id: &str, request: PushRequest) -> Result<PushResponse, AppError> {
        if request.device_id.as_str().trim().is_empty() {
            return Err(AppError::bad_request("deviceId must not be empty"));
        }

        let mut results = PushResults::default();
        for bag in &request.coffee_bags {
            self.apply(owner_id, &request.device_id, bag, &mut results)
                .await;
        }
        for brew in &request.coffee_brews {
            self.apply(owner_id, &request.device_id, brew, &mut results)
                .await;
        }

        let server_time = self.store.server_time().await?;
        tracing::info!(
            user = user_fingerprint(owner_id),
            device = request.device_id.as_str(),
            records = request.len(),
            conflicts = results.conflicts(),
            failed = results.failed(),
            "Applied push"
        );

        Ok(PushResponse {
            success: true,
            results,
            server_time,
        })
    }

    async fn apply<P: EntityPayload>(
        &self,
        owner_id: &str,
        device_id: &DeviceId,
        record: &WireRecord<P>,
        results: &mut PushResults,
    ) {
        let outcome = match IncomingRecord::from_wire(record) {
            Ok(incoming) => self.store.upsert_lww(owner_id, device_id, incoming).await,
            Err(error) => Err(error),
        };

        let kind = P::KIND;
        let counts = results.for_kind_mut(kind);
        let (status, details) = match outcome {
            Ok(outcome) => {
                match outcome {
                    UpsertOutcome::Created => counts.created += 1,
                    UpsertOutcome::Updated => counts.updated += 1,
                    UpsertOutcome::Conflict => counts.conflicts += 1,
                }
                tracing::debug!(%kind, id = %record.id, status = outcome.status(), "Upserted");
                (outcome.status(), None)
            }
            Err(error) => {
                tracing::warn!(%kind, id = %record.id, %error, "Upsert failed");
                counts.failed.push(record.id);
                (FAILED_STATUS, Some(error.to_string()))
            }
        };

        let entry = AuditEntry {
            owner_id: owner_id.to_string(),
            device_id: device_id.as_str().to_string(),
            operation: PUSH_OPERATION,
            entity_type: kind,
            entity_id: record.id,
            timestamp: Utc::now().timestamp_millis(),
            status,
            details,
        };
        if let Err(error) = self.store.append_audit(&entry).await {
            tracing::warn!(%kind, id = %record.id, %error, "Failed to write audit entry");
        }
    }

    /// Render every live record of the owner.
    pub async fn export(&self, owner_id: &str, format: ExportFormat) -> Result<String, AppError> {
        let changes = self.store.changes_since(owner_id, None).await?;
        let data = decode_records(changes.records)?;

        let bags: Vec<Record<BagFields>> = data
            .coffee_bags
            .into_iter()
            .map(WireRecord::into_record)
            .collect();
        let brews: Vec<Record<BrewFields>> = data
            .coffee_brews
            .into_iter()
            .map(WireRecord::into_record)
            .collect();

        let document = build_export(&bags, &brews, Utc::now());
        render_export(&document, format)
            .map_err(|error| AppError::internal(format!("Failed to render export: {error}")))
    }
}

fn decode_records(records: Vec<StoredRecord>) -> Result<PullData, AppError> {
    let mut data = PullData::default();
    for record in records {
        match record.kind {
            EntityKind::CoffeeBag => data.coffee_bags.push(decode(&record.body)?),
            EntityKind::CoffeeBrew => data.coffee_brews.push(decode(&record.body)?),
        }
    }
    Ok(data)
}

fn decode<P: EntityPayload>(body: &str) -> Result<WireRecord<P>, AppError> {
    serde_json::from_str(body)
        .map_err(|error| AppError::internal(format!("Stored {} is corrupt: {error}", P::KIND)))
}
