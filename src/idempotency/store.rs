//! Outcome ledger for idempotent operations.

use crate::store::{keys, StateStore};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Processing,
    Completed,
}

/// The persisted outcome of one logical operation key. The
/// `processing -> completed` transition is one-way; a record stuck at
/// `processing` means its writer died mid-flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub status: RecordStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<serde_json::Value>,
}

impl IdempotencyRecord {
    pub fn completed(response: serde_json::Value) -> Self {
        Self {
            status: RecordStatus::Completed,
            response: Some(response),
        }
    }
}

/// Persistence seam for the execution manager: a short-lived lock per key and
/// the outcome record, stored under separate keys so losing the lock does not
/// imply losing the record.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn try_lock(&self, key: &str, ttl: Duration) -> Result<bool>;
    async fn fetch(&self, key: &str) -> Result<Option<IdempotencyRecord>>;
    async fn store(&self, key: &str, record: &IdempotencyRecord, ttl: Duration) -> Result<()>;
    /// Best-effort; failures are logged, the lock TTL is the safety net.
    async fn unlock(&self, key: &str);
}

/// [`RecordStore`] over the shared store, one JSON document per record.
pub struct SharedRecordStore {
    store: Arc<dyn StateStore>,
}

impl SharedRecordStore {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RecordStore for SharedRecordStore {
    async fn try_lock(&self, key: &str, ttl: Duration) -> Result<bool> {
        let lock_key = keys::idempotency_lock(key);
        self.store
            .set_if_absent(&lock_key, b"1", ttl)
            .await
            .map_err(|err| {
                tracing::error!(key = %key, error = %err, "failed to acquire idempotency lock");
                err
            })
    }

    async fn fetch(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        let record_key = keys::idempotency_record(key);
        let data = self.store.get(&record_key).await.map_err(|err| {
            tracing::error!(key = %key, error = %err, "failed to fetch idempotency record");
            err
        })?;

        match data {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn store(&self, key: &str, record: &IdempotencyRecord, ttl: Duration) -> Result<()> {
        let record_key = keys::idempotency_record(key);
        let data = serde_json::to_vec(record)?;
        self.store.set(&record_key, &data, ttl).await.map_err(|err| {
            tracing::error!(key = %key, error = %err, "failed to store idempotency record");
            err
        })
    }

    async fn unlock(&self, key: &str) {
        let lock_key = keys::idempotency_lock(key);
        if let Err(err) = self.store.delete(&lock_key).await {
            tracing::error!(key = %key, error = %err, "failed to release idempotency lock");
        }
    }
}
