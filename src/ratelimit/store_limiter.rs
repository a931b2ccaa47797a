//! Exact store-backed limiter.

use super::{Limiter, RateDecision};
use crate::store::{keys, StateStore};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Sliding-window limiter over the shared store's ordered sets.
///
/// Each check runs one atomic batch: prune tokens older than `now - window`,
/// insert a token for this request, read the cardinality, refresh the key TTL
/// to twice the window so idle keys self-expire. The just-inserted token
/// counts toward the total, making the limit a hard ceiling on writes
/// admitted inside the window.
pub struct StoreLimiter {
    store: Arc<dyn StateStore>,
}

impl StoreLimiter {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }
}

fn epoch_millis(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

#[async_trait]
impl Limiter for StoreLimiter {
    async fn check(&self, key: &str, limit: u32, window: Duration) -> Result<RateDecision> {
        let now = SystemTime::now();

        if limit == 0 {
            return Ok(RateDecision {
                allowed: false,
                remaining: 0,
                reset_at: now + window,
            });
        }

        let now_ms = epoch_millis(now);
        let cutoff_ms = now_ms.saturating_sub(window.as_millis() as u64);
        let store_key = keys::rate_limit(key);
        let member = uuid::Uuid::new_v4().to_string();

        let count = self
            .store
            .window_admit(&store_key, cutoff_ms, &member, now_ms, window * 2)
            .await
            .map_err(|err| {
                tracing::error!(key = %key, error = %err, "rate limiter window batch failed");
                err
            })?;

        let used = u32::try_from(count).unwrap_or(u32::MAX);
        Ok(RateDecision {
            allowed: count <= u64::from(limit),
            remaining: limit.saturating_sub(used),
            reset_at: now + window,
        })
    }
}
