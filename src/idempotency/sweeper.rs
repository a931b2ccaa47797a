//! Stale-entry sweeper for the idempotency namespace.

use crate::store::{keys, StateStore};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// Anything claiming to live longer than this is malformed; the largest
/// legitimate record TTL is 24 hours.
const MAX_LIFETIME: Duration = Duration::from_secs(25 * 3600);

const SCAN_BATCH: usize = 100;

/// Deletes idempotency keys that will never expire on their own: entries
/// with no TTL (a writer died before the expiry landed) or with an
/// abnormally long one. Healthy completed records and live locks expire via
/// their own TTLs and are left alone.
pub struct IdempotencySweeper {
    store: Arc<dyn StateStore>,
    interval: Duration,
}

impl IdempotencySweeper {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub async fn run(&self, cancel: CancellationToken) {
        let start = tokio::time::Instant::now() + self.interval;
        let mut ticker = tokio::time::interval_at(start, self.interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("idempotency sweeper stopped");
                    return;
                }
                _ = ticker.tick() => self.sweep_once().await,
            }
        }
    }

    pub async fn sweep_once(&self) {
        let mut cursor = 0;
        loop {
            let (next, batch) = match self.store.scan(keys::IDEMPOTENCY_SCAN, cursor, SCAN_BATCH).await {
                Ok(page) => page,
                Err(err) => {
                    tracing::error!(error = %err, "idempotency sweep scan failed");
                    return;
                }
            };

            for key in batch {
                let ttl = match self.store.time_to_live(&key).await {
                    Ok(ttl) => ttl,
                    Err(err) => {
                        tracing::warn!(key = %key, error = %err, "failed to read idempotency key ttl");
                        continue;
                    }
                };

                let stuck = match ttl {
                    None => true,
                    Some(remaining) => remaining > MAX_LIFETIME,
                };
                if stuck {
                    if let Err(err) = self.store.delete(&key).await {
                        tracing::warn!(key = %key, error = %err, "failed to delete stale idempotency key");
                    }
                }
            }

            if next == 0 {
                return;
            }
            cursor = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn sweep_removes_overlong_keys_and_keeps_healthy_ones() {
        let store = Arc::new(MemoryStore::new());

        store
            .set(
                &keys::idempotency_record("healthy"),
                b"{\"status\":\"completed\"}",
                Duration::from_secs(3600),
            )
            .await
            .unwrap();
        store
            .set(
                &keys::idempotency_record("stuck"),
                b"{\"status\":\"processing\"}",
                Duration::from_secs(48 * 3600),
            )
            .await
            .unwrap();

        let sweeper = IdempotencySweeper::new(store.clone());
        sweeper.sweep_once().await;

        assert!(store
            .get(&keys::idempotency_record("healthy"))
            .await
            .unwrap()
            .is_some());
        assert!(store
            .get(&keys::idempotency_record("stuck"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn live_locks_survive_the_sweep() {
        let store = Arc::new(MemoryStore::new());
        store
            .set_if_absent(&keys::idempotency_lock("k"), b"1", Duration::from_secs(300))
            .await
            .unwrap();

        let sweeper = IdempotencySweeper::new(store.clone());
        sweeper.sweep_once().await;

        assert!(store
            .get(&keys::idempotency_lock("k"))
            .await
            .unwrap()
            .is_some());
    }
}
