//! Staleness sweeper for entity states.

use super::{StateStorage, DEFAULT_STATE_TTL};
use crate::store::{keys, StateStore};
use crate::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

const SCAN_BATCH: usize = 100;

/// Removes entity states whose `last_updated` exceeds the TTL.
///
/// Deletion goes through the same [`StateStorage`] contract the controller
/// uses, never around it. The sweeper holds no locks: a state may vanish
/// between a reader's fetch and use, and readers already treat "not found"
/// as a normal outcome.
pub struct StateSweeper {
    store: Arc<dyn StateStore>,
    storage: Arc<dyn StateStorage>,
    ttl: Duration,
    interval: Duration,
}

impl StateSweeper {
    pub fn new(store: Arc<dyn StateStore>, storage: Arc<dyn StateStorage>) -> Self {
        Self {
            store,
            storage,
            ttl: DEFAULT_STATE_TTL,
            interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sweeps on a fixed interval until the token is cancelled. Detached from
    /// request handling; stop it only at shutdown.
    pub async fn run(&self, cancel: CancellationToken) {
        let start = tokio::time::Instant::now() + self.interval;
        let mut ticker = tokio::time::interval_at(start, self.interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("state sweeper stopped");
                    return;
                }
                _ = ticker.tick() => self.sweep_once().await,
            }
        }
    }

    /// One incremental pass over all persisted entity states. Per-key errors
    /// are logged and skipped; one bad key never aborts the pass.
    pub async fn sweep_once(&self) {
        let mut cursor = 0;
        loop {
            let (next, batch) = match self.store.scan(keys::ENTITY_STATE_SCAN, cursor, SCAN_BATCH).await {
                Ok(page) => page,
                Err(err) => {
                    tracing::error!(error = %err, "state sweep scan failed");
                    return;
                }
            };

            for key in batch {
                let Some(entity_id) = keys::parse_entity_id(&key) else {
                    tracing::warn!(key = %key, "state sweep skipping unparseable key");
                    continue;
                };

                let state = match self.storage.fetch(entity_id).await {
                    Ok(state) => state,
                    Err(Error::StateNotFound) => continue,
                    Err(err) => {
                        tracing::error!(entity_id, error = %err, "state sweep failed to load state");
                        continue;
                    }
                };

                let age = state.updated_at.elapsed().unwrap_or_default();
                if age > self.ttl {
                    if let Err(err) = self.storage.clear(entity_id).await {
                        tracing::error!(entity_id, error = %err, "state sweep failed to clear state");
                        continue;
                    }
                    tracing::info!(entity_id, "stale entity state cleared");
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
    use crate::fsm::{ConversationState, EntityState, StoreStorage};
    use crate::store::MemoryStore;
    use std::time::SystemTime;

    #[tokio::test]
    async fn sweep_removes_only_stale_states() {
        let store = Arc::new(MemoryStore::new());
        let storage = Arc::new(StoreStorage::new(store.clone()));

        storage
            .save(&EntityState::new(1, ConversationState::Searching))
            .await
            .unwrap();

        // Write a record that claims to be two hours old, bypassing save's
        // timestamp stamping.
        let mut stale = EntityState::new(2, ConversationState::Searching);
        stale.updated_at = SystemTime::now() - Duration::from_secs(7200);
        let data = serde_json::to_vec(&stale).unwrap();
        store
            .set(&keys::entity_state(2), &data, Duration::from_secs(3600))
            .await
            .unwrap();

        let sweeper = StateSweeper::new(store, storage.clone());
        sweeper.sweep_once().await;

        assert!(storage.fetch(1).await.is_ok());
        assert!(matches!(storage.fetch(2).await, Err(Error::StateNotFound)));
    }

    #[tokio::test]
    async fn sweep_skips_foreign_and_unparseable_keys() {
        let store = Arc::new(MemoryStore::new());
        let storage = Arc::new(StoreStorage::new(store.clone()));

        store
            .set("entity:state:not-a-number", b"{}", Duration::from_secs(60))
            .await
            .unwrap();
        storage
            .save(&EntityState::new(3, ConversationState::Idle))
            .await
            .unwrap();

        let sweeper = StateSweeper::new(store.clone(), storage.clone());
        sweeper.sweep_once().await;

        assert!(storage.fetch(3).await.is_ok());
        assert!(store.get("entity:state:not-a-number").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn run_stops_on_cancellation() {
        let store = Arc::new(MemoryStore::new());
        let storage = Arc::new(StoreStorage::new(store.clone()));
        let sweeper = StateSweeper::new(store, storage).with_interval(Duration::from_secs(600));

        let cancel = CancellationToken::new();
        let handle = tokio::spawn({
            let cancel = cancel.clone();
            async move { sweeper.run(cancel).await }
        });

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper did not stop")
            .unwrap();
    }
}
