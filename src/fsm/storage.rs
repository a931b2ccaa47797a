//! Persistence for entity FSM states.

use super::EntityState;
use crate::store::{keys, StateStore};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// State records expire an hour after their last write unless refreshed.
pub const DEFAULT_STATE_TTL: Duration = Duration::from_secs(3600);

const SCAN_BATCH: usize = 100;

/// Persistence contract for entity FSM state. Absence is reported as
/// [`Error::StateNotFound`] so callers can tell first contact from failure.
#[async_trait]
pub trait StateStorage: Send + Sync {
    async fn fetch(&self, entity_id: i64) -> Result<EntityState>;
    /// Persists the record wholesale, stamping `updated_at`.
    async fn save(&self, state: &EntityState) -> Result<()>;
    async fn clear(&self, entity_id: i64) -> Result<()>;
    /// Point-in-time snapshot of every persisted state. Not lock-protected;
    /// records may appear or vanish while the scan runs.
    async fn list_all(&self) -> Result<Vec<EntityState>>;
}

/// [`StateStorage`] over the shared store, one JSON document per entity.
pub struct StoreStorage {
    store: Arc<dyn StateStore>,
    ttl: Duration,
}

impl StoreStorage {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            ttl: DEFAULT_STATE_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

#[async_trait]
impl StateStorage for StoreStorage {
    async fn fetch(&self, entity_id: i64) -> Result<EntityState> {
        let key = keys::entity_state(entity_id);
        let data = self.store.get(&key).await.map_err(|err| {
            tracing::error!(entity_id, error = %err, "failed to load entity state");
            err
        })?;

        match data {
            Some(bytes) => {
                let state = serde_json::from_slice(&bytes).map_err(|err| {
                    tracing::error!(entity_id, error = %err, "failed to decode entity state");
                    Error::from(err)
                })?;
                Ok(state)
            }
            None => Err(Error::StateNotFound),
        }
    }

    async fn save(&self, state: &EntityState) -> Result<()> {
        let mut record = state.clone();
        record.updated_at = SystemTime::now();

        let data = serde_json::to_vec(&record)?;
        let key = keys::entity_state(record.entity_id);
        self.store.set(&key, &data, self.ttl).await.map_err(|err| {
            tracing::error!(entity_id = record.entity_id, error = %err, "failed to save entity state");
            err
        })
    }

    async fn clear(&self, entity_id: i64) -> Result<()> {
        let key = keys::entity_state(entity_id);
        self.store.delete(&key).await.map_err(|err| {
            tracing::error!(entity_id, error = %err, "failed to clear entity state");
            err
        })?;
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<EntityState>> {
        let mut result = Vec::new();
        let mut cursor = 0;

        loop {
            let (next, batch) = self
                .store
                .scan(keys::ENTITY_STATE_SCAN, cursor, SCAN_BATCH)
                .await?;

            for key in batch {
                // A record may expire between scan and fetch; that is a
                // normal outcome, not an error.
                let Some(bytes) = self.store.get(&key).await? else {
                    continue;
                };
                match serde_json::from_slice::<EntityState>(&bytes) {
                    Ok(state) => result.push(state),
                    Err(err) => {
                        tracing::error!(key = %key, error = %err, "skipping undecodable entity state");
                    }
                }
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsm::ConversationState;
    use crate::store::MemoryStore;
    use std::collections::HashMap;

    fn storage() -> StoreStorage {
        StoreStorage::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn fetch_distinguishes_absence_from_failure() {
        let storage = storage();
        assert!(matches!(
            storage.fetch(1).await,
            Err(Error::StateNotFound)
        ));
    }

    #[tokio::test]
    async fn save_then_fetch_round_trips_state_and_context() {
        let storage = storage();
        let mut context = HashMap::new();
        context.insert("amount".to_string(), serde_json::json!(12.5));
        let state = EntityState::new(9, ConversationState::AwaitingAmount).with_context(context);

        storage.save(&state).await.unwrap();
        let loaded = storage.fetch(9).await.unwrap();

        assert_eq!(loaded.entity_id, 9);
        assert_eq!(loaded.current_state, ConversationState::AwaitingAmount);
        assert_eq!(loaded.context, state.context);
        assert!(loaded.updated_at >= state.updated_at);
    }

    #[tokio::test]
    async fn save_stamps_a_fresh_timestamp() {
        let storage = storage();
        let mut state = EntityState::new(3, ConversationState::Idle);
        state.updated_at = SystemTime::UNIX_EPOCH;

        storage.save(&state).await.unwrap();
        let loaded = storage.fetch(3).await.unwrap();
        assert!(loaded.updated_at > SystemTime::UNIX_EPOCH);
    }

    #[tokio::test]
    async fn clear_removes_the_record() {
        let storage = storage();
        storage
            .save(&EntityState::new(4, ConversationState::Searching))
            .await
            .unwrap();

        storage.clear(4).await.unwrap();
        assert!(matches!(storage.fetch(4).await, Err(Error::StateNotFound)));
        // Clearing an absent record is a no-op, not an error.
        storage.clear(4).await.unwrap();
    }

    #[tokio::test]
    async fn list_all_snapshots_every_entity() {
        let storage = storage();
        for id in [1, 2, 3] {
            storage
                .save(&EntityState::new(id, ConversationState::Searching))
                .await
                .unwrap();
        }

        let mut all = storage.list_all().await.unwrap();
        all.sort_by_key(|s| s.entity_id);
        assert_eq!(
            all.iter().map(|s| s.entity_id).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }
}
