//! FSM controller.

use super::{is_transition_allowed, ConversationState, EntityState, StateStorage};
use crate::lock::{EntityLock, DEFAULT_LOCK_TTL};
use crate::store::StateStore;
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Receives every accepted `(from, to)` transition. Implemented by whatever
/// observability sink the host application wires in; the controller itself
/// has no metrics dependency.
pub trait TransitionObserver: Send + Sync {
    fn on_transition(&self, from: ConversationState, to: ConversationState);
}

/// Controller for per-entity conversation state.
///
/// Every mutating operation runs under the entity lock. Contention surfaces
/// as [`Error::StateLocked`], a retriable outcome rather than a failure, and
/// a rejected transition leaves storage untouched.
pub struct StateMachine {
    storage: Arc<dyn StateStorage>,
    lock: EntityLock,
    lock_ttl: Duration,
    observer: Option<Arc<dyn TransitionObserver>>,
}

impl StateMachine {
    pub fn new(storage: Arc<dyn StateStorage>, store: Arc<dyn StateStore>) -> Self {
        Self {
            storage,
            lock: EntityLock::new(store),
            lock_ttl: DEFAULT_LOCK_TTL,
            observer: None,
        }
    }

    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn TransitionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Read-only fetch. [`Error::StateNotFound`] means the entity has no
    /// state yet.
    pub async fn get(&self, entity_id: i64) -> Result<EntityState> {
        self.storage.fetch(entity_id).await
    }

    /// Unconditionally overwrites the entity's state under the lock. Used for
    /// initialization, not for validated transitions.
    pub async fn set(
        &self,
        entity_id: i64,
        state: ConversationState,
        context: HashMap<String, serde_json::Value>,
    ) -> Result<()> {
        self.locked(entity_id, async {
            self.storage
                .save(&EntityState::new(entity_id, state).with_context(context))
                .await
        })
        .await
    }

    /// Moves the entity to `target` if the transition table allows it,
    /// defaulting the current state to `Idle` for entities without a record.
    pub async fn transition(&self, entity_id: i64, target: ConversationState) -> Result<()> {
        self.locked(entity_id, async {
            let current = match self.storage.fetch(entity_id).await {
                Ok(state) => state.current_state,
                Err(Error::StateNotFound) => ConversationState::Idle,
                Err(err) => return Err(err),
            };

            if !is_transition_allowed(current, target) {
                tracing::warn!(entity_id, from = %current, to = %target, "invalid state transition");
                return Err(Error::InvalidTransition {
                    from: current.to_string(),
                    to: target.to_string(),
                });
            }

            if let Some(observer) = &self.observer {
                observer.on_transition(current, target);
            }

            self.storage.save(&EntityState::new(entity_id, target)).await
        })
        .await
    }

    /// Deletes the entity's state under the lock.
    pub async fn clear(&self, entity_id: i64) -> Result<()> {
        self.locked(entity_id, self.storage.clear(entity_id)).await
    }

    /// Best-effort snapshot of all persisted states. Not lock-protected.
    pub async fn list_all(&self) -> Result<Vec<EntityState>> {
        self.storage.list_all().await
    }

    async fn locked<F>(&self, entity_id: i64, op: F) -> Result<()>
    where
        F: std::future::Future<Output = Result<()>>,
    {
        if !self.lock.acquire(entity_id, self.lock_ttl).await? {
            return Err(Error::StateLocked);
        }
        let result = op.await;
        self.lock.release(entity_id).await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsm::StoreStorage;
    use crate::store::{keys, MemoryStore};
    use std::sync::Mutex;

    fn machine() -> (StateMachine, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let storage = Arc::new(StoreStorage::new(store.clone()));
        (StateMachine::new(storage, store.clone()), store)
    }

    #[tokio::test]
    async fn transition_walks_the_happy_path() {
        let (machine, _) = machine();
        use ConversationState::*;

        machine.transition(1, Searching).await.unwrap();
        machine.transition(1, AwaitingAmount).await.unwrap();
        machine.transition(1, AwaitingConfirm).await.unwrap();
        machine.transition(1, Idle).await.unwrap();

        assert_eq!(machine.get(1).await.unwrap().current_state, Idle);
    }

    #[tokio::test]
    async fn rejected_transition_does_not_mutate_storage() {
        let (machine, _) = machine();
        use ConversationState::*;

        machine.transition(1, Searching).await.unwrap();
        let err = machine.transition(1, AwaitingConfirm).await.unwrap_err();
        assert!(matches!(err, crate::Error::InvalidTransition { .. }));

        assert_eq!(machine.get(1).await.unwrap().current_state, Searching);
    }

    #[tokio::test]
    async fn missing_record_defaults_to_idle() {
        let (machine, _) = machine();

        // Idle -> AwaitingAmount is not in the table.
        let err = machine
            .transition(5, ConversationState::AwaitingAmount)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));

        machine
            .transition(5, ConversationState::Searching)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn error_state_is_always_reachable() {
        let (machine, _) = machine();
        machine
            .transition(2, ConversationState::Searching)
            .await
            .unwrap();
        machine.transition(2, ConversationState::Error).await.unwrap();
        assert_eq!(
            machine.get(2).await.unwrap().current_state,
            ConversationState::Error
        );
    }

    #[tokio::test]
    async fn held_lock_surfaces_as_contention() {
        let (machine, store) = machine();

        // Simulate another replica holding the entity lock.
        store
            .set_if_absent(&keys::entity_lock(1), b"1", Duration::from_secs(5))
            .await
            .unwrap();

        let err = machine
            .transition(1, ConversationState::Searching)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StateLocked));

        let err = machine.clear(1).await.unwrap_err();
        assert!(matches!(err, Error::StateLocked));
    }

    #[tokio::test]
    async fn lock_is_released_after_a_rejected_transition() {
        let (machine, _) = machine();
        machine
            .transition(3, ConversationState::Searching)
            .await
            .unwrap();
        machine
            .transition(3, ConversationState::AwaitingConfirm)
            .await
            .unwrap_err();

        // A second call would hit StateLocked if release had been skipped.
        machine
            .transition(3, ConversationState::AwaitingAmount)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn set_overwrites_wholesale() {
        let (machine, _) = machine();
        let mut context = HashMap::new();
        context.insert("query".to_string(), serde_json::json!("abc"));
        machine
            .set(4, ConversationState::Searching, context)
            .await
            .unwrap();

        machine
            .set(4, ConversationState::Idle, HashMap::new())
            .await
            .unwrap();
        let state = machine.get(4).await.unwrap();
        assert_eq!(state.current_state, ConversationState::Idle);
        assert!(state.context.is_empty());
    }

    struct Recorder(Mutex<Vec<(ConversationState, ConversationState)>>);

    impl TransitionObserver for Recorder {
        fn on_transition(&self, from: ConversationState, to: ConversationState) {
            self.0.lock().unwrap().push((from, to));
        }
    }

    #[tokio::test]
    async fn observer_sees_accepted_transitions_only() {
        let store = Arc::new(MemoryStore::new());
        let storage = Arc::new(StoreStorage::new(store.clone()));
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let machine =
            StateMachine::new(storage, store).with_observer(recorder.clone());

        use ConversationState::*;
        machine.transition(1, Searching).await.unwrap();
        machine.transition(1, AwaitingConfirm).await.unwrap_err();
        machine.transition(1, AwaitingAmount).await.unwrap();

        let seen = recorder.0.lock().unwrap().clone();
        assert_eq!(seen, vec![(Idle, Searching), (Searching, AwaitingAmount)]);
    }
}
