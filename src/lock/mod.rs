//! Entity-scoped distributed lock.

use crate::store::{keys, StateStore};
use crate::Result;
use std::sync::Arc;
use std::time::Duration;

/// Default maximum lock lifetime. A crashed holder is fenced out after this
/// long; writers must finish well inside it.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(5);

/// Non-blocking mutual exclusion per entity, backed by an atomic conditional
/// write against the shared store.
///
/// `acquire` never waits: failure to take the lock is reported immediately so
/// the caller can surface a contention outcome instead of queueing. Release is
/// best-effort; the TTL is the real safety net.
pub struct EntityLock {
    store: Arc<dyn StateStore>,
}

impl EntityLock {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Attempts to take the lock for `entity_id`. Returns false when another
    /// holder exists; store failures propagate.
    pub async fn acquire(&self, entity_id: i64, ttl: Duration) -> Result<bool> {
        let key = keys::entity_lock(entity_id);
        let acquired = self.store.set_if_absent(&key, b"1", ttl).await?;
        if !acquired {
            tracing::warn!(entity_id, "entity lock already held");
        }
        Ok(acquired)
    }

    /// Releases the lock. A failed delete is logged and swallowed; the TTL
    /// will clear the key.
    pub async fn release(&self, entity_id: i64) {
        let key = keys::entity_lock(entity_id);
        if let Err(err) = self.store.delete(&key).await {
            tracing::error!(entity_id, error = %err, "failed to release entity lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn second_acquire_fails_until_release() {
        let store = Arc::new(MemoryStore::new());
        let lock = EntityLock::new(store);

        assert!(lock.acquire(1, DEFAULT_LOCK_TTL).await.unwrap());
        assert!(!lock.acquire(1, DEFAULT_LOCK_TTL).await.unwrap());

        lock.release(1).await;
        assert!(lock.acquire(1, DEFAULT_LOCK_TTL).await.unwrap());
    }

    #[tokio::test]
    async fn locks_are_scoped_per_entity() {
        let store = Arc::new(MemoryStore::new());
        let lock = EntityLock::new(store);

        assert!(lock.acquire(1, DEFAULT_LOCK_TTL).await.unwrap());
        assert!(lock.acquire(2, DEFAULT_LOCK_TTL).await.unwrap());
    }

    #[tokio::test]
    async fn ttl_fences_out_a_crashed_holder() {
        let store = Arc::new(MemoryStore::new());
        let lock = EntityLock::new(store);

        assert!(lock.acquire(1, Duration::from_millis(20)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(lock.acquire(1, DEFAULT_LOCK_TTL).await.unwrap());
    }
}
