//! Shared-store substrate.
//!
//! Every coordination primitive in this crate (entity lock, FSM storage, rate
//! limiter, idempotency records) runs against the same [`StateStore`]
//! abstraction: a remote key-value store with atomic conditional writes, TTL
//! expiry, cursor-based scans, and atomic sliding-window batches over ordered
//! sets. [`RedisStore`] is the production backend; [`MemoryStore`] is an
//! embedded implementation used by tests and single-process deployments.

mod memory;
mod redis;

pub use memory::MemoryStore;
pub use redis::RedisStore;

use crate::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Storage contract shared by all coordination primitives.
///
/// Implementations must make `set_if_absent` atomic with respect to concurrent
/// callers, and must execute each `window_*` call as one indivisible batch:
/// the sliding-window limiter's correctness depends on prune, insert and count
/// observing a single consistent view.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;

    /// Returns true when a key was actually removed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Atomic "set if no live value exists". Returns true when this caller
    /// won the write. The basis of both lock namespaces.
    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool>;

    /// One page of an incremental key scan. `cursor` starts at 0; a returned
    /// cursor of 0 means the scan is complete. Patterns use trailing-`*` glob
    /// form. The scan is a point-in-time, best-effort view.
    async fn scan(&self, pattern: &str, cursor: u64, count: usize) -> Result<(u64, Vec<String>)>;

    /// Sliding-window admission batch: atomically drop members scored below
    /// `cutoff_ms`, insert `member` at `now_ms`, refresh the key TTL, and
    /// return the resulting cardinality (the just-inserted member included).
    async fn window_admit(
        &self,
        key: &str,
        cutoff_ms: u64,
        member: &str,
        now_ms: u64,
        ttl: Duration,
    ) -> Result<u64>;

    /// Hygiene batch: atomically drop members scored below `cutoff_ms` and
    /// return the remaining cardinality.
    async fn window_prune(&self, key: &str, cutoff_ms: u64) -> Result<u64>;

    /// Remaining lifetime of a key, or `None` when the key is absent or has
    /// no expiry set. Sweepers use `None` to spot stuck entries.
    async fn time_to_live(&self, key: &str) -> Result<Option<Duration>>;

    fn name(&self) -> &'static str;
}

/// Key-space layout. The four namespaces must never collide: entity state and
/// entity locks are separate so a crashed writer cannot wedge reads, and the
/// idempotency record lives apart from its lock so losing the lock does not
/// imply losing the record.
pub mod keys {
    pub const ENTITY_STATE_SCAN: &str = "entity:state:*";
    pub const RATE_LIMIT_SCAN: &str = "ratelimit:*";
    pub const IDEMPOTENCY_SCAN: &str = "idempotency:*";

    pub fn entity_state(entity_id: i64) -> String {
        format!("entity:state:{entity_id}")
    }

    pub fn entity_lock(entity_id: i64) -> String {
        format!("entity:lock:{entity_id}")
    }

    pub fn rate_limit(key: &str) -> String {
        format!("ratelimit:{key}")
    }

    pub fn idempotency_record(key: &str) -> String {
        format!("idempotency:{key}")
    }

    pub fn idempotency_lock(key: &str) -> String {
        format!("idempotency:{key}:lock")
    }

    /// Extracts the entity id from an `entity:state:<id>` key.
    pub fn parse_entity_id(key: &str) -> Option<i64> {
        key.rsplit(':').next()?.parse().ok()
    }
}
