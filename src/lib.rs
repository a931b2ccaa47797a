//! # parley
//!
//! Coordination core for conversational backends whose inbound events arrive
//! at-least-once and whose replicas race on the same entity's updates. The
//! crate provides three tightly-coupled primitives over one shared-store
//! substrate, plus the resilience pair they build on:
//!
//! - a per-entity finite-state machine with exclusive-access locking and
//!   bounded-lifetime state,
//! - an adaptive rate limiter that degrades from an exact store-backed
//!   sliding window to a conservative in-process fallback,
//! - an idempotent execution manager that runs a keyed operation at most
//!   once and caches its result,
//! - bounded retry with exponential backoff and a circuit breaker.
//!
//! Contention is a first-class return value throughout: a held lock, a
//! saturated window or an in-flight operation comes back as a typed outcome,
//! never as a panic or an opaque failure.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use parley::fsm::{ConversationState, StateMachine, StoreStorage};
//! use parley::store::RedisStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> parley::Result<()> {
//!     let store = Arc::new(RedisStore::connect("redis://127.0.0.1/").await?);
//!     let storage = Arc::new(StoreStorage::new(store.clone()));
//!     let machine = StateMachine::new(storage, store);
//!
//!     machine.transition(1001, ConversationState::Searching).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`store`] | Shared-store substrate: trait, Redis and in-memory backends |
//! | [`lock`] | Entity-scoped distributed lock |
//! | [`fsm`] | Per-entity state machine, storage and staleness sweeper |
//! | [`ratelimit`] | Exact, approximate and adaptive limiters plus policy and sweeper |
//! | [`idempotency`] | At-most-once execution manager, record store and sweeper |
//! | [`resilience`] | Retry, circuit breaker and the panic supervisor |
//! | [`config`] | YAML-backed tuning for every TTL, interval and limit |

pub mod config;
pub mod fsm;
pub mod idempotency;
pub mod lock;
pub mod ratelimit;
pub mod resilience;
pub mod store;

mod error;

pub use error::Error;

// Re-export main types for convenience
pub use config::CoordinationConfig;
pub use fsm::{ConversationState, EntityState, StateMachine};
pub use idempotency::{ExecutionOutcome, IdempotencyManager};
pub use ratelimit::{AdaptiveLimiter, Limiter, RateDecision};
pub use resilience::{CircuitBreaker, RetryPolicy};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;
