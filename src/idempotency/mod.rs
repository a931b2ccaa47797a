//! At-most-once execution.
//!
//! The manager deduplicates concurrent or repeated invocations of one logical
//! operation: a short-lived lock elects a single runner, the outcome is
//! cached under the caller's TTL, and every other caller either receives the
//! cached result or polls briefly until one appears. A failed operation is
//! never cached, so a later retry with the same key runs it again.

mod key;
mod store;
mod sweeper;

pub use key::operation_key;
pub use store::{IdempotencyRecord, RecordStatus, RecordStore, SharedRecordStore};
pub use sweeper::IdempotencySweeper;

use crate::resilience::supervise;
use crate::{Error, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Result of an idempotent execution. `from_cache` is false for exactly the
/// one caller whose invocation actually ran the operation.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    pub response: serde_json::Value,
    pub from_cache: bool,
}

/// Tuning knobs for the execute loop.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Safety TTL on the per-key lock, independent of the record TTL. Bounds
    /// how long a crashed runner can stall other callers.
    pub lock_ttl: Duration,
    /// How long a non-winning caller sleeps between polls.
    pub poll_interval: Duration,
    /// Total time a caller is willing to wait for another runner's outcome
    /// before giving up with [`Error::OperationInProgress`].
    pub max_wait: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(300),
            poll_interval: Duration::from_millis(100),
            max_wait: Duration::from_secs(30),
        }
    }
}

/// Deduplicating executor for keyed operations.
pub struct IdempotencyManager {
    store: Arc<dyn RecordStore>,
    config: ManagerConfig,
}

impl IdempotencyManager {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            config: ManagerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    /// Runs `operation` at most once for `key`, caching the result for `ttl`.
    ///
    /// Expressed as a loop rather than recursion to bound stack depth. The
    /// poll branch is the only suspension point; it re-checks `cancel` on
    /// every iteration and returns [`Error::Cancelled`] verbatim when the
    /// caller abandons the wait.
    pub async fn execute<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        cancel: &CancellationToken,
        operation: F,
    ) -> Result<ExecutionOutcome>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<serde_json::Value>> + Send + 'static,
    {
        let mut operation = Some(operation);
        let deadline = tokio::time::Instant::now() + self.config.max_wait;

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            if self.store.try_lock(key, self.config.lock_ttl).await? {
                // The previous holder may have completed between our last
                // poll and this acquisition; serve its result instead of
                // running the operation a second time.
                match self.store.fetch(key).await {
                    Ok(Some(record)) if record.status == RecordStatus::Completed => {
                        self.store.unlock(key).await;
                        return Ok(ExecutionOutcome {
                            response: record.response.unwrap_or(serde_json::Value::Null),
                            from_cache: true,
                        });
                    }
                    Ok(_) => {}
                    Err(err) => {
                        self.store.unlock(key).await;
                        return Err(err);
                    }
                }

                let Some(op) = operation.take() else {
                    self.store.unlock(key).await;
                    return Err(Error::internal("idempotent operation polled after being consumed"));
                };
                let result = self.run_as_winner(key, ttl, op).await;
                self.store.unlock(key).await;
                return result;
            }

            match self.store.fetch(key).await? {
                Some(record) if record.status == RecordStatus::Completed => {
                    return Ok(ExecutionOutcome {
                        response: record.response.unwrap_or(serde_json::Value::Null),
                        from_cache: true,
                    });
                }
                // Absent, or stuck at processing from a dead writer: keep
                // polling until the lock frees or the deadline passes.
                _ => self.wait_for_turn(cancel, deadline).await?,
            }
        }
    }

    async fn run_as_winner<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        operation: F,
    ) -> Result<ExecutionOutcome>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<serde_json::Value>> + Send + 'static,
    {
        // A failure (or panic, absorbed by the supervisor) writes no record:
        // the key stays retriable.
        let response = supervise(operation()).await?;

        self.store
            .store(key, &IdempotencyRecord::completed(response.clone()), ttl)
            .await?;

        Ok(ExecutionOutcome {
            response,
            from_cache: false,
        })
    }

    async fn wait_for_turn(
        &self,
        cancel: &CancellationToken,
        deadline: tokio::time::Instant,
    ) -> Result<()> {
        if tokio::time::Instant::now() >= deadline {
            return Err(Error::OperationInProgress);
        }
        tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            _ = tokio::time::sleep(self.config.poll_interval) => Ok(()),
        }
    }
}
