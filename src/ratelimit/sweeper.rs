//! Storage hygiene for limiter keys.

use crate::store::{keys, StateStore};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Entries older than this are unconditionally prunable; no configured window
/// outlives it.
const PRUNE_CUTOFF: Duration = Duration::from_secs(300);

const SCAN_BATCH: usize = 100;

/// Prunes aged-out tokens from limiter keys and deletes keys left empty.
///
/// Purely a storage-footprint pass: the exact limiter already self-prunes on
/// every check, so limiting correctness never depends on this running.
pub struct RateLimitSweeper {
    store: Arc<dyn StateStore>,
    interval: Duration,
}

impl RateLimitSweeper {
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
                    tracing::info!("rate limit sweeper stopped");
                    return;
                }
                _ = ticker.tick() => self.sweep_once().await,
            }
        }
    }

    /// One pass over all limiter keys. Per-key failures are logged and
    /// skipped.
    pub async fn sweep_once(&self) {
        let cutoff = SystemTime::now() - PRUNE_CUTOFF;
        let cutoff_ms = cutoff
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        let mut cursor = 0;
        let mut removed = 0usize;

        loop {
            let (next, batch) = match self.store.scan(keys::RATE_LIMIT_SCAN, cursor, SCAN_BATCH).await {
                Ok(page) => page,
                Err(err) => {
                    tracing::error!(error = %err, "rate limit sweep scan failed");
                    return;
                }
            };

            for key in batch {
                let remaining = match self.store.window_prune(&key, cutoff_ms).await {
                    Ok(count) => count,
                    Err(err) => {
                        tracing::warn!(key = %key, error = %err, "rate limit prune failed");
                        continue;
                    }
                };

                if remaining == 0 {
                    if let Err(err) = self.store.delete(&key).await {
                        tracing::warn!(key = %key, error = %err, "failed to delete empty rate limit key");
                        continue;
                    }
                    removed += 1;
                }
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        if removed > 0 {
            tracing::info!(keys_removed = removed, "rate limit keys cleaned");
        }
    }
}
