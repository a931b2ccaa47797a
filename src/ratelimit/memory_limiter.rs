//! In-process fallback limiter.

use super::{Limiter, RateDecision};
use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime};

/// Per-process sliding-window limiter.
///
/// Buckets live in a single mutex-guarded map; the lock covers the
/// read-modify-write of one bucket per check, which is adequate at fallback
/// traffic levels. State is not shared across replicas, so this limiter is
/// never authoritative; the adaptive composite runs it at half the nominal
/// limit for exactly that reason.
pub struct MemoryLimiter {
    buckets: Mutex<HashMap<String, Vec<Instant>>>,
}

impl MemoryLimiter {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Drops buckets whose newest entry is older than `max_age`, plus any
    /// empty buckets. Call periodically; correctness does not depend on it.
    pub fn cleanup(&self, max_age: Duration) {
        if max_age.is_zero() {
            return;
        }
        let cutoff = Instant::now() - max_age;
        let mut buckets = self.buckets.lock().unwrap();
        buckets.retain(|_, requests| match requests.last() {
            Some(newest) => *newest >= cutoff,
            None => false,
        });
    }

    #[cfg(test)]
    fn bucket_count(&self) -> usize {
        self.buckets.lock().unwrap().len()
    }
}

impl Default for MemoryLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Limiter for MemoryLimiter {
    async fn check(&self, key: &str, limit: u32, window: Duration) -> Result<RateDecision> {
        let now = Instant::now();

        let mut buckets = self.buckets.lock().unwrap();
        let requests = buckets.entry(key.to_string()).or_default();
        if let Some(window_start) = now.checked_sub(window) {
            requests.retain(|t| *t >= window_start);
        }

        let mut count = requests.len() as u32;
        let allowed = count < limit;
        if allowed {
            requests.push(now);
            count += 1;
        }

        Ok(RateDecision {
            allowed,
            remaining: limit.saturating_sub(count),
            reset_at: SystemTime::now() + window,
        })
    }
}
