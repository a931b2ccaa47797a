//! Adaptive composite limiter.

use super::{Limiter, MemoryLimiter, RateDecision};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Tries the exact store-backed limiter first and degrades to the in-process
/// limiter when the backend errors.
///
/// The fallback runs at half the nominal limit: in-process buckets are not
/// shared across replicas, and an unhalved fallback would roughly double the
/// effective cluster-wide ceiling. Limiting degrades conservatively rather
/// than failing open or closed.
///
/// A backend error is never conflated with exhaustion: "exceeded" is an
/// `allowed: false` decision from either path, while an error here means both
/// paths failed.
pub struct AdaptiveLimiter {
    primary: Arc<dyn Limiter>,
    fallback: Arc<MemoryLimiter>,
}

impl AdaptiveLimiter {
    pub fn new(primary: Arc<dyn Limiter>, fallback: Arc<MemoryLimiter>) -> Self {
        Self { primary, fallback }
    }

    /// The in-process limiter, exposed so a hygiene task can run
    /// [`MemoryLimiter::cleanup`].
    pub fn fallback(&self) -> &Arc<MemoryLimiter> {
        &self.fallback
    }
}

#[async_trait]
impl Limiter for AdaptiveLimiter {
    async fn check(&self, key: &str, limit: u32, window: Duration) -> Result<RateDecision> {
        match self.primary.check(key, limit, window).await {
            Ok(decision) => Ok(decision),
            Err(err) if err.is_backend() => {
                tracing::warn!(key = %key, error = %err, "store limiter failed, falling back to in-process");
                let halved = (limit / 2).max(1);
                self.fallback.check(key, halved, window).await
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::{ratelimit::StoreLimiter, Error};

    struct FailingLimiter;

    #[async_trait]
    impl Limiter for FailingLimiter {
        async fn check(&self, _: &str, _: u32, _: Duration) -> Result<RateDecision> {
            Err(Error::store("backend unreachable"))
        }
    }

    #[tokio::test]
    async fn healthy_primary_is_authoritative() {
        let primary = Arc::new(StoreLimiter::new(Arc::new(MemoryStore::new())));
        let limiter = AdaptiveLimiter::new(primary, Arc::new(MemoryLimiter::new()));
        let window = Duration::from_secs(60);

        assert!(limiter.check("k", 2, window).await.unwrap().allowed);
        assert!(limiter.check("k", 2, window).await.unwrap().allowed);
        assert!(!limiter.check("k", 2, window).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn backend_failure_degrades_to_half_limit() {
        let limiter = AdaptiveLimiter::new(Arc::new(FailingLimiter), Arc::new(MemoryLimiter::new()));
        let window = Duration::from_secs(60);

        // Nominal limit 4, so the fallback admits only 2.
        assert!(limiter.check("k", 4, window).await.unwrap().allowed);
        assert!(limiter.check("k", 4, window).await.unwrap().allowed);
        let decision = limiter.check("k", 4, window).await.unwrap();
        assert!(!decision.allowed);
    }

    #[tokio::test]
    async fn halved_limit_never_reaches_zero() {
        let limiter = AdaptiveLimiter::new(Arc::new(FailingLimiter), Arc::new(MemoryLimiter::new()));
        let decision = limiter
            .check("k", 1, Duration::from_secs(60))
            .await
            .unwrap();
        assert!(decision.allowed);
    }

    #[tokio::test]
    async fn exhaustion_on_the_primary_is_not_a_fallback_trigger() {
        let store = Arc::new(MemoryStore::new());
        let primary = Arc::new(StoreLimiter::new(store));
        let fallback = Arc::new(MemoryLimiter::new());
        let limiter = AdaptiveLimiter::new(primary, fallback.clone());
        let window = Duration::from_secs(60);

        limiter.check("k", 1, window).await.unwrap();
        let decision = limiter.check("k", 1, window).await.unwrap();
        assert!(!decision.allowed);

        // The fallback never saw the key: an exceeded outcome stays on the
        // exact path.
        let untouched = fallback.check("k", 10, window).await.unwrap();
        assert_eq!(untouched.remaining, 9);
    }
}
