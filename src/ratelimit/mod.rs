//! Sliding-window rate limiting.
//!
//! Three cooperating limiters share one contract: [`StoreLimiter`] counts
//! against the shared store and is exact across replicas;
//! [`MemoryLimiter`] is the per-process approximation; [`AdaptiveLimiter`]
//! tries the exact path and degrades to the conservative in-process path on
//! backend failure. Exhaustion is a [`RateDecision`] with `allowed: false`,
//! never an error; an error means the infrastructure failed.

mod adaptive;
mod memory_limiter;
mod rules;
mod store_limiter;
mod sweeper;

pub use adaptive::AdaptiveLimiter;
pub use memory_limiter::MemoryLimiter;
pub use rules::{RateLimitRules, RatePolicy, RateRule};
pub use store_limiter::StoreLimiter;
pub use sweeper::RateLimitSweeper;

use crate::Result;
use async_trait::async_trait;
use std::time::{Duration, SystemTime};

/// Outcome of a rate-limit evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Admissions left inside the current window.
    pub remaining: u32,
    /// Instant by which the request recorded now has left the window, i.e.
    /// the latest point a blocked caller must wait before a retry can succeed.
    pub reset_at: SystemTime,
}

/// A rate-limiting strategy. `check` records the request and reports whether
/// it fits inside the window; it never blocks on contention.
#[async_trait]
pub trait Limiter: Send + Sync {
    async fn check(&self, key: &str, limit: u32, window: Duration) -> Result<RateDecision>;
}
