//! Circuit breaker.

use crate::{Error, Result};
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failure ratio at which a closed circuit trips.
    pub error_threshold: f64,
    /// Minimum observed requests before the ratio is evaluated.
    pub min_requests: u32,
    /// How long an open circuit rejects before probing.
    pub open_timeout: Duration,
    /// Concurrent probes admitted while half-open; the same number of
    /// consecutive successes closes the circuit.
    pub half_open_max_probes: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            error_threshold: 0.5,
            min_requests: 10,
            open_timeout: Duration::from_secs(30),
            half_open_max_probes: 3,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_error_threshold(mut self, threshold: f64) -> Self {
        self.error_threshold = threshold;
        self
    }

    pub fn with_min_requests(mut self, min_requests: u32) -> Self {
        self.min_requests = min_requests;
        self
    }

    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    failures: u32,
    successes: u32,
    requests: u32,
    probes_in_flight: u32,
    last_failure: Option<Instant>,
}

impl Inner {
    fn reset_counters(&mut self) {
        self.failures = 0;
        self.successes = 0;
        self.requests = 0;
        self.probes_in_flight = 0;
    }

    fn trip_open(&mut self) {
        self.state = BreakerState::Open;
        self.last_failure = Some(Instant::now());
        self.reset_counters();
    }
}

/// Per-protected-call breaker: closed until the error rate trips it, open
/// until the timeout, then half-open with a bounded probe set. Counters reset
/// on every state transition. State is in-process and never persisted; each
/// replica learns about a failing dependency on its own.
pub struct CircuitBreaker {
    cfg: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(cfg: CircuitBreakerConfig) -> Self {
        Self {
            cfg,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failures: 0,
                successes: 0,
                requests: 0,
                probes_in_flight: 0,
                last_failure: None,
            }),
        }
    }

    /// Runs `operation` under the breaker. While open, fails fast with
    /// [`Error::CircuitOpen`] without invoking it; while half-open, admits at
    /// most the configured number of concurrent probes.
    pub async fn call<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.admit()?;
        let result = operation().await;
        self.record(result.is_ok());
        result
    }

    pub fn state(&self) -> BreakerState {
        self.inner
            .lock()
            .map(|inner| inner.state)
            .unwrap_or(BreakerState::Open)
    }

    fn admit(&self) -> Result<()> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| Error::internal("circuit breaker state poisoned"))?;

        if inner.state == BreakerState::Open {
            let elapsed = inner
                .last_failure
                .map(|at| at.elapsed())
                .unwrap_or(Duration::MAX);
            if elapsed < self.cfg.open_timeout {
                return Err(Error::CircuitOpen);
            }
            inner.state = BreakerState::HalfOpen;
            inner.reset_counters();
        }

        if inner.state == BreakerState::HalfOpen {
            if inner.probes_in_flight >= self.cfg.half_open_max_probes {
                return Err(Error::CircuitOpen);
            }
            inner.probes_in_flight += 1;
        }

        Ok(())
    }

    fn record(&self, success: bool) {
        if let Ok(mut inner) = self.inner.lock() {
            if inner.state == BreakerState::HalfOpen {
                inner.probes_in_flight = inner.probes_in_flight.saturating_sub(1);
            }
            inner.requests = inner.requests.saturating_add(1);

            if success {
                inner.successes = inner.successes.saturating_add(1);
                if inner.state == BreakerState::HalfOpen
                    && inner.successes >= self.cfg.half_open_max_probes
                {
                    inner.state = BreakerState::Closed;
                    inner.reset_counters();
                }
            } else {
                inner.failures = inner.failures.saturating_add(1);
                match inner.state {
                    BreakerState::HalfOpen => inner.trip_open(),
                    BreakerState::Closed => {
                        if inner.requests >= self.cfg.min_requests {
                            let rate = f64::from(inner.failures) / f64::from(inner.requests);
                            if rate >= self.cfg.error_threshold {
                                inner.trip_open();
                            }
                        }
                    }
                    BreakerState::Open => {}
                }
            }
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
