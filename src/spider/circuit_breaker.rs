use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::warn;

const TRIP_MIN_REQUESTS: u32 = 3;
const TRIP_FAILURE_RATIO: f64 = 0.6;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CircuitBreakerError {
    #[error("circuit breaker is open")]
    OpenState,
    #[error("too many requests")]
    TooManyRequests,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    fn gauge_value(self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::Open => 1.0,
            CircuitState::HalfOpen => 2.0,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct CircuitBreakerConfig {
    /// Calls let through while half-open, and the consecutive successes needed to close.
    pub max_requests: u32,
    /// How often closed-state counts are cleared. Zero never clears them.
    pub interval: Duration,
    /// How long the breaker stays open before probing.
    pub timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_requests: 3,
            interval: Duration::from_secs(60),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Counts {
    pub requests: u32,
    pub total_successes: u32,
    pub total_failures: u32,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
}

impl Counts {
    fn on_success(&mut self) {
        self.total_successes += 1;
        self.consecutive_successes += 1;
        self.consecutive_failures = 0;
    }

    fn on_failure(&mut self) {
        self.total_failures += 1;
        self.consecutive_failures += 1;
        self.consecutive_successes = 0;
    }

    fn ready_to_trip(&self) -> bool {
        self.requests >= TRIP_MIN_REQUESTS
            && self.total_failures as f64 / self.requests as f64 >= TRIP_FAILURE_RATIO
    }
}

struct BreakerState {
    state: CircuitState,
    generation: u64,
    counts: Counts,
    expiry: Option<Instant>,
}

/// Closed -> Open when the failure ratio trips, Open -> HalfOpen after `timeout`,
/// HalfOpen -> Closed after `max_requests` straight successes. Results that land
/// after the generation moved on are dropped.
pub struct CircuitBreaker {
    name: &'static str,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, config: CircuitBreakerConfig) -> Self {
        let breaker = Self {
            name,
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                generation: 0,
                counts: Counts::default(),
                expiry: None,
            }),
        };
        {
            let mut inner = breaker.inner.lock();
            breaker.new_generation(&mut inner, Instant::now());
        }
        metrics::gauge!("spider_circuit_breaker_state", "name" => name).set(0.0);
        breaker
    }

    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.current_state(&mut inner, Instant::now());
        inner.state
    }

    pub fn counts(&self) -> Counts {
        self.inner.lock().counts
    }

    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CircuitBreakerError>,
    {
        let generation = self.before_request()?;
        let result = operation().await;
        self.after_request(generation, result.is_ok());
        result
    }

    fn before_request(&self) -> Result<u64, CircuitBreakerError> {
        let mut inner = self.inner.lock();
        let generation = self.current_state(&mut inner, Instant::now());
        match inner.state {
            CircuitState::Open => return Err(CircuitBreakerError::OpenState),
            CircuitState::HalfOpen if inner.counts.requests >= self.config.max_requests => {
                return Err(CircuitBreakerError::TooManyRequests)
            }
            _ => {}
        }
        inner.counts.requests += 1;
        Ok(generation)
    }

    fn after_request(&self, before: u64, success: bool) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        if self.current_state(&mut inner, now) != before {
            return;
        }

        match (inner.state, success) {
            (CircuitState::Closed, true) => inner.counts.on_success(),
            (CircuitState::Closed, false) => {
                inner.counts.on_failure();
                if inner.counts.ready_to_trip() {
                    self.set_state(&mut inner, CircuitState::Open, now);
                }
            }
            (CircuitState::HalfOpen, true) => {
                inner.counts.on_success();
                if inner.counts.consecutive_successes >= self.config.max_requests {
                    self.set_state(&mut inner, CircuitState::Closed, now);
                }
            }
            (CircuitState::HalfOpen, false) => self.set_state(&mut inner, CircuitState::Open, now),
            (CircuitState::Open, _) => {}
        }
    }

    /// Applies time-based transitions and returns the current generation.
    fn current_state(&self, inner: &mut BreakerState, now: Instant) -> u64 {
        let expired = inner.expiry.map_or(false, |expiry| expiry <= now);
        match inner.state {
            CircuitState::Closed if expired => self.new_generation(inner, now),
            CircuitState::Open if expired => self.set_state(inner, CircuitState::HalfOpen, now),
            _ => {}
        }
        inner.generation
    }

    fn set_state(&self, inner: &mut BreakerState, state: CircuitState, now: Instant) {
        if inner.state == state {
            return;
        }
        let previous = inner.state;
        inner.state = state;
        self.new_generation(inner, now);

        warn!(circuit = self.name, from = %previous, to = %state, "Circuit breaker state changed");
        metrics::gauge!("spider_circuit_breaker_state", "name" => self.name).set(state.gauge_value());
    }

    fn new_generation(&self, inner: &mut BreakerState, now: Instant) {
        inner.generation += 1;
        inner.counts = Counts::default();
        inner.expiry = match inner.state {
            CircuitState::Closed if self.config.interval.is_zero() => None,
            CircuitState::Closed => Some(now + self.config.interval),
            CircuitState::Open => Some(now + self.config.timeout),
            CircuitState::HalfOpen => None,
        };
    }
}
