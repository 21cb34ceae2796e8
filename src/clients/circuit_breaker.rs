use std::{fmt, future::Future};

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::models::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitState};

/// Rejection or wrapped failure from [`CircuitBreaker::call`].
#[derive(Debug)]
pub enum BreakerError<E> {
    /// Breaker is open; the operation was not invoked.
    Open,
    /// Breaker is half-open and every probe slot is taken.
    TooManyRequests,
    /// The operation ran and failed.
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for BreakerError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerError::Open => write!(f, "circuit breaker is open"),
            BreakerError::TooManyRequests => {
                write!(f, "too many requests while circuit breaker is half-open")
            }
            BreakerError::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: fmt::Display + fmt::Debug> std::error::Error for BreakerError<E> {}

struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    last_state_change: Instant,
    half_open_calls: u32,
    half_open_successes: u32,
    /// Bumped on every transition so late outcomes from an earlier phase are ignored.
    generation: u64,
}

#[derive(Clone, Copy)]
struct Admission {
    generation: u64,
    probe: bool,
}

pub struct CircuitBreaker {
    service_name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(service_name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let service_name = service_name.into();

        info!(
            service = %service_name,
            max_failures = config.max_failures,
            timeout_ms = config.timeout.as_millis() as u64,
            half_open_max = config.half_open_max,
            "Circuit breaker initialized"
        );

        Self {
            service_name,
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_state_change: Instant::now(),
                half_open_calls: 0,
                half_open_successes: 0,
                generation: 0,
            }),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        inner.state
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);

        CircuitBreakerSnapshot {
            service: self.service_name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            half_open_calls: inner.half_open_calls,
            since_last_change_ms: inner.last_state_change.elapsed().as_millis() as u64,
        }
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        self.transition_to(&mut inner, CircuitState::Closed);
    }

    /// Invokes `operation` if the breaker admits it and records the outcome.
    /// The lock is only held while deciding admission and while recording.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let admission = self.admit()?;
        let mut guard = ProbeGuard {
            breaker: self,
            admission,
            armed: admission.probe,
        };

        let result = operation().await;
        guard.armed = false;

        match &result {
            Ok(_) => self.record_success(admission),
            Err(_) => self.record_failure(admission),
        }

        result.map_err(BreakerError::Inner)
    }

    fn admit<E>(&self) -> Result<Admission, BreakerError<E>> {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);

        match inner.state {
            CircuitState::Closed => Ok(Admission {
                generation: inner.generation,
                probe: false,
            }),
            CircuitState::Open => {
                warn!(service = %self.service_name, "Circuit breaker is open, rejecting request");
                Err(BreakerError::Open)
            }
            CircuitState::HalfOpen => {
                if inner.half_open_calls < self.half_open_max() {
                    inner.half_open_calls += 1;
                    debug!(
                        service = %self.service_name,
                        probe = inner.half_open_calls,
                        "Circuit breaker admitting half-open probe"
                    );
                    Ok(Admission {
                        generation: inner.generation,
                        probe: true,
                    })
                } else {
                    warn!(
                        service = %self.service_name,
                        half_open_max = self.half_open_max(),
                        "Circuit breaker probe quota exhausted, rejecting request"
                    );
                    Err(BreakerError::TooManyRequests)
                }
            }
        }
    }

    fn record_success(&self, admission: Admission) {
        let mut inner = self.inner.lock();
        if inner.generation != admission.generation {
            return;
        }

        match inner.state {
            CircuitState::Closed => inner.consecutive_failures = 0,
            CircuitState::HalfOpen => {
                inner.half_open_successes += 1;
                debug!(
                    service = %self.service_name,
                    successes = inner.half_open_successes,
                    threshold = self.half_open_max(),
                    "Circuit breaker probe succeeded"
                );
                if inner.half_open_successes >= self.half_open_max() {
                    self.transition_to(&mut inner, CircuitState::Closed);
                }
            }
            CircuitState::Open => {}
        }
    }

    fn record_failure(&self, admission: Admission) {
        let mut inner = self.inner.lock();
        if inner.generation != admission.generation {
            return;
        }

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                debug!(
                    service = %self.service_name,
                    failures = inner.consecutive_failures,
                    threshold = self.config.max_failures,
                    "Circuit breaker failure recorded"
                );
                if inner.consecutive_failures >= self.config.max_failures {
                    self.transition_to(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => self.transition_to(&mut inner, CircuitState::Open),
            CircuitState::Open => {}
        }
    }

    fn release_probe(&self, admission: Admission) {
        let mut inner = self.inner.lock();
        if inner.generation == admission.generation && inner.state == CircuitState::HalfOpen {
            inner.half_open_calls = inner.half_open_calls.saturating_sub(1);
            debug!(service = %self.service_name, "Abandoned half-open probe released");
        }
    }

    fn refresh(&self, inner: &mut BreakerState) {
        if inner.state == CircuitState::Open
            && inner.last_state_change.elapsed() >= self.config.timeout
        {
            self.transition_to(inner, CircuitState::HalfOpen);
        }
    }

    fn half_open_max(&self) -> u32 {
        self.config.half_open_max.max(1)
    }

    fn transition_to(&self, inner: &mut BreakerState, state: CircuitState) {
        let previous = inner.state;

        inner.state = state;
        inner.last_state_change = Instant::now();
        inner.generation += 1;
        inner.half_open_calls = 0;
        inner.half_open_successes = 0;

        match state {
            CircuitState::Open => warn!(
                service = %self.service_name,
                from = previous.as_str(),
                failures = inner.consecutive_failures,
                "Circuit breaker opened"
            ),
            CircuitState::HalfOpen => info!(
                service = %self.service_name,
                probes = self.half_open_max(),
                "Circuit breaker half-open, allowing probes"
            ),
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
                info!(
                    service = %self.service_name,
                    from = previous.as_str(),
                    "Circuit breaker closed"
                );
            }
        }
    }
}

/// Gives a half-open slot back if the wrapped call is dropped before it
/// reports an outcome, e.g. when the request is cancelled mid-flight.
struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
    armed: bool,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.release_probe(self.admission);
        }
    }
}
