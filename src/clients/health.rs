use std::{collections::HashMap, fmt::Display, future::Future, sync::Arc, time::Duration};

use chrono::Utc;
use tokio::time::{Instant, timeout};
use tracing::{debug, warn};

use crate::{
    clients::{
        circuit_breaker::CircuitBreaker, database::NotificationStore, rbmq::MessagePublisher,
        redis::CacheBackend,
    },
    models::{
        circuit_breaker::CircuitState,
        health::{HealthCheckResponse, HealthStatus, ServiceHealth},
    },
};

pub const DATABASE_CHECK: &str = "database";
pub const CACHE_CHECK: &str = "cache_service";
pub const BROKER_CHECK: &str = "message_broker";

/// Checks whose failure stops the service from accepting notifications.
const CRITICAL: [&str; 2] = [DATABASE_CHECK, BROKER_CHECK];

pub struct HealthChecker {
    cache: Arc<dyn CacheBackend>,
    store: Arc<dyn NotificationStore>,
    publisher: Arc<dyn MessagePublisher>,
    breakers: Vec<Arc<CircuitBreaker>>,
    check_timeout: Duration,
}

impl HealthChecker {
    pub fn new(
        cache: Arc<dyn CacheBackend>,
        store: Arc<dyn NotificationStore>,
        publisher: Arc<dyn MessagePublisher>,
        breakers: Vec<Arc<CircuitBreaker>>,
        check_timeout: Duration,
    ) -> Self {
        Self {
            cache,
            store,
            publisher,
            breakers,
            check_timeout,
        }
    }

    pub async fn check_all(&self) -> HealthCheckResponse {
        let (db_health, cache_health, broker_health) = tokio::join!(
            self.probe(DATABASE_CHECK, self.store.health_check()),
            self.probe(CACHE_CHECK, self.cache.ping()),
            self.probe(BROKER_CHECK, self.publisher.health_check())
        );

        let mut checks = HashMap::from([
            (DATABASE_CHECK.to_string(), db_health),
            (CACHE_CHECK.to_string(), cache_health),
            (BROKER_CHECK.to_string(), broker_health),
        ]);

        for breaker in &self.breakers {
            checks.insert(
                breaker.service_name().to_string(),
                Self::check_circuit_breaker(breaker),
            );
        }

        HealthCheckResponse {
            status: determine_overall_status(&checks),
            timestamp: Utc::now(),
            checks,
        }
    }

    /// Runs one dependency check under the check timeout. Critical failures
    /// are unhealthy; anything else only degrades the service.
    async fn probe<F, E>(&self, name: &'static str, check: F) -> ServiceHealth
    where
        F: Future<Output = Result<(), E>>,
        E: Display,
    {
        let start = Instant::now();

        let failure = match timeout(self.check_timeout, check).await {
            Ok(Ok(())) => {
                let elapsed = start.elapsed();
                debug!(
                    check = name,
                    response_time_ms = elapsed.as_millis() as u64,
                    "Health check passed"
                );
                return ServiceHealth::reachable(elapsed);
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("no response within {}ms", self.check_timeout.as_millis()),
        };

        warn!(check = name, error = %failure, "Health check failed");

        if CRITICAL.contains(&name) {
            ServiceHealth::unreachable(failure)
        } else {
            ServiceHealth::impaired(failure)
        }
    }

    fn check_circuit_breaker(breaker: &CircuitBreaker) -> ServiceHealth {
        let snapshot = breaker.snapshot();

        debug!(
            service = %snapshot.service,
            circuit_state = snapshot.state.as_str(),
            consecutive_failures = snapshot.consecutive_failures,
            "Circuit breaker state checked"
        );

        let detail = match snapshot.state {
            CircuitState::Closed => None,
            CircuitState::HalfOpen => Some("Circuit breaker in recovery mode".to_string()),
            CircuitState::Open => Some(format!(
                "Circuit breaker open for {}ms",
                snapshot.since_last_change_ms
            )),
        };

        ServiceHealth::circuit(snapshot.state, detail)
    }
}

/// Unhealthy only when a critical check is; degraded if anything else is
/// impaired or a breaker is not closed.
pub fn determine_overall_status(checks: &HashMap<String, ServiceHealth>) -> HealthStatus {
    let mut overall = HealthStatus::Healthy;

    for (name, health) in checks {
        match health.status {
            HealthStatus::Healthy => {}
            HealthStatus::Unhealthy if CRITICAL.contains(&name.as_str()) => {
                return HealthStatus::Unhealthy;
            }
            HealthStatus::Unhealthy | HealthStatus::Degraded => overall = HealthStatus::Degraded,
        }
    }

    overall
}
