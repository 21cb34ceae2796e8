use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use notification_orchestrator::{
    clients::{
        circuit_breaker::CircuitBreaker,
        database::NotificationStore,
        health::{CACHE_CHECK, DATABASE_CHECK, HealthChecker},
    },
    context::RequestContext,
    error::StoreError,
    models::{
        circuit_breaker::{CircuitBreakerConfig, CircuitState},
        health::HealthStatus,
        notification::NotificationRecord,
        status::NotificationStatus,
    },
};
use tokio::time::{Instant, sleep};
use uuid::Uuid;

use crate::common::{FailingCache, MemoryCache, MemoryStore, RecordingPublisher};

/// Store whose health check never answers, as if Postgres were hung.
struct HungStore;

#[async_trait]
impl NotificationStore for HungStore {
    async fn create(&self, _: &RequestContext, _: &NotificationRecord) -> Result<(), StoreError> {
        Ok(())
    }

    async fn get_by_id(
        &self,
        _: &RequestContext,
        id: Uuid,
    ) -> Result<NotificationRecord, StoreError> {
        Err(StoreError::NotFound(id))
    }

    async fn update_status(
        &self,
        _: &RequestContext,
        id: Uuid,
        _: NotificationStatus,
        _: Option<&str>,
    ) -> Result<(), StoreError> {
        Err(StoreError::NotFound(id))
    }

    async fn get_by_user_id(
        &self,
        _: &RequestContext,
        _: &str,
        _: i64,
        _: i64,
    ) -> Result<Vec<NotificationRecord>, StoreError> {
        Ok(Vec::new())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sleep(Duration::from_secs(30)).await;
        Ok(())
    }
}

/// Test: Redis being down degrades the service but keeps it serving
#[tokio::test]
async fn test_cache_outage_is_degraded() -> Result<()> {
    let checker = HealthChecker::new(
        Arc::new(FailingCache),
        Arc::new(MemoryStore::default()),
        Arc::new(RecordingPublisher::default()),
        Vec::new(),
        Duration::from_millis(500),
    );

    let health = checker.check_all().await;

    assert_eq!(health.status, HealthStatus::Degraded);
    assert!(health.status.is_serving());
    assert_eq!(health.checks[CACHE_CHECK].status, HealthStatus::Degraded);
    assert!(health.checks[CACHE_CHECK].error.is_some());

    Ok(())
}

/// Test: A hung database check is cut off at the check timeout
#[tokio::test]
async fn test_hung_database_times_out_as_unhealthy() -> Result<()> {
    let checker = HealthChecker::new(
        Arc::new(MemoryCache::default()),
        Arc::new(HungStore),
        Arc::new(RecordingPublisher::default()),
        Vec::new(),
        Duration::from_millis(100),
    );

    let started = Instant::now();
    let health = checker.check_all().await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(health.status, HealthStatus::Unhealthy);
    assert!(!health.status.is_serving());
    assert_eq!(health.checks[DATABASE_CHECK].status, HealthStatus::Unhealthy);

    Ok(())
}

/// Test: An open breaker shows up as a degraded check named after its service
#[tokio::test]
async fn test_open_breaker_is_reported() -> Result<()> {
    let breaker = Arc::new(CircuitBreaker::new(
        "user-service",
        CircuitBreakerConfig {
            max_failures: 1,
            timeout: Duration::from_secs(60),
            half_open_max: 1,
        },
    ));
    breaker.call(|| async { Err::<(), _>("boom") }).await.ok();

    let checker = HealthChecker::new(
        Arc::new(MemoryCache::default()),
        Arc::new(MemoryStore::default()),
        Arc::new(RecordingPublisher::default()),
        vec![breaker],
        Duration::from_millis(500),
    );

    let health = checker.check_all().await;

    assert_eq!(health.status, HealthStatus::Degraded);
    let check = &health.checks["user-service"];
    assert_eq!(check.circuit_breaker, Some(CircuitState::Open));
    assert_eq!(check.status, HealthStatus::Degraded);

    Ok(())
}
