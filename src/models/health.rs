use std::{collections::HashMap, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::circuit_breaker::CircuitState;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Degraded instances still accept notifications.
    pub fn is_serving(&self) -> bool {
        !matches!(self, HealthStatus::Unhealthy)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResponse {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub checks: HashMap<String, ServiceHealth>,
}

/// Result of probing one dependency or breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub status: HealthStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<CircuitState>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ServiceHealth {
    fn with_status(status: HealthStatus) -> Self {
        Self {
            status,
            response_time_ms: None,
            circuit_breaker: None,
            error: None,
        }
    }

    pub fn reachable(elapsed: Duration) -> Self {
        Self {
            response_time_ms: Some(elapsed.as_millis() as u64),
            ..Self::with_status(HealthStatus::Healthy)
        }
    }

    /// A dependency requests cannot proceed without.
    pub fn unreachable(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::with_status(HealthStatus::Unhealthy)
        }
    }

    /// A dependency that is down but only costs an optimisation, such as
    /// the idempotency cache.
    pub fn impaired(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::with_status(HealthStatus::Degraded)
        }
    }

    /// Any state but closed is degraded: requests to that dependency are
    /// being rejected or rationed.
    pub fn circuit(state: CircuitState, detail: Option<String>) -> Self {
        let status = match state {
            CircuitState::Closed => HealthStatus::Healthy,
            CircuitState::HalfOpen | CircuitState::Open => HealthStatus::Degraded,
        };

        Self {
            circuit_breaker: Some(state),
            error: detail,
            ..Self::with_status(status)
        }
    }
}
