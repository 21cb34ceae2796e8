use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use dotenvy::dotenv;
use serde::Deserialize;

use crate::{
    models::{circuit_breaker::CircuitBreakerConfig, retry::RetryConfig},
    pipeline::PipelineSettings,
};

fn default_server_port() -> u16 {
    8080
}
fn default_idempotency_ttl_seconds() -> u64 {
    86_400
}
fn default_exchange_name() -> String {
    "notifications.direct".to_string()
}
fn default_email_queue_name() -> String {
    "email.queue".to_string()
}
fn default_push_queue_name() -> String {
    "push.queue".to_string()
}
fn default_dlq_name() -> String {
    "failed.queue".to_string()
}
fn default_queue_message_ttl_ms() -> u64 {
    86_400_000
}
fn default_dlq_message_ttl_ms() -> u64 {
    604_800_000
}
fn default_http_timeout_ms() -> u64 {
    10_000
}
fn default_max_failures() -> u32 {
    5
}
fn default_breaker_timeout_seconds() -> u64 {
    60
}
fn default_half_open_max() -> u32 {
    3
}
fn default_max_retry_attempts() -> u32 {
    3
}
fn default_initial_retry_delay_ms() -> u64 {
    100
}
fn default_max_retry_delay_ms() -> u64 {
    5_000
}
fn default_retry_backoff_multiplier() -> f64 {
    2.0
}
fn default_true() -> bool {
    true
}
fn default_request_timeout_ms() -> u64 {
    30_000
}
fn default_compensation_timeout_ms() -> u64 {
    5_000
}
fn default_health_check_timeout_ms() -> u64 {
    3_000
}
fn default_language() -> String {
    "en".to_string()
}

/// Flat configuration read from the environment. Only the connection URLs
/// are mandatory.
#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    #[serde(default = "default_server_port")]
    pub server_port: u16,

    pub redis_url: String,
    #[serde(default = "default_idempotency_ttl_seconds")]
    pub idempotency_ttl_seconds: u64,

    pub database_url: String,

    pub rabbitmq_url: String,
    #[serde(default = "default_exchange_name")]
    pub exchange_name: String,
    #[serde(default = "default_email_queue_name")]
    pub email_queue_name: String,
    #[serde(default = "default_push_queue_name")]
    pub push_queue_name: String,
    #[serde(default = "default_dlq_name")]
    pub dlq_name: String,
    #[serde(default = "default_queue_message_ttl_ms")]
    pub queue_message_ttl_ms: u64,
    #[serde(default = "default_dlq_message_ttl_ms")]
    pub dlq_message_ttl_ms: u64,
    #[serde(default = "default_max_retry_attempts")]
    pub publish_max_attempts: u32,

    #[serde(default)]
    pub user_service_url: String,
    #[serde(default)]
    pub template_service_url: String,
    #[serde(default = "default_http_timeout_ms")]
    pub http_timeout_ms: u64,
    #[serde(default)]
    pub use_mock_services: bool,

    #[serde(default = "default_max_failures")]
    pub circuit_breaker_max_failures: u32,
    #[serde(default = "default_breaker_timeout_seconds")]
    pub circuit_breaker_timeout_seconds: u64,
    #[serde(default = "default_half_open_max")]
    pub circuit_breaker_half_open_max: u32,

    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    #[serde(default = "default_initial_retry_delay_ms")]
    pub initial_retry_delay_ms: u64,
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    #[serde(default = "default_retry_backoff_multiplier")]
    pub retry_backoff_multiplier: f64,
    #[serde(default = "default_true")]
    pub retry_jitter: bool,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_compensation_timeout_ms")]
    pub compensation_timeout_ms: u64,
    #[serde(default = "default_language")]
    pub default_language: String,
    #[serde(default = "default_true")]
    pub track_last_notification: bool,
    #[serde(default = "default_health_check_timeout_ms")]
    pub health_check_timeout_ms: u64,
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        dotenv().ok();

        let config = envy::from_env::<Self>()
            .map_err(|e| anyhow!("Invalid or missing environment variable: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Builds a config from explicit key/value pairs, using the same names as
    /// the environment (case-insensitive).
    pub fn from_iter<I>(vars: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config = envy::from_iter::<_, Self>(vars)
            .map_err(|e| anyhow!("Invalid configuration: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), Error> {
        if !self.use_mock_services
            && (self.user_service_url.is_empty() || self.template_service_url.is_empty())
        {
            return Err(anyhow!(
                "USER_SERVICE_URL and TEMPLATE_SERVICE_URL are required unless USE_MOCK_SERVICES is set"
            ));
        }
        if self.retry_backoff_multiplier < 1.0 {
            return Err(anyhow!("RETRY_BACKOFF_MULTIPLIER must be at least 1.0"));
        }
        Ok(())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms)
    }

    pub fn idempotency_ttl(&self) -> Duration {
        Duration::from_secs(self.idempotency_ttl_seconds)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_retry_attempts,
            initial_delay_ms: self.initial_retry_delay_ms,
            max_delay_ms: self.max_retry_delay_ms,
            backoff_multiplier: self.retry_backoff_multiplier,
            jitter: self.retry_jitter,
        }
    }

    pub fn publish_retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.publish_max_attempts,
            ..self.retry_config()
        }
    }

    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            max_failures: self.circuit_breaker_max_failures,
            timeout: Duration::from_secs(self.circuit_breaker_timeout_seconds),
            half_open_max: self.circuit_breaker_half_open_max,
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            compensation_timeout: Duration::from_millis(self.compensation_timeout_ms),
            default_language: self.default_language.clone(),
            track_last_notification: self.track_last_notification,
            tracking_timeout: Duration::from_millis(self.compensation_timeout_ms),
            publish_attempts: self.publish_max_attempts,
        }
    }
}
