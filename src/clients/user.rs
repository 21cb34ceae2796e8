use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::json;
use tracing::{debug, info};

use crate::{
    clients::{breaker_error, circuit_breaker::CircuitBreaker, send_expect_success, send_json},
    context::RequestContext,
    error::ClientError,
    models::{preferences::UserPreferences, retry::RetryConfig},
    utils::retry_with_backoff,
};

pub const USER_SERVICE: &str = "user-service";

#[async_trait]
pub trait UserPreferencesClient: Send + Sync {
    async fn get_preferences(
        &self,
        ctx: &RequestContext,
        user_id: &str,
    ) -> Result<UserPreferences, ClientError>;

    /// Reports the time of the user's latest queued notification. Runs
    /// outside the preferences breaker so its failures never gate lookups.
    async fn record_notification_sent(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<(), ClientError>;
}

pub struct HttpUserClient {
    http_client: Client,
    base_url: String,
    retry_config: RetryConfig,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl HttpUserClient {
    pub fn new(
        http_client: Client,
        base_url: &str,
        retry_config: RetryConfig,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Self {
        info!(base_url, "User service client initialized");

        Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry_config,
            circuit_breaker,
        }
    }

}

#[async_trait]
impl UserPreferencesClient for HttpUserClient {
    async fn get_preferences(
        &self,
        ctx: &RequestContext,
        user_id: &str,
    ) -> Result<UserPreferences, ClientError> {
        let url = format!("{}/api/v1/users/{}/preferences", self.base_url, user_id);

        debug!(user_id, "Fetching user preferences");

        let http_client = &self.http_client;
        let breaker = &self.circuit_breaker;

        retry_with_backoff(&self.retry_config, ctx, ClientError::is_retryable, || {
            let request = http_client.get(&url);
            async move {
                breaker
                    .call(move || send_json::<UserPreferences>(USER_SERVICE, request))
                    .await
                    .map_err(|e| breaker_error(USER_SERVICE, e))
            }
        })
        .await
    }

    async fn record_notification_sent(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<(), ClientError> {
        let url = format!("{}/api/v1/users/{}/last-notification", self.base_url, user_id);
        let body = json!({ "sent_at": sent_at });

        let http_client = &self.http_client;

        retry_with_backoff(&self.retry_config, ctx, ClientError::is_retryable, || {
            send_expect_success(USER_SERVICE, http_client.put(&url).json(&body))
        })
        .await?;

        debug!(user_id, "Last notification time recorded");
        Ok(())
    }
}
