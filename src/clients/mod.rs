pub mod circuit_breaker;
pub mod database;
pub mod health;
pub mod mock;
pub mod rbmq;
pub mod redis;
pub mod template;
pub mod user;

use std::{sync::Arc, time::Duration};

use anyhow::{Error, Result, anyhow};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::info;

use crate::{
    clients::{
        circuit_breaker::{BreakerError, CircuitBreaker},
        mock::{MockTemplateClient, MockUserClient},
        template::{HttpTemplateClient, TemplateClient},
        user::{HttpUserClient, UserPreferencesClient},
    },
    config::Config,
    error::ClientError,
};

/// Sends `request` and decodes a successful JSON body. Non-2xx responses keep
/// their status so the retry predicate can classify them.
pub(crate) async fn send_json<T: DeserializeOwned>(
    service: &'static str,
    request: RequestBuilder,
) -> Result<T, ClientError> {
    let response = check_status(service, request).await?;

    response
        .json::<T>()
        .await
        .map_err(|e| ClientError::Decode {
            service,
            message: e.to_string(),
        })
}

pub(crate) async fn send_expect_success(
    service: &'static str,
    request: RequestBuilder,
) -> Result<(), ClientError> {
    check_status(service, request).await.map(|_| ())
}

async fn check_status(
    service: &'static str,
    request: RequestBuilder,
) -> Result<reqwest::Response, ClientError> {
    let response = request.send().await.map_err(|e| ClientError::Transport {
        service,
        message: e.to_string(),
    })?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(ClientError::Status {
        service,
        status: status.as_u16(),
        body,
    })
}

pub(crate) fn breaker_error(service: &'static str, err: BreakerError<ClientError>) -> ClientError {
    match err {
        BreakerError::Open => ClientError::CircuitOpen { service },
        BreakerError::TooManyRequests => ClientError::TooManyRequests { service },
        BreakerError::Inner(e) => e,
    }
}

pub fn build_http_client(timeout: Duration) -> Result<Client, Error> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))
}

/// Live HTTP client, or the in-memory double when `use_mock_services` is set.
pub fn user_client_from_config(
    config: &Config,
    circuit_breaker: Arc<CircuitBreaker>,
) -> Result<Arc<dyn UserPreferencesClient>, Error> {
    if config.use_mock_services {
        info!("Using in-memory user preferences service");
        return Ok(Arc::new(MockUserClient::new()));
    }

    let http_client = build_http_client(config.http_timeout())?;
    Ok(Arc::new(HttpUserClient::new(
        http_client,
        &config.user_service_url,
        config.retry_config(),
        circuit_breaker,
    )))
}

pub fn template_client_from_config(
    config: &Config,
    circuit_breaker: Arc<CircuitBreaker>,
) -> Result<Arc<dyn TemplateClient>, Error> {
    if config.use_mock_services {
        info!("Using in-memory template service");
        return Ok(Arc::new(MockTemplateClient::new()));
    }

    let http_client = build_http_client(config.http_timeout())?;
    Ok(Arc::new(HttpTemplateClient::new(
        http_client,
        &config.template_service_url,
        config.retry_config(),
        circuit_breaker,
    )))
}
