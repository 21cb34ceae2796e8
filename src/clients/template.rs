use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value as JsonValue;
use tracing::{debug, info};

use crate::{
    clients::{breaker_error, circuit_breaker::CircuitBreaker, send_json},
    context::RequestContext,
    error::ClientError,
    models::{
        retry::RetryConfig,
        template::{RenderRequest, RenderResponse, Template},
    },
    utils::retry_with_backoff,
};

pub const TEMPLATE_SERVICE: &str = "template-service";

#[async_trait]
pub trait TemplateClient: Send + Sync {
    async fn render_template(
        &self,
        ctx: &RequestContext,
        template_code: &str,
        language: &str,
        variables: &HashMap<String, JsonValue>,
    ) -> Result<RenderResponse, ClientError>;

    async fn get_template(
        &self,
        ctx: &RequestContext,
        template_code: &str,
        language: &str,
    ) -> Result<Template, ClientError>;
}

pub struct HttpTemplateClient {
    http_client: Client,
    base_url: String,
    retry_config: RetryConfig,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl HttpTemplateClient {
    pub fn new(
        http_client: Client,
        base_url: &str,
        retry_config: RetryConfig,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Self {
        info!(base_url, "Template service client initialized");

        Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry_config,
            circuit_breaker,
        }
    }
}

#[async_trait]
impl TemplateClient for HttpTemplateClient {
    async fn render_template(
        &self,
        ctx: &RequestContext,
        template_code: &str,
        language: &str,
        variables: &HashMap<String, JsonValue>,
    ) -> Result<RenderResponse, ClientError> {
        let url = format!("{}/api/v1/templates/{}/render", self.base_url, template_code);
        let body = RenderRequest {
            language,
            version: "latest",
            variables,
            preview_mode: false,
        };

        debug!(
            template_code,
            language,
            variable_count = variables.len(),
            "Rendering template"
        );

        let http_client = &self.http_client;
        let breaker = &self.circuit_breaker;

        retry_with_backoff(&self.retry_config, ctx, ClientError::is_retryable, || {
            let request = http_client.post(&url).json(&body);
            async move {
                breaker
                    .call(move || send_json::<RenderResponse>(TEMPLATE_SERVICE, request))
                    .await
                    .map_err(|e| breaker_error(TEMPLATE_SERVICE, e))
            }
        })
        .await
    }

    async fn get_template(
        &self,
        ctx: &RequestContext,
        template_code: &str,
        language: &str,
    ) -> Result<Template, ClientError> {
        let url = format!("{}/api/v1/templates/{}", self.base_url, template_code);

        debug!(template_code, language, "Fetching template from service");

        let http_client = &self.http_client;
        let breaker = &self.circuit_breaker;

        retry_with_backoff(&self.retry_config, ctx, ClientError::is_retryable, || {
            let request = http_client.get(&url).query(&[("language", language)]);
            async move {
                breaker
                    .call(move || send_json::<Template>(TEMPLATE_SERVICE, request))
                    .await
                    .map_err(|e| breaker_error(TEMPLATE_SERVICE, e))
            }
        })
        .await
    }
}
