use std::sync::Arc;

use anyhow::{Error, Result, anyhow};
use notification_orchestrator::{
    api::{AppState, run_api_server},
    clients::{
        circuit_breaker::CircuitBreaker,
        database::PostgresStore,
        health::HealthChecker,
        rbmq::RabbitMqPublisher,
        redis::{IdempotencyCache, RedisClient},
        template::TEMPLATE_SERVICE,
        template_client_from_config,
        user::USER_SERVICE,
        user_client_from_config,
    },
    config::Config,
    pipeline::OrchestrationService,
};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))?;

    let config = Config::load()?;

    info!(
        port = config.server_port,
        use_mock_services = config.use_mock_services,
        "Configuration loaded"
    );

    let cache = Arc::new(RedisClient::connect(&config.redis_url).await?);
    let store = Arc::new(PostgresStore::connect(&config.database_url).await?);
    let publisher = Arc::new(RabbitMqPublisher::connect(&config).await?);

    let user_breaker = Arc::new(CircuitBreaker::new(
        USER_SERVICE,
        config.circuit_breaker_config(),
    ));
    let template_breaker = Arc::new(CircuitBreaker::new(
        TEMPLATE_SERVICE,
        config.circuit_breaker_config(),
    ));

    let user_client = user_client_from_config(&config, Arc::clone(&user_breaker))?;
    let template_client = template_client_from_config(&config, Arc::clone(&template_breaker))?;

    let pipeline = OrchestrationService::new(
        user_client,
        template_client,
        store.clone(),
        publisher.clone(),
        IdempotencyCache::new(cache.clone(), config.idempotency_ttl()),
        config.pipeline_settings(),
    );

    let health_checker = HealthChecker::new(
        cache,
        store,
        publisher,
        vec![user_breaker, template_breaker],
        config.health_check_timeout(),
    );

    let state = Arc::new(AppState {
        pipeline: Arc::new(pipeline),
        health_checker,
    });

    run_api_server(state, config.server_port).await
}
