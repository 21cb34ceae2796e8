use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use redis::{AsyncCommands, Client, aio::MultiplexedConnection};
use tracing::{debug, info, warn};

use crate::{
    context::RequestContext, error::CacheError, models::notification::NotificationResponse,
};

/// Minimal key/value surface the idempotency cache needs.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    async fn ping(&self) -> Result<(), CacheError>;
}

pub struct RedisClient {
    connection: MultiplexedConnection,
}

impl RedisClient {
    pub async fn connect(redis_url: &str) -> Result<Self, CacheError> {
        info!("Connecting to Redis");

        let client = Client::open(redis_url)?;
        let connection = client.get_multiplexed_async_connection().await?;

        info!("Redis connection established");

        Ok(Self { connection })
    }
}

#[async_trait]
impl CacheBackend for RedisClient {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.connection.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.connection.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
            .await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.connection.clone();
        let reply: String = redis::cmd("PING").query_async(&mut conn).await?;
        if reply != "PONG" {
            return Err(CacheError::Unavailable(format!("unexpected PING reply: {}", reply)));
        }
        Ok(())
    }
}

/// Response cache keyed by the caller's idempotency key. It never fails the
/// request: backend errors, interruptions and undecodable entries are logged
/// and treated as a miss, and failed writes are dropped.
pub struct IdempotencyCache {
    backend: Arc<dyn CacheBackend>,
    ttl: Duration,
}

impl IdempotencyCache {
    pub fn new(backend: Arc<dyn CacheBackend>, ttl: Duration) -> Self {
        Self { backend, ttl }
    }

    fn cache_key(idempotency_key: &str) -> String {
        format!("idempotency:{}", idempotency_key)
    }

    pub async fn lookup(
        &self,
        ctx: &RequestContext,
        idempotency_key: &str,
    ) -> Option<NotificationResponse> {
        let key = Self::cache_key(idempotency_key);

        let raw = match ctx.guard(self.backend.get(&key)).await {
            Ok(Ok(Some(raw))) => raw,
            Ok(Ok(None)) => return None,
            Ok(Err(e)) => {
                warn!(
                    idempotency_key,
                    error = %e,
                    "Idempotency lookup failed, continuing without cache"
                );
                return None;
            }
            Err(e) => {
                warn!(idempotency_key, error = %e, "Idempotency lookup interrupted");
                return None;
            }
        };

        match serde_json::from_str::<NotificationResponse>(&raw) {
            Ok(response) => {
                debug!(
                    idempotency_key,
                    notification_id = %response.notification_id,
                    "Idempotency cache hit"
                );
                Some(response)
            }
            Err(e) => {
                warn!(idempotency_key, error = %e, "Discarding undecodable idempotency entry");
                None
            }
        }
    }

    pub async fn store(
        &self,
        ctx: &RequestContext,
        idempotency_key: &str,
        response: &NotificationResponse,
    ) {
        let key = Self::cache_key(idempotency_key);

        let value = match serde_json::to_string(response) {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    idempotency_key,
                    error = %e,
                    "Failed to encode response for idempotency cache"
                );
                return;
            }
        };

        match ctx.guard(self.backend.set_ex(&key, &value, self.ttl)).await {
            Ok(Ok(())) => debug!(idempotency_key, ttl_secs = self.ttl.as_secs(), "Response cached"),
            Ok(Err(e)) => warn!(idempotency_key, error = %e, "Failed to cache response"),
            Err(e) => warn!(idempotency_key, error = %e, "Caching response interrupted"),
        }
    }
}
