use async_trait::async_trait;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
    options::{
        BasicPublishOptions, ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions,
        QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    config::Config,
    context::RequestContext,
    error::PublishError,
    models::{
        message::{DeliveryPayload, DlqMessage},
        notification::NotificationType,
        retry::RetryConfig,
    },
    utils::retry_with_backoff,
};

/// Routing key for a channel type. Each key is bound to its own queue.
pub fn routing_key(notification_type: NotificationType) -> &'static str {
    notification_type.as_str()
}

#[async_trait]
pub trait MessagePublisher: Send + Sync {
    async fn publish(
        &self,
        ctx: &RequestContext,
        notification_type: NotificationType,
        notification_id: Uuid,
        payload: &DeliveryPayload,
    ) -> Result<(), PublishError>;

    async fn forward_to_dead_letter(
        &self,
        ctx: &RequestContext,
        message: &DlqMessage,
    ) -> Result<(), PublishError>;

    async fn health_check(&self) -> Result<(), PublishError>;
}

pub struct RabbitMqPublisher {
    connection: Connection,
    channel: Channel,
    exchange: String,
    dlq_name: String,
    retry_config: RetryConfig,
}

impl RabbitMqPublisher {
    pub async fn connect(config: &Config) -> Result<Self, PublishError> {
        info!("Connecting to RabbitMQ");

        let connection =
            Connection::connect(&config.rabbitmq_url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;

        channel
            .exchange_declare(
                &config.exchange_name,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        for (queue, notification_type) in [
            (&config.email_queue_name, NotificationType::Email),
            (&config.push_queue_name, NotificationType::Push),
        ] {
            channel
                .queue_declare(
                    queue,
                    QueueDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    ttl_arguments(config.queue_message_ttl_ms),
                )
                .await?;

            channel
                .queue_bind(
                    queue,
                    &config.exchange_name,
                    routing_key(notification_type),
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await?;

            debug!(
                queue = %queue,
                routing_key = routing_key(notification_type),
                "Delivery queue declared"
            );
        }

        channel
            .queue_declare(
                &config.dlq_name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                ttl_arguments(config.dlq_message_ttl_ms),
            )
            .await?;

        info!(
            exchange = %config.exchange_name,
            dlq = %config.dlq_name,
            "RabbitMQ topology declared"
        );

        Ok(Self {
            connection,
            channel,
            exchange: config.exchange_name.clone(),
            dlq_name: config.dlq_name.clone(),
            retry_config: config.publish_retry_config(),
        })
    }

    /// Publishes once and waits for the broker's confirmation.
    async fn publish_confirmed(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        message_id: &str,
    ) -> Result<(), PublishError> {
        let properties = BasicProperties::default()
            .with_delivery_mode(2)
            .with_content_type("application/json".into())
            .with_message_id(message_id.into());

        let confirmation = self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                body,
                properties,
            )
            .await?
            .await?;

        if confirmation.is_nack() {
            return Err(PublishError::Nacked {
                routing_key: routing_key.to_string(),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl MessagePublisher for RabbitMqPublisher {
    async fn publish(
        &self,
        ctx: &RequestContext,
        notification_type: NotificationType,
        notification_id: Uuid,
        payload: &DeliveryPayload,
    ) -> Result<(), PublishError> {
        let body = serde_json::to_vec(payload)?;
        let key = routing_key(notification_type);
        let message_id = notification_id.to_string();

        retry_with_backoff(&self.retry_config, ctx, PublishError::is_retryable, || {
            self.publish_confirmed(&self.exchange, key, &body, &message_id)
        })
        .await?;

        info!(
            notification_id = %notification_id,
            routing_key = key,
            "Notification published"
        );

        Ok(())
    }

    async fn forward_to_dead_letter(
        &self,
        ctx: &RequestContext,
        message: &DlqMessage,
    ) -> Result<(), PublishError> {
        let body = serde_json::to_vec(message)?;
        let message_id = Uuid::new_v4().to_string();

        retry_with_backoff(&self.retry_config, ctx, PublishError::is_retryable, || {
            self.publish_confirmed("", &self.dlq_name, &body, &message_id)
        })
        .await
        .inspect_err(|e| {
            warn!(
                error = %e,
                dlq = %self.dlq_name,
                "Failed to forward to dead letter queue"
            )
        })?;

        info!(
            dlq = %self.dlq_name,
            error_type = %message.error_type,
            "Message forwarded to dead letter queue"
        );

        Ok(())
    }

    async fn health_check(&self) -> Result<(), PublishError> {
        if self.connection.status().connected() && self.channel.status().connected() {
            Ok(())
        } else {
            Err(PublishError::Unavailable(
                "RabbitMQ connection is not open".to_string(),
            ))
        }
    }
}

fn ttl_arguments(ttl_ms: u64) -> FieldTable {
    let mut arguments = FieldTable::default();
    arguments.insert("x-message-ttl".into(), AMQPValue::LongLongInt(ttl_ms as i64));
    arguments
}
