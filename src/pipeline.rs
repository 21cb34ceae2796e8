use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    clients::{
        database::NotificationStore,
        rbmq::{MessagePublisher, routing_key},
        redis::IdempotencyCache,
        template::TemplateClient,
        user::UserPreferencesClient,
    },
    context::RequestContext,
    error::{ClientError, PipelineError, PublishError, StoreError},
    models::{
        message::{DeliveryPayload, DlqMessage},
        notification::{
            NotificationRecord, NotificationRequest, NotificationResponse, NotificationType,
            StatusUpdate,
        },
        preferences::UserPreferences,
        status::NotificationStatus,
        template::RenderResponse,
    },
};

pub const QUEUED_MESSAGE: &str = "Notification queued for delivery";
pub const DISABLED_MESSAGE: &str = "User has disabled notifications";
pub const OPTED_OUT_MESSAGE: &str = "User has opted out";

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Budget for one full pipeline run.
    pub request_timeout: Duration,
    /// Budget for the status update and dead-letter forward after a failed
    /// publish. Runs under its own context so it survives request cancellation.
    pub compensation_timeout: Duration,
    pub default_language: String,
    pub track_last_notification: bool,
    pub tracking_timeout: Duration,
    /// Reported as `retry_count` on dead-lettered payloads.
    pub publish_attempts: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            compensation_timeout: Duration::from_secs(5),
            default_language: "en".to_string(),
            track_last_notification: true,
            tracking_timeout: Duration::from_secs(5),
            publish_attempts: 3,
        }
    }
}

pub struct OrchestrationService {
    user_client: Arc<dyn UserPreferencesClient>,
    template_client: Arc<dyn TemplateClient>,
    store: Arc<dyn NotificationStore>,
    publisher: Arc<dyn MessagePublisher>,
    idempotency: IdempotencyCache,
    settings: PipelineSettings,
}

impl OrchestrationService {
    pub fn new(
        user_client: Arc<dyn UserPreferencesClient>,
        template_client: Arc<dyn TemplateClient>,
        store: Arc<dyn NotificationStore>,
        publisher: Arc<dyn MessagePublisher>,
        idempotency: IdempotencyCache,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            user_client,
            template_client,
            store,
            publisher,
            idempotency,
            settings,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub async fn process(
        &self,
        request: &NotificationRequest,
    ) -> Result<NotificationResponse, PipelineError> {
        let ctx = RequestContext::new(self.settings.request_timeout);
        self.process_with_context(&ctx, request).await
    }

    /// Runs the pipeline under `ctx`. Business outcomes (skipped, failed) are
    /// `Ok`; an `Err` means the outcome could not be determined.
    pub async fn process_with_context(
        &self,
        ctx: &RequestContext,
        request: &NotificationRequest,
    ) -> Result<NotificationResponse, PipelineError> {
        info!(
            request_id = %request.request_id,
            user_id = %request.user_id,
            notification_type = %request.notification_type,
            template_code = %request.template_code,
            "Processing notification request"
        );

        ctx.check()?;

        let idempotency_key = request
            .idempotency_key
            .as_deref()
            .filter(|key| !key.is_empty());

        if let Some(key) = idempotency_key
            && let Some(cached) = self.idempotency.lookup(ctx, key).await
        {
            info!(
                request_id = %request.request_id,
                idempotency_key = key,
                notification_id = %cached.notification_id,
                "Returning cached response for duplicate request"
            );
            return Ok(cached);
        }

        let response = self.execute(ctx, request).await?;

        if let Some(key) = idempotency_key {
            self.idempotency.store(ctx, key, &response).await;
        }

        Ok(response)
    }

    async fn execute(
        &self,
        ctx: &RequestContext,
        request: &NotificationRequest,
    ) -> Result<NotificationResponse, PipelineError> {
        let prefs = self
            .user_client
            .get_preferences(ctx, &request.user_id)
            .await
            .map_err(|e| {
                error!(user_id = %request.user_id, error = %e, "Failed to get user preferences");
                client_failure(e, PipelineError::Preferences)
            })?;

        if !prefs.notification_enabled || prefs.is_opted_out(request.notification_type) {
            let reason = if !prefs.notification_enabled {
                DISABLED_MESSAGE
            } else {
                OPTED_OUT_MESSAGE
            };

            warn!(user_id = %request.user_id, reason, "Skipping notification");

            let record = NotificationRecord::new(request, NotificationStatus::Skipped);
            self.persist(ctx, &record, "create_skipped").await?;
            return Ok(NotificationResponse::from_record(&record, reason));
        }

        let recipient = match validate_channel(request.notification_type, &prefs) {
            Ok(recipient) => recipient,
            Err(reason) => {
                warn!(
                    user_id = %request.user_id,
                    notification_type = %request.notification_type,
                    reason,
                    "Channel validation failed"
                );

                let record = NotificationRecord::new(request, NotificationStatus::Failed)
                    .with_error(reason);
                self.persist(ctx, &record, "create_failed").await?;
                return Ok(NotificationResponse::from_record(&record, reason));
            }
        };

        let language = prefs
            .language
            .as_deref()
            .filter(|language| !language.is_empty())
            .unwrap_or(&self.settings.default_language);

        let rendered = self
            .template_client
            .render_template(ctx, &request.template_code, language, &request.variables)
            .await
            .map_err(|e| {
                error!(
                    template_code = %request.template_code,
                    error = %e,
                    "Failed to render template"
                );
                client_failure(e, PipelineError::Render)
            })?;

        let record = NotificationRecord::new(request, NotificationStatus::Pending);
        self.persist(ctx, &record, "create").await?;

        let payload = build_delivery_payload(&record, recipient, &rendered);

        match self
            .publisher
            .publish(ctx, record.notification_type, record.id, &payload)
            .await
        {
            Ok(()) => {
                info!(
                    notification_id = %record.id,
                    user_id = %record.user_id,
                    priority = %record.priority,
                    "Notification queued for delivery"
                );

                if self.settings.track_last_notification {
                    self.spawn_last_notification_update(&record.user_id);
                }

                Ok(NotificationResponse::from_record(&record, QUEUED_MESSAGE))
            }
            Err(e) => Err(self.handle_publish_failure(&record, &payload, e).await),
        }
    }

    async fn persist(
        &self,
        ctx: &RequestContext,
        record: &NotificationRecord,
        stage: &'static str,
    ) -> Result<(), PipelineError> {
        self.store.create(ctx, record).await.map_err(|e| {
            error!(
                notification_id = %record.id,
                stage,
                error = %e,
                "Failed to persist notification"
            );
            match e {
                StoreError::Interrupted(interrupted) => PipelineError::Interrupted(interrupted),
                source => PipelineError::Persistence {
                    stage,
                    notification_id: Some(record.id),
                    source,
                },
            }
        })
    }

    /// Marks the record failed and dead-letters the payload. Both steps run
    /// under a fresh context and their own failures are only logged.
    async fn handle_publish_failure(
        &self,
        record: &NotificationRecord,
        payload: &DeliveryPayload,
        err: PublishError,
    ) -> PipelineError {
        error!(
            notification_id = %record.id,
            stage = "publish",
            error = %err,
            "Failed to queue notification"
        );

        let compensation = RequestContext::new(self.settings.compensation_timeout);
        let reason = err.to_string();

        if let Err(e) = self
            .store
            .update_status(
                &compensation,
                record.id,
                NotificationStatus::Failed,
                Some(&reason),
            )
            .await
        {
            error!(
                notification_id = %record.id,
                stage = "mark_failed",
                error = %e,
                "Failed to mark notification as failed"
            );
        }

        let dlq_message = DlqMessage::new(
            serde_json::to_value(payload).unwrap_or_default(),
            reason,
            "publish_failure",
            routing_key(record.notification_type),
        )
        .with_retry_count(self.settings.publish_attempts);

        if let Err(e) = self
            .publisher
            .forward_to_dead_letter(&compensation, &dlq_message)
            .await
        {
            warn!(notification_id = %record.id, error = %e, "Dead letter forward failed");
        }

        match err {
            PublishError::Interrupted(interrupted) => PipelineError::Interrupted(interrupted),
            source => PipelineError::Publish {
                notification_id: record.id,
                source,
            },
        }
    }

    fn spawn_last_notification_update(&self, user_id: &str) {
        let user_client = Arc::clone(&self.user_client);
        let user_id = user_id.to_string();
        let timeout = self.settings.tracking_timeout;

        tokio::spawn(async move {
            let ctx = RequestContext::new(timeout);
            match user_client
                .record_notification_sent(&ctx, &user_id, Utc::now())
                .await
            {
                Ok(()) => debug!(user_id = %user_id, "Last notification time updated"),
                Err(e) => warn!(
                    user_id = %user_id,
                    error = %e,
                    "Failed to update last notification time"
                ),
            }
        });
    }

    /// Applies a worker status callback and returns the updated record.
    pub async fn update_notification_status(
        &self,
        ctx: &RequestContext,
        notification_id: Uuid,
        update: &StatusUpdate,
    ) -> Result<NotificationRecord, PipelineError> {
        self.store
            .update_status(ctx, notification_id, update.status, update.error.as_deref())
            .await
            .map_err(|e| store_failure(e, "update_status", Some(notification_id)))?;

        info!(
            notification_id = %notification_id,
            status = %update.status,
            "Notification status updated"
        );

        self.get_notification(ctx, notification_id).await
    }

    pub async fn get_notification(
        &self,
        ctx: &RequestContext,
        notification_id: Uuid,
    ) -> Result<NotificationRecord, PipelineError> {
        self.store
            .get_by_id(ctx, notification_id)
            .await
            .map_err(|e| store_failure(e, "get", Some(notification_id)))
    }

    pub async fn list_user_notifications(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<NotificationRecord>, PipelineError> {
        self.store
            .get_by_user_id(ctx, user_id, limit, offset)
            .await
            .map_err(|e| store_failure(e, "list", None))
    }
}

fn client_failure(
    err: ClientError,
    wrap: impl FnOnce(ClientError) -> PipelineError,
) -> PipelineError {
    match err {
        ClientError::Interrupted(interrupted) => PipelineError::Interrupted(interrupted),
        other => wrap(other),
    }
}

fn store_failure(
    err: StoreError,
    stage: &'static str,
    notification_id: Option<Uuid>,
) -> PipelineError {
    match err {
        StoreError::NotFound(id) => PipelineError::NotFound(id),
        StoreError::Interrupted(interrupted) => PipelineError::Interrupted(interrupted),
        source => PipelineError::Persistence {
            stage,
            notification_id,
            source,
        },
    }
}

/// Checks the channel against the user's preferences and returns the
/// recipient address, or the reason the notification cannot be sent.
pub fn validate_channel(
    notification_type: NotificationType,
    prefs: &UserPreferences,
) -> Result<String, &'static str> {
    match notification_type {
        NotificationType::Email => {
            if !prefs.email_enabled {
                return Err("email notifications disabled");
            }
            if !prefs.email_verified {
                return Err("email address not verified");
            }
            prefs
                .email
                .clone()
                .filter(|email| !email.is_empty())
                .ok_or("no email address registered")
        }
        NotificationType::Push => {
            if !prefs.push_enabled {
                return Err("push notifications disabled");
            }
            prefs
                .device_tokens
                .iter()
                .find(|token| !token.is_empty())
                .cloned()
                .ok_or("no active devices registered")
        }
    }
}

/// The body is the HTML rendering when there is one, with the plain text kept
/// alongside; otherwise it is the text itself.
pub fn build_delivery_payload(
    record: &NotificationRecord,
    recipient: String,
    rendered: &RenderResponse,
) -> DeliveryPayload {
    let content = &rendered.rendered;

    let (body, text_body) = match content.body.html.as_deref() {
        Some(html) if !html.trim().is_empty() => {
            (html.to_string(), Some(content.body.text.clone()))
        }
        _ => (content.body.text.clone(), None),
    };

    DeliveryPayload {
        notification_id: record.id,
        notification_type: record.notification_type,
        user_id: record.user_id.clone(),
        template_code: record.template_code.clone(),
        recipient,
        subject: content.subject.clone(),
        body,
        text_body,
        priority: record.priority.as_str().to_string(),
        metadata: record.metadata.clone(),
        created_at: record.created_at,
    }
}
