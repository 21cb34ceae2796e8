use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use notification_orchestrator::{
    clients::{
        database::NotificationStore,
        mock::{MockTemplateClient, MockUserClient},
        rbmq::MessagePublisher,
        redis::{CacheBackend, IdempotencyCache},
    },
    context::RequestContext,
    error::{CacheError, PublishError, StoreError},
    models::{
        message::{DeliveryPayload, DlqMessage},
        notification::{NotificationRecord, NotificationRequest, NotificationType},
        retry::RetryConfig,
        status::NotificationStatus,
    },
    pipeline::{OrchestrationService, PipelineSettings},
};
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Default)]
pub struct MemoryCache {
    pub entries: Mutex<HashMap<String, String>>,
    pub gets: AtomicU32,
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn set_ex(&self, key: &str, value: &str, _ttl: Duration) -> Result<(), CacheError> {
        self.entries
            .lock()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

/// Cache whose every call fails, as if Redis were down.
pub struct FailingCache;

#[async_trait]
impl CacheBackend for FailingCache {
    async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn set_ex(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }
}

#[derive(Default)]
pub struct MemoryStore {
    pub records: Mutex<HashMap<Uuid, NotificationRecord>>,
    pub fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn get(&self, id: Uuid) -> Option<NotificationRecord> {
        self.records.lock().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn create(
        &self,
        _ctx: &RequestContext,
        record: &NotificationRecord,
    ) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("database is down".to_string()));
        }
        self.records.lock().insert(record.id, record.clone());
        Ok(())
    }

    async fn get_by_id(
        &self,
        _ctx: &RequestContext,
        id: Uuid,
    ) -> Result<NotificationRecord, StoreError> {
        self.get(id).ok_or(StoreError::NotFound(id))
    }

    async fn update_status(
        &self,
        _ctx: &RequestContext,
        id: Uuid,
        status: NotificationStatus,
        error_message: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut records = self.records.lock();
        let record = records.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        record.status = status;
        record.error_message = error_message.map(str::to_string);
        record.updated_at = chrono::Utc::now();
        Ok(())
    }

    async fn get_by_user_id(
        &self,
        _ctx: &RequestContext,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<NotificationRecord>, StoreError> {
        let mut records: Vec<_> = self
            .records
            .lock()
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(records
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingPublisher {
    pub published: Mutex<Vec<(NotificationType, Uuid, DeliveryPayload)>>,
    pub dead_letters: Mutex<Vec<DlqMessage>>,
    pub fail: AtomicBool,
}

impl RecordingPublisher {
    pub fn published_count(&self) -> usize {
        self.published.lock().len()
    }
}

#[async_trait]
impl MessagePublisher for RecordingPublisher {
    async fn publish(
        &self,
        _ctx: &RequestContext,
        notification_type: NotificationType,
        notification_id: Uuid,
        payload: &DeliveryPayload,
    ) -> Result<(), PublishError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PublishError::Unavailable("broker unreachable".to_string()));
        }
        self.published
            .lock()
            .push((notification_type, notification_id, payload.clone()));
        Ok(())
    }

    async fn forward_to_dead_letter(
        &self,
        _ctx: &RequestContext,
        message: &DlqMessage,
    ) -> Result<(), PublishError> {
        self.dead_letters.lock().push(message.clone());
        Ok(())
    }

    async fn health_check(&self) -> Result<(), PublishError> {
        Ok(())
    }
}

pub struct Harness {
    pub pipeline: Arc<OrchestrationService>,
    pub users: Arc<MockUserClient>,
    pub templates: Arc<MockTemplateClient>,
    pub store: Arc<MemoryStore>,
    pub publisher: Arc<RecordingPublisher>,
    pub cache: Arc<MemoryCache>,
}

impl Harness {
    pub fn new() -> Self {
        let users = Arc::new(MockUserClient::new());
        let templates = Arc::new(MockTemplateClient::new());
        let store = Arc::new(MemoryStore::default());
        let publisher = Arc::new(RecordingPublisher::default());
        let cache = Arc::new(MemoryCache::default());

        let pipeline = Arc::new(OrchestrationService::new(
            users.clone(),
            templates.clone(),
            store.clone(),
            publisher.clone(),
            IdempotencyCache::new(cache.clone(), Duration::from_secs(60)),
            PipelineSettings {
                request_timeout: Duration::from_secs(2),
                track_last_notification: false,
                ..PipelineSettings::default()
            },
        ));

        Self {
            pipeline,
            users,
            templates,
            store,
            publisher,
            cache,
        }
    }
}

pub fn notification_request(
    user_id: &str,
    notification_type: NotificationType,
    template_code: &str,
    variables: &[(&str, JsonValue)],
) -> NotificationRequest {
    NotificationRequest {
        request_id: format!("req_{}", Uuid::new_v4()),
        notification_type,
        user_id: user_id.to_string(),
        template_code: template_code.to_string(),
        variables: variables
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect(),
        priority: 2,
        metadata: None,
        idempotency_key: None,
        scheduled_for: None,
    }
}

pub fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        initial_delay_ms: 10,
        max_delay_ms: 50,
        backoff_multiplier: 2.0,
        jitter: false,
    }
}
