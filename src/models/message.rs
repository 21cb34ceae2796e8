use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::models::notification::NotificationType;

/// Message handed to the delivery queue for a channel worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryPayload {
    pub notification_id: Uuid,
    pub notification_type: NotificationType,
    pub user_id: String,
    pub template_code: String,
    pub recipient: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,

    pub body: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_body: Option<String>,

    pub priority: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, JsonValue>>,

    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DlqMessage {
    pub original_message: JsonValue,
    pub error: String,
    pub error_type: String,
    pub failed_at: DateTime<Utc>,
    pub retry_count: u32,
    pub source_topic: String,
}

impl DlqMessage {
    pub fn new(
        original_message: JsonValue,
        error: impl Into<String>,
        error_type: impl Into<String>,
        source_topic: impl Into<String>,
    ) -> Self {
        Self {
            original_message,
            error: error.into(),
            error_type: error_type.into(),
            failed_at: Utc::now(),
            retry_count: 0,
            source_topic: source_topic.into(),
        }
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }
}
