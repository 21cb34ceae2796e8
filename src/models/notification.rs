use std::{collections::HashMap, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::models::status::{NotificationStatus, Priority};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    Email,
    Push,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::Email => "email",
            NotificationType::Push => "push",
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(NotificationType::Email),
            "push" => Ok(NotificationType::Push),
            other => Err(format!("unknown notification type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub request_id: String,
    pub notification_type: NotificationType,
    pub user_id: String,
    pub template_code: String,

    #[serde(default)]
    pub variables: HashMap<String, JsonValue>,

    #[serde(default)]
    pub priority: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, JsonValue>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_for: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationResponse {
    pub notification_id: Uuid,
    pub status: NotificationStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl NotificationResponse {
    pub fn from_record(record: &NotificationRecord, message: impl Into<String>) -> Self {
        Self {
            notification_id: record.id,
            status: record.status,
            message: Some(message.into()),
            error: record.error_message.clone(),
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: Uuid,
    pub user_id: String,
    pub template_code: String,
    pub notification_type: NotificationType,
    pub status: NotificationStatus,
    pub priority: Priority,
    pub variables: HashMap<String, JsonValue>,
    pub metadata: Option<HashMap<String, JsonValue>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub scheduled_for: Option<DateTime<Utc>>,
}

impl NotificationRecord {
    pub fn new(request: &NotificationRequest, status: NotificationStatus) -> Self {
        let now = Utc::now();

        Self {
            id: Uuid::new_v4(),
            user_id: request.user_id.clone(),
            template_code: request.template_code.clone(),
            notification_type: request.notification_type,
            status,
            priority: Priority::from_level(request.priority),
            variables: request.variables.clone(),
            metadata: request.metadata.clone(),
            error_message: None,
            created_at: now,
            updated_at: now,
            scheduled_for: request.scheduled_for,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error_message = Some(error.into());
        self
    }
}

/// Status callback reported by channel workers.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusUpdate {
    pub status: NotificationStatus,

    #[serde(default)]
    pub error: Option<String>,
}
