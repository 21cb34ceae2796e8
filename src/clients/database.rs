use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::{
    context::RequestContext,
    error::StoreError,
    models::{notification::NotificationRecord, status::NotificationStatus},
};

const SCHEMA: &str = include_str!("../../migrations/0001_create_notifications.sql");

const SELECT_COLUMNS: &str = "id, user_id, template_code, notification_type, status, priority, \
     variables, metadata, error_message, created_at, updated_at, scheduled_for";

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn create(
        &self,
        ctx: &RequestContext,
        record: &NotificationRecord,
    ) -> Result<(), StoreError>;

    async fn get_by_id(
        &self,
        ctx: &RequestContext,
        id: Uuid,
    ) -> Result<NotificationRecord, StoreError>;

    /// Touches only `status`, `error_message` and `updated_at`.
    async fn update_status(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        status: NotificationStatus,
        error_message: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn get_by_user_id(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<NotificationRecord>, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

pub struct PostgresStore {
    client: Client,
}

impl PostgresStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        info!("Connecting to PostgreSQL database");

        let (client, connection) = tokio_postgres::connect(database_url, NoTls).await?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "PostgreSQL connection closed with error");
            }
        });

        client.batch_execute(SCHEMA).await?;

        info!("PostgreSQL connection established");

        Ok(Self { client })
    }
}

#[async_trait]
impl NotificationStore for PostgresStore {
    async fn create(
        &self,
        ctx: &RequestContext,
        record: &NotificationRecord,
    ) -> Result<(), StoreError> {
        let variables = serde_json::to_value(&record.variables)?;
        let metadata = record
            .metadata
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        ctx.guard(self.client.execute(
            r#"
            INSERT INTO notifications (
                id, user_id, template_code, notification_type, status, priority,
                variables, metadata, error_message, created_at, updated_at, scheduled_for
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
            &[
                &record.id,
                &record.user_id,
                &record.template_code,
                &record.notification_type.as_str(),
                &record.status.as_str(),
                &record.priority.as_str(),
                &variables,
                &metadata,
                &record.error_message,
                &record.created_at,
                &record.updated_at,
                &record.scheduled_for,
            ],
        ))
        .await??;

        debug!(
            notification_id = %record.id,
            status = %record.status,
            "Notification record created"
        );

        Ok(())
    }

    async fn get_by_id(
        &self,
        ctx: &RequestContext,
        id: Uuid,
    ) -> Result<NotificationRecord, StoreError> {
        let query = format!("SELECT {} FROM notifications WHERE id = $1", SELECT_COLUMNS);

        let row = ctx
            .guard(self.client.query_opt(query.as_str(), &[&id]))
            .await??
            .ok_or(StoreError::NotFound(id))?;

        record_from_row(&row)
    }

    async fn update_status(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        status: NotificationStatus,
        error_message: Option<&str>,
    ) -> Result<(), StoreError> {
        let updated = ctx
            .guard(self.client.execute(
                "UPDATE notifications SET status = $1, error_message = $2, updated_at = $3 WHERE id = $4",
                &[&status.as_str(), &error_message, &Utc::now(), &id],
            ))
            .await??;

        if updated == 0 {
            return Err(StoreError::NotFound(id));
        }

        debug!(notification_id = %id, status = %status, "Notification status updated");
        Ok(())
    }

    async fn get_by_user_id(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<NotificationRecord>, StoreError> {
        let query = format!(
            "SELECT {} FROM notifications WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3",
            SELECT_COLUMNS
        );

        let rows = ctx
            .guard(self.client.query(query.as_str(), &[&user_id, &limit, &offset]))
            .await??;

        rows.iter().map(record_from_row).collect()
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        if self.client.is_closed() {
            return Err(StoreError::Unavailable("connection closed".to_string()));
        }
        self.client.simple_query("SELECT 1").await?;
        Ok(())
    }
}

fn record_from_row(row: &Row) -> Result<NotificationRecord, StoreError> {
    let notification_type: String = row.try_get("notification_type")?;
    let status: String = row.try_get("status")?;
    let priority: String = row.try_get("priority")?;
    let variables: JsonValue = row.try_get("variables")?;
    let metadata: Option<JsonValue> = row.try_get("metadata")?;

    Ok(NotificationRecord {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        template_code: row.try_get("template_code")?,
        notification_type: notification_type.parse().map_err(StoreError::InvalidRow)?,
        status: status.parse().map_err(StoreError::InvalidRow)?,
        priority: priority.parse().map_err(StoreError::InvalidRow)?,
        variables: serde_json::from_value::<HashMap<String, JsonValue>>(variables)?,
        metadata: metadata.map(serde_json::from_value).transpose()?,
        error_message: row.try_get("error_message")?,
        created_at: row.try_get::<_, DateTime<Utc>>("created_at")?,
        updated_at: row.try_get::<_, DateTime<Utc>>("updated_at")?,
        scheduled_for: row.try_get("scheduled_for")?,
    })
}
