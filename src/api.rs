use std::sync::Arc;

use anyhow::{Error, Result};
use axum::{
    Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde::Deserialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::{
    clients::health::HealthChecker,
    context::RequestContext,
    error::{ErrorKind, PipelineError},
    models::{
        notification::{NotificationRequest, StatusUpdate},
        response::ApiResponse,
        status::NotificationStatus,
    },
    pipeline::OrchestrationService,
};

pub struct AppState {
    pub pipeline: Arc<OrchestrationService>,
    pub health_checker: HealthChecker,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(
            "/api/v1/notifications",
            post(create_notification).get(list_notifications),
        )
        .route("/api/v1/notifications/{id}", get(get_notification))
        .route("/api/v1/notifications/{id}/status", post(update_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_api_server(state: Arc<AppState>, port: u16) -> Result<(), Error> {
    let app = router(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!(address = %addr, "API server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received");
    }
}

async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_checker.check_all().await;

    let status_code = if health.status.is_serving() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(health))
}

async fn create_notification(
    State(state): State<Arc<AppState>>,
    Json(request): Json<NotificationRequest>,
) -> Response {
    match state.pipeline.process(&request).await {
        Ok(response) => {
            let status_code = if response.status == NotificationStatus::Pending {
                StatusCode::CREATED
            } else {
                StatusCode::OK
            };
            let message = response
                .message
                .clone()
                .unwrap_or_else(|| response.status.to_string());

            (status_code, Json(ApiResponse::success(response, message))).into_response()
        }
        Err(e) => error_response(e, "Failed to process notification"),
    }
}

async fn get_notification(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Response {
    let ctx = RequestContext::new(state.pipeline.settings().request_timeout);

    match state.pipeline.get_notification(&ctx, id).await {
        Ok(record) => (
            StatusCode::OK,
            Json(ApiResponse::success(record, "Notification retrieved".to_string())),
        )
            .into_response(),
        Err(e) => error_response(e, "Failed to retrieve notification"),
    }
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    user_id: String,
    #[serde(default = "default_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
}

fn default_limit() -> i64 {
    20
}

async fn list_notifications(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Response {
    let ctx = RequestContext::new(state.pipeline.settings().request_timeout);
    let limit = query.limit.clamp(1, 100);

    match state
        .pipeline
        .list_user_notifications(&ctx, &query.user_id, limit, query.offset.max(0))
        .await
    {
        Ok(records) => (
            StatusCode::OK,
            Json(ApiResponse::success(records, "Notifications retrieved".to_string())),
        )
            .into_response(),
        Err(e) => error_response(e, "Failed to list notifications"),
    }
}

async fn update_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(update): Json<StatusUpdate>,
) -> Response {
    let ctx = RequestContext::new(state.pipeline.settings().request_timeout);

    match state
        .pipeline
        .update_notification_status(&ctx, id, &update)
        .await
    {
        Ok(record) => (
            StatusCode::OK,
            Json(ApiResponse::success(record, "Status updated".to_string())),
        )
            .into_response(),
        Err(e) => error_response(e, "Failed to update notification status"),
    }
}

fn error_response(err: PipelineError, message: &str) -> Response {
    let kind = err.kind();
    let status_code = match kind {
        ErrorKind::CircuitOpen | ErrorKind::TooManyRequests => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    (
        status_code,
        Json(ApiResponse::<()>::error(
            kind,
            err.to_string(),
            message.to_string(),
        )),
    )
        .into_response()
}
