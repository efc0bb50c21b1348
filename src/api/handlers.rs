use crate::api::AppState;
use crate::error::{AppError, Result};
use crate::messaging::gather_metrics;
use crate::models::NotificationMessage;
use crate::notifications::{DrainReport, DrainState};
use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(2);

/// Health check endpoint
///
/// Healthy when the queue is reachable; an idle lazy connection is checked by
/// declaring the queue.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let queue_reachable = if state.client.is_connected().await {
        true
    } else {
        matches!(
            tokio::time::timeout(
                HEALTH_CHECK_TIMEOUT,
                state.client.ensure_queue(state.producer.queue_name()),
            )
            .await,
            Ok(Ok(_))
        )
    };

    let status = if queue_reachable {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let body = HealthResponse {
        status: if queue_reachable { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        backend: state.client.backend().to_string(),
        queue: state.producer.queue_name().to_string(),
        queue_reachable,
        drain_state: state.drainer.as_ref().map(|d| d.state()),
    };

    (status, Json(body))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub backend: String,
    pub queue: String,
    pub queue_reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drain_state: Option<DrainState>,
}

/// Prometheus text exposition
pub async fn metrics() -> String {
    gather_metrics()
}

#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    pub subject: String,
    pub recipient: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct EnqueueResponse {
    pub queue: String,
    pub status: String,
}

/// Place one notification on the queue
pub async fn enqueue_notification(
    State(state): State<AppState>,
    Json(request): Json<EnqueueRequest>,
) -> Result<(StatusCode, Json<EnqueueResponse>)> {
    let message = NotificationMessage::new(request.subject, request.recipient, request.content)?;
    state.producer.enqueue_message(&message).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueueResponse {
            queue: state.producer.queue_name().to_string(),
            status: "queued".to_string(),
        }),
    ))
}

/// Run one drain immediately
pub async fn trigger_drain(State(state): State<AppState>) -> Result<Json<DrainReport>> {
    let drainer = state
        .drainer
        .as_ref()
        .ok_or_else(|| AppError::Unavailable("drainer is not enabled".to_string()))?;

    Ok(Json(drainer.drain().await?))
}
