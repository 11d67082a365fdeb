//! Webhook endpoint management and delivery audit handlers.
//!
//! Endpoints are soft-deactivated, never hard-deleted, so queued events
//! always keep a valid endpoint reference. The event audit trail and the
//! operator replay action live here as well.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
};
use tracing::warn;

use crate::app::AppState;
use crate::domain::{
    AppError, DatabaseError, PaginatedResponse, PaginationParams, WebhookEndpoint, WebhookEvent,
    types::CreateEndpointRequest,
};

/// Register a webhook endpoint
///
/// The endpoint starts active and immediately participates in fan-out for
/// its subscribed event types. The signing secret is write-only: it is
/// never returned by any handler.
#[utoipa::path(
    post,
    path = "/webhook-endpoints",
    tag = "webhooks",
    request_body = CreateEndpointRequest,
    responses(
        (status = 200, description = "Endpoint registered", body = WebhookEndpoint),
        (status = 400, description = "Validation error", body = crate::domain::ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = crate::domain::RateLimitResponse),
        (status = 500, description = "Internal server error", body = crate::domain::ErrorResponse)
    )
)]
pub async fn create_endpoint_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateEndpointRequest>,
) -> Result<Json<WebhookEndpoint>, AppError> {
    let endpoint = state.service.create_endpoint(&payload).await?;
    Ok(Json(endpoint))
}

/// List webhook endpoints with pagination
#[utoipa::path(
    get,
    path = "/webhook-endpoints",
    tag = "webhooks",
    params(
        ("limit" = Option<i64>, Query, description = "Maximum number of endpoints to return (1-100, default: 20)"),
        ("cursor" = Option<String>, Query, description = "Cursor for pagination (endpoint ID to start after)")
    ),
    responses(
        (status = 200, description = "List of endpoints", body = PaginatedResponse<WebhookEndpoint>),
        (status = 429, description = "Rate limit exceeded", body = crate::domain::RateLimitResponse),
        (status = 500, description = "Internal server error", body = crate::domain::ErrorResponse)
    )
)]
pub async fn list_endpoints_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PaginationParams>,
) -> Result<Json<PaginatedResponse<WebhookEndpoint>>, AppError> {
    let limit = params.limit.clamp(1, 100);
    let endpoints = state
        .service
        .list_endpoints(limit, params.cursor.as_deref())
        .await?;
    Ok(Json(endpoints))
}

/// Deactivate a webhook endpoint (soft)
///
/// Queued events stay durable and queryable; they simply stop being
/// claimed for delivery until the endpoint is reactivated.
#[utoipa::path(
    delete,
    path = "/webhook-endpoints/{id}",
    tag = "webhooks",
    params(
        ("id" = String, Path, description = "Endpoint ID")
    ),
    responses(
        (status = 200, description = "Endpoint deactivated", body = WebhookEndpoint),
        (status = 404, description = "Endpoint not found", body = crate::domain::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::domain::ErrorResponse)
    )
)]
pub async fn deactivate_endpoint_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<WebhookEndpoint>, AppError> {
    state.service.deactivate_endpoint(&id).await?;
    let endpoint = state
        .service
        .get_endpoint(&id)
        .await?
        .ok_or(AppError::Database(DatabaseError::NotFound(id)))?;
    warn!(id = %endpoint.id, "Webhook endpoint deactivated by operator");
    Ok(Json(endpoint))
}

/// Delivery audit trail for an endpoint, newest first
///
/// Terminal events keep their attempts and last response indefinitely to
/// support inspection and manual replay.
#[utoipa::path(
    get,
    path = "/webhook-endpoints/{id}/events",
    tag = "webhooks",
    params(
        ("id" = String, Path, description = "Endpoint ID"),
        ("limit" = Option<i64>, Query, description = "Maximum number of events to return (1-100, default: 20)"),
        ("cursor" = Option<String>, Query, description = "Cursor for pagination (event ID to start after)")
    ),
    responses(
        (status = 200, description = "Event audit trail", body = PaginatedResponse<WebhookEvent>),
        (status = 404, description = "Endpoint not found", body = crate::domain::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::domain::ErrorResponse)
    )
)]
pub async fn list_endpoint_events_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<PaginationParams>,
) -> Result<Json<PaginatedResponse<WebhookEvent>>, AppError> {
    let limit = params.limit.clamp(1, 100);
    let events = state
        .service
        .list_endpoint_events(&id, limit, params.cursor.as_deref())
        .await?;
    Ok(Json(events))
}

/// Replay a terminally failed event
///
/// Operator action only: resets the event to `pending` with zero attempts
/// so it re-enters the dispatcher pipeline. Never triggered automatically.
#[utoipa::path(
    post,
    path = "/webhook-events/{id}/replay",
    tag = "webhooks",
    params(
        ("id" = String, Path, description = "Event ID")
    ),
    responses(
        (status = 200, description = "Event queued for replay", body = WebhookEvent),
        (status = 400, description = "Event is not terminally failed", body = crate::domain::ErrorResponse),
        (status = 404, description = "Event not found", body = crate::domain::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::domain::ErrorResponse)
    )
)]
pub async fn replay_event_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<WebhookEvent>, AppError> {
    let event = state.service.replay_event(&id).await?;
    Ok(Json(event))
}
