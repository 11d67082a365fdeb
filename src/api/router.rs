//! Router construction and per-IP rate limiting.

use std::env;
use std::num::NonZeroU32;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use governor::{
    Quota, RateLimiter,
    clock::{Clock, DefaultClock},
    state::keyed::DefaultKeyedStateStore,
};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::app::AppState;
use crate::domain::{ErrorDetail, RateLimitResponse};

use super::handlers::{
    ApiDoc, create_invoice_handler, create_payment_handler, create_refund_handler,
    get_invoice_handler, get_payment_handler, get_refund_handler, health_check_handler,
    list_invoices_handler, list_payments_handler, liveness_handler, mark_invoice_paid_handler,
    readiness_handler, transition_invoice_handler, transition_payment_handler,
    transition_refund_handler,
};
use super::webhooks::{
    create_endpoint_handler, deactivate_endpoint_handler, list_endpoint_events_handler,
    list_endpoints_handler, replay_event_handler,
};

/// Rate limiting configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            burst_size: 10,
        }
    }
}

impl RateLimitConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            requests_per_minute: env::var("RATE_LIMIT_REQUESTS_PER_MINUTE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.requests_per_minute),
            burst_size: env::var("RATE_LIMIT_BURST_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.burst_size),
        }
    }
}

type KeyedLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

struct RateLimitState {
    limiter: KeyedLimiter,
    clock: DefaultClock,
}

/// Per-client limiter keyed by forwarded IP; clients behind the same proxy
/// hop with no forwarding header share the fallback bucket.
async fn rate_limit_middleware(
    State(state): State<Arc<RateLimitState>>,
    request: Request,
    next: Next,
) -> Response {
    let key = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    match state.limiter.check_key(&key) {
        Ok(()) => next.run(request).await,
        Err(not_until) => {
            let retry_after = not_until.wait_time_from(state.clock.now()).as_secs().max(1);
            let body = Json(RateLimitResponse {
                error: ErrorDetail {
                    r#type: "rate_limited".to_string(),
                    message: "Rate limit exceeded".to_string(),
                },
                retry_after,
            });
            (StatusCode::TOO_MANY_REQUESTS, body).into_response()
        }
    }
}

/// Create the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    base_router().with_state(state)
}

/// Create the application router with per-IP rate limiting enabled
pub fn create_router_with_rate_limit(state: Arc<AppState>, config: RateLimitConfig) -> Router {
    let quota = Quota::per_minute(
        NonZeroU32::new(config.requests_per_minute).unwrap_or(NonZeroU32::new(60).unwrap()),
    )
    .allow_burst(NonZeroU32::new(config.burst_size).unwrap_or(NonZeroU32::new(10).unwrap()));
    let rate_state = Arc::new(RateLimitState {
        limiter: RateLimiter::keyed(quota),
        clock: DefaultClock::default(),
    });

    base_router()
        .layer(middleware::from_fn_with_state(
            rate_state,
            rate_limit_middleware,
        ))
        .with_state(state)
}

fn base_router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/payments",
            post(create_payment_handler).get(list_payments_handler),
        )
        .route("/payments/{id}", get(get_payment_handler))
        .route("/payments/{id}/transition", post(transition_payment_handler))
        .route("/payments/{id}/refunds", post(create_refund_handler))
        .route("/refunds/{id}", get(get_refund_handler))
        .route("/refunds/{id}/transition", post(transition_refund_handler))
        .route(
            "/invoices",
            post(create_invoice_handler).get(list_invoices_handler),
        )
        .route("/invoices/{id}", get(get_invoice_handler))
        .route("/invoices/{id}/transition", post(transition_invoice_handler))
        .route("/invoices/{id}/mark-paid", post(mark_invoice_paid_handler))
        .route(
            "/webhook-endpoints",
            post(create_endpoint_handler).get(list_endpoints_handler),
        )
        .route("/webhook-endpoints/{id}", delete(deactivate_endpoint_handler))
        .route(
            "/webhook-endpoints/{id}/events",
            get(list_endpoint_events_handler),
        )
        .route("/webhook-events/{id}/replay", post(replay_event_handler))
        .route("/health", get(health_check_handler))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
}
