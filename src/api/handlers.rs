//! HTTP request handlers with OpenAPI documentation.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::error;
use utoipa::OpenApi;

use crate::app::AppState;
use crate::domain::{
    AppError, DatabaseError, ErrorDetail, ErrorResponse, ExternalServiceError, HealthResponse,
    HealthStatus, Invoice, PaginatedResponse, PaginationParams, Payment, RateLimitResponse,
    Refund, TransitionError,
    types::{
        CreateInvoiceRequest, CreatePaymentRequest, CreateRefundRequest, MarkInvoicePaidRequest,
        TransitionInvoiceRequest, TransitionPaymentRequest, TransitionRefundRequest,
    },
};

/// OpenAPI documentation structure
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Merchant Payment Gateway API",
        version = "0.1.0",
        description = "Payment lifecycle management with signed webhook delivery",
        contact(
            name = "API Support",
            email = "support@example.com"
        ),
        license(
            name = "MIT"
        )
    ),
    paths(
        create_payment_handler,
        list_payments_handler,
        get_payment_handler,
        transition_payment_handler,
        create_refund_handler,
        get_refund_handler,
        transition_refund_handler,
        create_invoice_handler,
        list_invoices_handler,
        get_invoice_handler,
        transition_invoice_handler,
        mark_invoice_paid_handler,
        health_check_handler,
        liveness_handler,
        readiness_handler,
        crate::api::webhooks::create_endpoint_handler,
        crate::api::webhooks::list_endpoints_handler,
        crate::api::webhooks::deactivate_endpoint_handler,
        crate::api::webhooks::list_endpoint_events_handler,
        crate::api::webhooks::replay_event_handler,
    ),
    components(
        schemas(
            Payment,
            Invoice,
            Refund,
            crate::domain::PaymentStatus,
            crate::domain::InvoiceStatus,
            crate::domain::RefundStatus,
            crate::domain::DeliveryStatus,
            crate::domain::EventType,
            crate::domain::WebhookEndpoint,
            crate::domain::WebhookEvent,
            CreatePaymentRequest,
            TransitionPaymentRequest,
            CreateInvoiceRequest,
            TransitionInvoiceRequest,
            MarkInvoicePaidRequest,
            CreateRefundRequest,
            TransitionRefundRequest,
            crate::domain::types::CreateEndpointRequest,
            PaginationParams,
            PaginatedResponse<Payment>,
            HealthResponse,
            HealthStatus,
            ErrorResponse,
            ErrorDetail,
            RateLimitResponse,
        )
    ),
    tags(
        (name = "payments", description = "Payment lifecycle endpoints"),
        (name = "invoices", description = "Invoice management endpoints"),
        (name = "refunds", description = "Refund lifecycle endpoints"),
        (name = "webhooks", description = "Webhook endpoint management and event audit"),
        (name = "health", description = "Health check endpoints")
    )
)]
pub struct ApiDoc;

/// Create a new payment
///
/// The payment starts in `created`; `payment.created` events are queued for
/// every active endpoint subscribed to that type before this call returns.
/// Status then only moves forward along the transition graph via
/// `POST /payments/{id}/transition`.
#[utoipa::path(
    post,
    path = "/payments",
    tag = "payments",
    request_body = CreatePaymentRequest,
    responses(
        (status = 200, description = "Payment created", body = Payment),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = RateLimitResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn create_payment_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreatePaymentRequest>,
) -> Result<Json<Payment>, AppError> {
    let payment = state.service.create_payment(&payload).await?;
    Ok(Json(payment))
}

/// List payments with pagination
#[utoipa::path(
    get,
    path = "/payments",
    tag = "payments",
    params(
        ("limit" = Option<i64>, Query, description = "Maximum number of payments to return (1-100, default: 20)"),
        ("cursor" = Option<String>, Query, description = "Cursor for pagination (payment ID to start after)")
    ),
    responses(
        (status = 200, description = "List of payments", body = PaginatedResponse<Payment>),
        (status = 400, description = "Invalid pagination parameters", body = ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = RateLimitResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn list_payments_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PaginationParams>,
) -> Result<Json<PaginatedResponse<Payment>>, AppError> {
    let limit = params.limit.clamp(1, 100);
    let payments = state
        .service
        .list_payments(limit, params.cursor.as_deref())
        .await?;
    Ok(Json(payments))
}

/// Get a single payment by ID
#[utoipa::path(
    get,
    path = "/payments/{id}",
    tag = "payments",
    params(
        ("id" = String, Path, description = "Payment ID")
    ),
    responses(
        (status = 200, description = "Payment found", body = Payment),
        (status = 404, description = "Payment not found", body = ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = RateLimitResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn get_payment_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Payment>, AppError> {
    let payment = state
        .service
        .get_payment(&id)
        .await?
        .ok_or(AppError::Database(DatabaseError::NotFound(id)))?;
    Ok(Json(payment))
}

/// Apply a lifecycle transition to a payment
///
/// Rejected with `409` when the edge is not in the allowed graph or the
/// caller's `expected_version` is stale. On success the new status and the
/// webhook fan-out have been committed together.
#[utoipa::path(
    post,
    path = "/payments/{id}/transition",
    tag = "payments",
    params(
        ("id" = String, Path, description = "Payment ID")
    ),
    request_body = TransitionPaymentRequest,
    responses(
        (status = 200, description = "Transition applied", body = Payment),
        (status = 404, description = "Payment not found", body = ErrorResponse),
        (status = 409, description = "Invalid transition or version conflict", body = ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = RateLimitResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn transition_payment_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<TransitionPaymentRequest>,
) -> Result<Json<Payment>, AppError> {
    let payment = state.service.transition_payment(&id, &payload).await?;
    Ok(Json(payment))
}

/// Create a refund for a confirmed payment
#[utoipa::path(
    post,
    path = "/payments/{id}/refunds",
    tag = "refunds",
    params(
        ("id" = String, Path, description = "Payment ID")
    ),
    request_body = CreateRefundRequest,
    responses(
        (status = 200, description = "Refund created", body = Refund),
        (status = 400, description = "Validation error or refund exceeds payment", body = ErrorResponse),
        (status = 404, description = "Payment not found", body = ErrorResponse),
        (status = 409, description = "Payment already has a completed refund", body = ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = RateLimitResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn create_refund_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<CreateRefundRequest>,
) -> Result<Json<Refund>, AppError> {
    let refund = state.service.create_refund(&id, &payload).await?;
    Ok(Json(refund))
}

/// Get a single refund by ID
#[utoipa::path(
    get,
    path = "/refunds/{id}",
    tag = "refunds",
    params(
        ("id" = String, Path, description = "Refund ID")
    ),
    responses(
        (status = 200, description = "Refund found", body = Refund),
        (status = 404, description = "Refund not found", body = ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = RateLimitResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn get_refund_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Refund>, AppError> {
    let refund = state
        .service
        .get_refund(&id)
        .await?
        .ok_or(AppError::Database(DatabaseError::NotFound(id)))?;
    Ok(Json(refund))
}

/// Apply a lifecycle transition to a refund
///
/// Completing a refund also moves the linked payment to `refunded` and
/// queues `payment.refunded` events.
#[utoipa::path(
    post,
    path = "/refunds/{id}/transition",
    tag = "refunds",
    params(
        ("id" = String, Path, description = "Refund ID")
    ),
    request_body = TransitionRefundRequest,
    responses(
        (status = 200, description = "Transition applied", body = Refund),
        (status = 404, description = "Refund not found", body = ErrorResponse),
        (status = 409, description = "Invalid transition", body = ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = RateLimitResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn transition_refund_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<TransitionRefundRequest>,
) -> Result<Json<Refund>, AppError> {
    let refund = state.service.transition_refund(&id, &payload).await?;
    Ok(Json(refund))
}

/// Create a new invoice
#[utoipa::path(
    post,
    path = "/invoices",
    tag = "invoices",
    request_body = CreateInvoiceRequest,
    responses(
        (status = 200, description = "Invoice created", body = Invoice),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 409, description = "Duplicate invoice number", body = ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = RateLimitResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn create_invoice_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateInvoiceRequest>,
) -> Result<Json<Invoice>, AppError> {
    let invoice = state.service.create_invoice(&payload).await?;
    Ok(Json(invoice))
}

/// List invoices with pagination
#[utoipa::path(
    get,
    path = "/invoices",
    tag = "invoices",
    params(
        ("limit" = Option<i64>, Query, description = "Maximum number of invoices to return (1-100, default: 20)"),
        ("cursor" = Option<String>, Query, description = "Cursor for pagination (invoice ID to start after)")
    ),
    responses(
        (status = 200, description = "List of invoices", body = PaginatedResponse<Invoice>),
        (status = 400, description = "Invalid pagination parameters", body = ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = RateLimitResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn list_invoices_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PaginationParams>,
) -> Result<Json<PaginatedResponse<Invoice>>, AppError> {
    let limit = params.limit.clamp(1, 100);
    let invoices = state
        .service
        .list_invoices(limit, params.cursor.as_deref())
        .await?;
    Ok(Json(invoices))
}

/// Get a single invoice by ID
#[utoipa::path(
    get,
    path = "/invoices/{id}",
    tag = "invoices",
    params(
        ("id" = String, Path, description = "Invoice ID")
    ),
    responses(
        (status = 200, description = "Invoice found", body = Invoice),
        (status = 404, description = "Invoice not found", body = ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = RateLimitResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn get_invoice_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Invoice>, AppError> {
    let invoice = state
        .service
        .get_invoice(&id)
        .await?
        .ok_or(AppError::Database(DatabaseError::NotFound(id)))?;
    Ok(Json(invoice))
}

/// Apply a non-paid transition to an invoice (sent, overdue, cancelled)
#[utoipa::path(
    post,
    path = "/invoices/{id}/transition",
    tag = "invoices",
    params(
        ("id" = String, Path, description = "Invoice ID")
    ),
    request_body = TransitionInvoiceRequest,
    responses(
        (status = 200, description = "Transition applied", body = Invoice),
        (status = 400, description = "Paid target must use mark-paid", body = ErrorResponse),
        (status = 404, description = "Invoice not found", body = ErrorResponse),
        (status = 409, description = "Invalid transition", body = ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = RateLimitResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn transition_invoice_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<TransitionInvoiceRequest>,
) -> Result<Json<Invoice>, AppError> {
    let invoice = state.service.transition_invoice(&id, &payload).await?;
    Ok(Json(invoice))
}

/// Mark an invoice as paid
///
/// Requires either a linked confirmed payment or, with no payment id at
/// all, an explicit manual mark-paid. Queues `invoice.paid` events.
#[utoipa::path(
    post,
    path = "/invoices/{id}/mark-paid",
    tag = "invoices",
    params(
        ("id" = String, Path, description = "Invoice ID")
    ),
    request_body = MarkInvoicePaidRequest,
    responses(
        (status = 200, description = "Invoice marked paid", body = Invoice),
        (status = 400, description = "Linked payment is not confirmed", body = ErrorResponse),
        (status = 404, description = "Invoice not found", body = ErrorResponse),
        (status = 409, description = "Invoice is already terminal", body = ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = RateLimitResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn mark_invoice_paid_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<MarkInvoicePaidRequest>,
) -> Result<Json<Invoice>, AppError> {
    let invoice = state.service.mark_invoice_paid(&id, &payload).await?;
    Ok(Json(invoice))
}

/// Detailed health check
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Health status", body = HealthResponse)
    )
)]
pub async fn health_check_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let health = state.service.health_check().await;
    Json(health)
}

/// Kubernetes liveness probe
#[utoipa::path(
    get,
    path = "/health/live",
    tag = "health",
    responses(
        (status = 200, description = "Application is alive")
    )
)]
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Kubernetes readiness probe
#[utoipa::path(
    get,
    path = "/health/ready",
    tag = "health",
    responses(
        (status = 200, description = "Application is ready to serve traffic"),
        (status = 503, description = "Application is not ready")
    )
)]
pub async fn readiness_handler(State(state): State<Arc<AppState>>) -> StatusCode {
    let health = state.service.health_check().await;
    match health.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, error_type, message) = match &self {
            AppError::Database(db_err) => match db_err {
                DatabaseError::Connection(_) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "database_error",
                    self.to_string(),
                ),
                DatabaseError::NotFound(_) => {
                    (StatusCode::NOT_FOUND, "not_found", self.to_string())
                }
                DatabaseError::Duplicate(_) => {
                    (StatusCode::CONFLICT, "duplicate", self.to_string())
                }
                _ => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "database_error",
                    self.to_string(),
                ),
            },
            AppError::Transition(tr_err) => match tr_err {
                TransitionError::RefundExceedsPayment { .. } => (
                    StatusCode::BAD_REQUEST,
                    "refund_exceeds_payment",
                    self.to_string(),
                ),
                TransitionError::ConcurrentModification { .. } => (
                    StatusCode::CONFLICT,
                    "concurrent_modification",
                    self.to_string(),
                ),
                TransitionError::RefundAlreadyCompleted(_) => (
                    StatusCode::CONFLICT,
                    "refund_already_completed",
                    self.to_string(),
                ),
                _ => (
                    StatusCode::CONFLICT,
                    "invalid_transition",
                    self.to_string(),
                ),
            },
            AppError::ExternalService(ext_err) => match ext_err {
                ExternalServiceError::Timeout(_) => {
                    (StatusCode::GATEWAY_TIMEOUT, "timeout", self.to_string())
                }
                _ => (
                    StatusCode::BAD_GATEWAY,
                    "external_service_error",
                    self.to_string(),
                ),
            },
            AppError::Config(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "configuration_error",
                self.to_string(),
            ),
            AppError::Validation(_) => (
                StatusCode::BAD_REQUEST,
                "validation_error",
                self.to_string(),
            ),
            AppError::Serialization(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "serialization_error",
                self.to_string(),
            ),
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                self.to_string(),
            ),
            AppError::NotSupported(_) => (
                StatusCode::NOT_IMPLEMENTED,
                "not_supported",
                self.to_string(),
            ),
            AppError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                "Rate limit exceeded".to_string(),
            ),
        };

        if status.is_server_error() {
            error!(error_type = %error_type, message = %message, "Server error");
        }

        let body = Json(ErrorResponse {
            error: ErrorDetail {
                r#type: error_type.to_string(),
                message,
            },
        });

        (status, body).into_response()
    }
}
