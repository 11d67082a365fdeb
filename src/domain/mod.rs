//! Domain layer containing core business types, traits, and error definitions.

pub mod error;
pub mod traits;
pub mod types;

pub use error::{
    AppError, ConfigError, DatabaseError, ExternalServiceError, TransitionError, ValidationError,
};
pub use traits::{
    InvoiceRepository, PaymentRepository, ProofRecorder, RefundRepository,
    WebhookEndpointRepository, WebhookEventRepository,
};
pub use types::{
    AttemptDisposition, AttemptOutcome, DeliveryStatus, ErrorDetail, ErrorResponse, EventType,
    HealthResponse, HealthStatus, Invoice, InvoiceStatus, NewWebhookEvent, PaginatedResponse,
    PaginationParams, Payment, PaymentStatus, RateLimitResponse, Refund, RefundStatus, RetryPolicy,
    WebhookEndpoint, WebhookEnvelope, WebhookEvent,
};
