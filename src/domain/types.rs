//! Domain types with validation support.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

/// Lifecycle status of a payment
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Initial state, payment record exists but nothing observed yet
    #[default]
    Created,
    /// Settlement in progress, awaiting on-chain finality
    Pending,
    /// Settlement finalized, terminal except for a later refund
    Confirmed,
    /// Settlement failed, terminal
    Failed,
    /// Confirmed payment that was refunded, terminal
    Refunded,
    /// Expired before settlement, terminal
    Expired,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
            Self::Expired => "expired",
        }
    }

    /// Whether the allowed transition graph contains the edge `self -> target`.
    pub fn can_transition_to(&self, target: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, target),
            (Created, Pending)
                | (Pending, Confirmed)
                | (Created, Failed)
                | (Pending, Failed)
                | (Confirmed, Refunded)
                | (Created, Expired)
                | (Pending, Expired)
        )
    }

    /// Terminal states admit no outgoing edges at all.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Refunded | Self::Expired)
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "failed" => Ok(Self::Failed),
            "refunded" => Ok(Self::Refunded),
            "expired" => Ok(Self::Expired),
            _ => Err(format!("Invalid payment status: {}", s)),
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle status of an invoice
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    /// Not yet issued to the customer
    #[default]
    Draft,
    /// Issued and awaiting payment
    Sent,
    /// Settled, terminal
    Paid,
    /// Past due date, still payable
    Overdue,
    /// Withdrawn, terminal
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Sent => "sent",
            Self::Paid => "paid",
            Self::Overdue => "overdue",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn can_transition_to(&self, target: InvoiceStatus) -> bool {
        use InvoiceStatus::*;
        matches!(
            (self, target),
            (Draft, Sent)
                | (Sent, Overdue)
                | (Sent, Paid)
                | (Overdue, Paid)
                | (Draft, Cancelled)
                | (Sent, Cancelled)
                | (Overdue, Cancelled)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Paid | Self::Cancelled)
    }
}

impl std::str::FromStr for InvoiceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "sent" => Ok(Self::Sent),
            "paid" => Ok(Self::Paid),
            "overdue" => Ok(Self::Overdue),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid invoice status: {}", s)),
        }
    }
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle status of a refund
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    /// Requested, not yet picked up
    #[default]
    Pending,
    /// Being executed
    Processing,
    /// Funds returned, terminal
    Completed,
    /// Execution failed, terminal
    Failed,
}

impl RefundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn can_transition_to(&self, target: RefundStatus) -> bool {
        use RefundStatus::*;
        matches!(
            (self, target),
            (Pending, Processing)
                | (Processing, Completed)
                | (Pending, Failed)
                | (Processing, Failed)
        )
    }
}

impl std::str::FromStr for RefundStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid refund status: {}", s)),
        }
    }
}

impl std::fmt::Display for RefundStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Delivery status of a webhook event
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Not yet delivered
    #[default]
    Pending,
    /// Accepted by the receiver with a 2xx, terminal
    Delivered,
    /// Last attempt failed; terminal once the retry budget is exhausted
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "delivered" => Ok(Self::Delivered),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid delivery status: {}", s)),
        }
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fixed vocabulary of subscribable event types.
///
/// Transitions without a matching entry here (e.g. a payment expiring)
/// fan out zero events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
pub enum EventType {
    #[serde(rename = "payment.created")]
    PaymentCreated,
    #[serde(rename = "payment.confirmed")]
    PaymentConfirmed,
    #[serde(rename = "payment.failed")]
    PaymentFailed,
    #[serde(rename = "payment.refunded")]
    PaymentRefunded,
    #[serde(rename = "invoice.created")]
    InvoiceCreated,
    #[serde(rename = "invoice.paid")]
    InvoicePaid,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PaymentCreated => "payment.created",
            Self::PaymentConfirmed => "payment.confirmed",
            Self::PaymentFailed => "payment.failed",
            Self::PaymentRefunded => "payment.refunded",
            Self::InvoiceCreated => "invoice.created",
            Self::InvoicePaid => "invoice.paid",
        }
    }

    /// The event type fired when a payment enters `status`, if any.
    pub fn for_payment_status(status: PaymentStatus) -> Option<EventType> {
        match status {
            PaymentStatus::Created => Some(Self::PaymentCreated),
            PaymentStatus::Confirmed => Some(Self::PaymentConfirmed),
            PaymentStatus::Failed => Some(Self::PaymentFailed),
            PaymentStatus::Refunded => Some(Self::PaymentRefunded),
            PaymentStatus::Pending | PaymentStatus::Expired => None,
        }
    }

    /// The event type fired when an invoice enters `status`, if any.
    pub fn for_invoice_status(status: InvoiceStatus) -> Option<EventType> {
        match status {
            InvoiceStatus::Draft => Some(Self::InvoiceCreated),
            InvoiceStatus::Paid => Some(Self::InvoicePaid),
            _ => None,
        }
    }
}

impl std::str::FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "payment.created" => Ok(Self::PaymentCreated),
            "payment.confirmed" => Ok(Self::PaymentConfirmed),
            "payment.failed" => Ok(Self::PaymentFailed),
            "payment.refunded" => Ok(Self::PaymentRefunded),
            "invoice.created" => Ok(Self::InvoiceCreated),
            "invoice.paid" => Ok(Self::InvoicePaid),
            _ => Err(format!("Invalid event type: {}", s)),
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Core payment entity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct Payment {
    /// Unique identifier (UUID)
    #[schema(example = "550e8400-e29b-41d4-a716-446655440000")]
    pub id: String,
    /// Merchant this payment belongs to
    #[schema(example = "merchant_abc123")]
    pub merchant_ref: String,
    /// Monetary amount (fixed-point decimal)
    #[schema(value_type = String, example = "100.00")]
    pub amount: Decimal,
    /// Currency code
    #[schema(example = "USDC")]
    pub currency: String,
    /// Lifecycle status
    pub status: PaymentStatus,
    /// Payer wallet address, if known
    pub payer_address: Option<String>,
    /// Merchant settlement wallet address, if known
    pub merchant_address: Option<String>,
    /// Settlement transaction hash; set at most once, never cleared
    pub tx_hash: Option<String>,
    /// Observed settlement duration in seconds
    pub settlement_duration_secs: Option<i64>,
    /// Expiry deadline for unsettled payments
    pub expires_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency counter, bumped on every accepted transition
    pub version: i32,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    #[must_use]
    pub fn new(id: String, merchant_ref: String, amount: Decimal, currency: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            merchant_ref,
            amount,
            currency,
            status: PaymentStatus::Created,
            payer_address: None,
            merchant_address: None,
            tx_hash: None,
            settlement_duration_secs: None,
            expires_at: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Invoice entity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct Invoice {
    /// Unique identifier (UUID)
    pub id: String,
    /// Merchant this invoice belongs to
    pub merchant_ref: String,
    /// Linked payment, once one exists
    pub payment_id: Option<String>,
    /// Invoice number, unique per merchant
    #[schema(example = "INV-2026-0001")]
    pub invoice_number: String,
    /// Monetary amount (fixed-point decimal)
    #[schema(value_type = String, example = "250.00")]
    pub amount: Decimal,
    /// Currency code
    pub currency: String,
    /// Lifecycle status
    pub status: InvoiceStatus,
    /// Customer display name
    pub customer_name: Option<String>,
    /// Customer contact email
    pub customer_email: Option<String>,
    /// Payment deadline
    pub due_date: Option<DateTime<Utc>>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Invoice {
    #[must_use]
    pub fn new(
        id: String,
        merchant_ref: String,
        invoice_number: String,
        amount: Decimal,
        currency: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            merchant_ref,
            payment_id: None,
            invoice_number,
            amount,
            currency,
            status: InvoiceStatus::Draft,
            customer_name: None,
            customer_email: None,
            due_date: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Refund entity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct Refund {
    /// Unique identifier (UUID)
    pub id: String,
    /// Payment being refunded
    pub payment_id: String,
    /// Merchant this refund belongs to
    pub merchant_ref: String,
    /// Monetary amount; must not exceed the payment amount
    #[schema(value_type = String, example = "100.00")]
    pub amount: Decimal,
    /// Currency code
    pub currency: String,
    /// Lifecycle status
    pub status: RefundStatus,
    /// Refund transaction hash, once executed
    pub tx_hash: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Refund {
    #[must_use]
    pub fn new(
        id: String,
        payment_id: String,
        merchant_ref: String,
        amount: Decimal,
        currency: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            payment_id,
            merchant_ref,
            amount,
            currency,
            status: RefundStatus::Pending,
            tx_hash: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Merchant-registered webhook endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct WebhookEndpoint {
    /// Unique identifier (UUID)
    pub id: String,
    /// Merchant that owns the endpoint
    pub merchant_ref: String,
    /// Delivery target URL
    #[schema(example = "https://merchant.example.com/hooks/payments")]
    pub url: String,
    /// Event types this endpoint subscribes to
    pub event_types: Vec<EventType>,
    /// Per-endpoint signing secret (never returned by handlers)
    #[serde(skip_serializing, default)]
    pub secret: String,
    /// Soft-delete flag; inactive endpoints receive no deliveries
    pub active: bool,
    /// Consecutive terminally-failed events; drives auto-deactivation
    pub consecutive_failures: i32,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl WebhookEndpoint {
    #[must_use]
    pub fn new(
        id: String,
        merchant_ref: String,
        url: String,
        event_types: Vec<EventType>,
        secret: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            merchant_ref,
            url,
            event_types,
            secret,
            active: true,
            consecutive_failures: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_subscribed(&self, event_type: EventType) -> bool {
        self.active && self.event_types.contains(&event_type)
    }
}

/// Durable webhook event record.
///
/// The payload is frozen at creation; only the dispatcher mutates the
/// delivery bookkeeping fields, and only under an exclusive claim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct WebhookEvent {
    /// Unique identifier (UUID)
    pub id: String,
    /// Endpoint this event is addressed to
    pub endpoint_id: String,
    /// Event type
    pub event_type: EventType,
    /// Entity snapshot captured when the event was created
    #[schema(value_type = Object)]
    pub payload: serde_json::Value,
    /// Delivery status
    pub delivery_status: DeliveryStatus,
    /// Delivery attempts made so far (monotonic)
    pub attempts: i32,
    /// Timestamp of the last delivery attempt
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// HTTP status of the last attempt, if a response was received
    pub response_code: Option<i32>,
    /// Truncated body of the last response
    pub response_body: Option<String>,
    /// Earliest time the next retry is eligible; None on terminal states
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Claim marker; a stale claim is reclaimed after the visibility timeout
    pub in_flight_at: Option<DateTime<Utc>>,
    /// Deduplication key for retried state-machine calls
    pub idempotency_key: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl WebhookEvent {
    /// Terminal failure: the retry budget is exhausted (or the response was
    /// non-retryable) and no further automatic attempt is scheduled.
    pub fn is_terminal_failure(&self) -> bool {
        self.delivery_status == DeliveryStatus::Failed && self.next_attempt_at.is_none()
    }
}

/// Creation request the state machine hands to the event store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewWebhookEvent {
    pub id: String,
    pub endpoint_id: String,
    pub event_type: EventType,
    pub payload: serde_json::Value,
    pub idempotency_key: String,
}

impl NewWebhookEvent {
    #[must_use]
    pub fn new(
        endpoint_id: String,
        event_type: EventType,
        payload: serde_json::Value,
        source_entity_id: &str,
        revision: i32,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            idempotency_key: format!(
                "{}:{}:{}:{}",
                source_entity_id, event_type, endpoint_id, revision
            ),
            endpoint_id,
            event_type,
            payload,
        }
    }
}

/// Signed envelope POSTed to subscriber endpoints.
///
/// The serialized bytes of this struct are exactly what gets signed and
/// what goes on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEnvelope {
    pub id: String,
    pub event_type: EventType,
    pub payload: serde_json::Value,
    /// ISO-8601 timestamp of envelope construction
    pub timestamp: String,
}

/// Result of a single delivery attempt, as observed by the dispatcher.
#[derive(Debug, Clone, Default)]
pub struct AttemptOutcome {
    /// HTTP status, or None for timeouts and connection errors
    pub response_code: Option<i32>,
    /// Response body, already truncated by the dispatcher
    pub response_body: Option<String>,
    /// Transport-level error description, if any
    pub error: Option<String>,
}

impl AttemptOutcome {
    #[must_use]
    pub fn response(code: i32, body: String) -> Self {
        Self {
            response_code: Some(code),
            response_body: Some(body),
            error: None,
        }
    }

    #[must_use]
    pub fn transport_error(error: impl Into<String>) -> Self {
        Self {
            response_code: None,
            response_body: None,
            error: Some(error.into()),
        }
    }
}

/// What the event store decided to do with an attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptDisposition {
    /// 2xx response; event is terminally delivered
    Delivered,
    /// Retryable failure; eligible again at `next_attempt_at`
    Retry { next_attempt_at: DateTime<Utc> },
    /// Retry budget exhausted or non-retryable response; terminally failed
    TerminalFailure,
}

/// HTTP statuses that never warrant a retry.
const NON_RETRYABLE_STATUSES: [i32; 4] = [400, 401, 403, 410];

/// Retry policy applied by the event store when recording attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum delivery attempts before terminal failure
    pub max_attempts: i32,
    /// Base backoff in seconds; doubled per attempt
    pub base_backoff_secs: i64,
    /// Backoff ceiling in seconds
    pub max_backoff_secs: i64,
    /// Uniform jitter applied to each delay, in seconds
    pub jitter_secs: i64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff_secs: 30,
            max_backoff_secs: 3600,
            jitter_secs: 10,
        }
    }
}

impl RetryPolicy {
    /// Classify an attempt. `attempts` is the counter value *after* the
    /// attempt being recorded.
    pub fn disposition(
        &self,
        outcome: &AttemptOutcome,
        attempts: i32,
        now: DateTime<Utc>,
    ) -> AttemptDisposition {
        if let Some(code) = outcome.response_code {
            if (200..300).contains(&code) {
                return AttemptDisposition::Delivered;
            }
            if NON_RETRYABLE_STATUSES.contains(&code) {
                return AttemptDisposition::TerminalFailure;
            }
        }
        if attempts >= self.max_attempts {
            AttemptDisposition::TerminalFailure
        } else {
            AttemptDisposition::Retry {
                next_attempt_at: now + Duration::seconds(self.backoff_secs(attempts)),
            }
        }
    }

    /// Exponential backoff with jitter: `base * 2^attempts`, capped, with a
    /// uniform offset in `[-jitter, +jitter]` and a floor of one second.
    pub fn backoff_secs(&self, attempts: i32) -> i64 {
        let exp = attempts.clamp(0, 16) as u32;
        let delay = self
            .base_backoff_secs
            .saturating_mul(2_i64.saturating_pow(exp))
            .min(self.max_backoff_secs);
        if self.jitter_secs == 0 {
            return delay.max(1);
        }
        let jitter = rand::thread_rng().gen_range(-self.jitter_secs..=self.jitter_secs);
        (delay + jitter).max(1)
    }
}

fn validate_positive_amount(amount: &Decimal) -> Result<(), validator::ValidationError> {
    if *amount <= Decimal::ZERO {
        return Err(validator::ValidationError::new("amount_not_positive")
            .with_message("Amount must be greater than 0".into()));
    }
    Ok(())
}

/// Request to create a new payment
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreatePaymentRequest {
    /// Merchant the payment belongs to
    #[validate(length(min = 1, message = "Merchant reference is required"))]
    #[schema(example = "merchant_abc123")]
    pub merchant_ref: String,
    /// Monetary amount (fixed-point decimal)
    #[validate(custom(function = "validate_positive_amount"))]
    #[schema(value_type = String, example = "100.00")]
    pub amount: Decimal,
    /// Currency code
    #[validate(length(min = 2, max = 12, message = "Currency code must be 2-12 characters"))]
    #[schema(example = "USDC")]
    pub currency: String,
    /// Payer wallet address, if known at creation
    pub payer_address: Option<String>,
    /// Merchant settlement wallet address
    pub merchant_address: Option<String>,
    /// Expiry deadline for the payment
    pub expires_at: Option<DateTime<Utc>>,
}

/// Request to transition a payment to a new status
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TransitionPaymentRequest {
    /// Target status
    pub target_status: PaymentStatus,
    /// Version the caller observed when computing the evidence
    #[schema(example = 1)]
    pub expected_version: i32,
    /// Settlement transaction hash carried by the evidence
    pub tx_hash: Option<String>,
    /// Observed settlement duration in seconds
    pub settlement_duration_secs: Option<i64>,
}

/// Request to create a new invoice
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateInvoiceRequest {
    /// Merchant the invoice belongs to
    #[validate(length(min = 1, message = "Merchant reference is required"))]
    pub merchant_ref: String,
    /// Invoice number, unique per merchant
    #[validate(length(min = 1, message = "Invoice number is required"))]
    #[schema(example = "INV-2026-0001")]
    pub invoice_number: String,
    /// Monetary amount (fixed-point decimal)
    #[validate(custom(function = "validate_positive_amount"))]
    #[schema(value_type = String, example = "250.00")]
    pub amount: Decimal,
    /// Currency code
    #[validate(length(min = 2, max = 12, message = "Currency code must be 2-12 characters"))]
    pub currency: String,
    /// Payment to link at creation, if one already exists
    pub payment_id: Option<String>,
    /// Customer display name
    pub customer_name: Option<String>,
    /// Customer contact email
    #[validate(email(message = "Invalid customer email"))]
    pub customer_email: Option<String>,
    /// Payment deadline
    pub due_date: Option<DateTime<Utc>>,
}

/// Request to transition an invoice to a new status
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TransitionInvoiceRequest {
    /// Target status
    pub target_status: InvoiceStatus,
}

/// Request to mark an invoice as paid.
///
/// Providing a payment id asserts settlement against that payment (which
/// must be confirmed); omitting it is an explicit manual mark-paid action.
#[derive(Debug, Clone, Serialize, Deserialize, Default, ToSchema)]
pub struct MarkInvoicePaidRequest {
    /// Confirmed payment settling this invoice
    pub payment_id: Option<String>,
}

/// Request to create a refund for a confirmed payment
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateRefundRequest {
    /// Monetary amount to refund (fixed-point decimal)
    #[validate(custom(function = "validate_positive_amount"))]
    #[schema(value_type = String, example = "100.00")]
    pub amount: Decimal,
}

/// Request to transition a refund to a new status
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TransitionRefundRequest {
    /// Target status
    pub target_status: RefundStatus,
    /// Refund transaction hash, for completed refunds
    pub tx_hash: Option<String>,
}

/// Request to register a webhook endpoint
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateEndpointRequest {
    /// Merchant that owns the endpoint
    #[validate(length(min = 1, message = "Merchant reference is required"))]
    pub merchant_ref: String,
    /// Delivery target URL
    #[validate(url(message = "Invalid endpoint URL"))]
    #[schema(example = "https://merchant.example.com/hooks/payments")]
    pub url: String,
    /// Event types to subscribe to
    #[validate(length(min = 1, message = "At least one event type is required"))]
    pub event_types: Vec<EventType>,
    /// Signing secret shared with the receiver
    #[validate(length(min = 16, message = "Secret must be at least 16 characters"))]
    pub secret: String,
}

/// Pagination parameters for list requests
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct PaginationParams {
    /// Maximum number of items to return (1-100, default: 20)
    #[validate(range(min = 1, max = 100, message = "Limit must be between 1 and 100"))]
    #[serde(default = "default_limit")]
    #[schema(example = 20)]
    pub limit: i64,
    /// Cursor for pagination (ID to start after)
    #[schema(example = "uuid-string")]
    pub cursor: Option<String>,
}

fn default_limit() -> i64 {
    20
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            cursor: None,
        }
    }
}

/// Paginated response wrapper
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaginatedResponse<T: ToSchema> {
    /// List of items
    pub items: Vec<T>,
    /// Cursor for next page (null if no more items)
    #[schema(example = "uuid-string")]
    pub next_cursor: Option<String>,
    /// Whether more items exist
    pub has_more: bool,
}

impl<T: ToSchema> PaginatedResponse<T> {
    pub fn new(items: Vec<T>, next_cursor: Option<String>, has_more: bool) -> Self {
        Self {
            items,
            next_cursor,
            has_more,
        }
    }

    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            next_cursor: None,
            has_more: false,
        }
    }
}

/// Health status enum
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All systems operational
    Healthy,
    /// Some systems degraded but functional
    Degraded,
    /// Critical systems unavailable
    Unhealthy,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Overall system status
    pub status: HealthStatus,
    /// Database health status
    pub database: HealthStatus,
    /// Proof recording bridge health status (best-effort collaborator)
    pub proof_bridge: HealthStatus,
    /// Current server timestamp
    pub timestamp: DateTime<Utc>,
    /// Application version
    #[schema(example = "0.1.0")]
    pub version: String,
}

impl HealthResponse {
    /// The proof bridge is best-effort, so its failure only degrades the
    /// service; the database is load-bearing.
    #[must_use]
    pub fn new(database: HealthStatus, proof_bridge: HealthStatus) -> Self {
        let status = match (&database, &proof_bridge) {
            (HealthStatus::Healthy, HealthStatus::Healthy) => HealthStatus::Healthy,
            (HealthStatus::Unhealthy, _) => HealthStatus::Unhealthy,
            _ => HealthStatus::Degraded,
        };
        Self {
            status,
            database,
            proof_bridge,
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Error response structure
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Error details
    pub error: ErrorDetail,
}

/// Error detail structure
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Error type identifier
    #[schema(example = "validation_error")]
    pub r#type: String,
    /// Human-readable error message
    #[schema(example = "Amount must be greater than 0")]
    pub message: String,
}

/// Rate limit exceeded response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RateLimitResponse {
    /// Error details
    pub error: ErrorDetail,
    /// Seconds until rate limit resets
    #[schema(example = 60)]
    pub retry_after: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::str::FromStr;

    #[test]
    fn test_payment_status_display_and_parsing() {
        let statuses = vec![
            (PaymentStatus::Created, "created"),
            (PaymentStatus::Pending, "pending"),
            (PaymentStatus::Confirmed, "confirmed"),
            (PaymentStatus::Failed, "failed"),
            (PaymentStatus::Refunded, "refunded"),
            (PaymentStatus::Expired, "expired"),
        ];

        for (status, string) in statuses {
            assert_eq!(status.as_str(), string);
            assert_eq!(status.to_string(), string);
            assert_eq!(PaymentStatus::from_str(string).unwrap(), status);
        }

        assert!(PaymentStatus::from_str("invalid").is_err());
    }

    #[test]
    fn test_payment_transition_graph() {
        use PaymentStatus::*;

        let allowed = [
            (Created, Pending),
            (Pending, Confirmed),
            (Created, Failed),
            (Pending, Failed),
            (Confirmed, Refunded),
            (Created, Expired),
            (Pending, Expired),
        ];
        for (from, to) in allowed {
            assert!(from.can_transition_to(to), "{from} -> {to} should be allowed");
        }

        // Terminal states have no outgoing edges
        for terminal in [Failed, Refunded, Expired] {
            for target in [Created, Pending, Confirmed, Failed, Refunded, Expired] {
                assert!(!terminal.can_transition_to(target));
            }
            assert!(terminal.is_terminal());
        }

        // Confirmed only exits via refund
        assert!(!Confirmed.can_transition_to(Pending));
        assert!(!Confirmed.can_transition_to(Created));
        assert!(!Confirmed.can_transition_to(Failed));
        assert!(!Confirmed.is_terminal());

        // No skipping and no backwards motion
        assert!(!Created.can_transition_to(Confirmed));
        assert!(!Pending.can_transition_to(Created));
    }

    #[test]
    fn test_invoice_transition_graph() {
        use InvoiceStatus::*;

        assert!(Draft.can_transition_to(Sent));
        assert!(Sent.can_transition_to(Paid));
        assert!(Sent.can_transition_to(Overdue));
        assert!(Overdue.can_transition_to(Paid));
        assert!(Draft.can_transition_to(Cancelled));

        for terminal in [Paid, Cancelled] {
            for target in [Draft, Sent, Paid, Overdue, Cancelled] {
                assert!(!terminal.can_transition_to(target));
            }
        }
        assert!(!Draft.can_transition_to(Paid), "draft cannot be paid directly");
    }

    #[test]
    fn test_refund_transition_graph() {
        use RefundStatus::*;

        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Pending.can_transition_to(Failed));
        assert!(Processing.can_transition_to(Failed));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Pending));
        assert!(
            !Pending.can_transition_to(Completed),
            "must pass through processing"
        );
    }

    #[test]
    fn test_event_type_vocabulary() {
        let types = vec![
            (EventType::PaymentCreated, "payment.created"),
            (EventType::PaymentConfirmed, "payment.confirmed"),
            (EventType::PaymentFailed, "payment.failed"),
            (EventType::PaymentRefunded, "payment.refunded"),
            (EventType::InvoiceCreated, "invoice.created"),
            (EventType::InvoicePaid, "invoice.paid"),
        ];

        for (event_type, string) in types {
            assert_eq!(event_type.as_str(), string);
            assert_eq!(EventType::from_str(string).unwrap(), event_type);
            // serde uses the dotted form on the wire
            assert_eq!(
                serde_json::to_string(&event_type).unwrap(),
                format!("\"{}\"", string)
            );
        }

        assert!(EventType::from_str("payment.expired").is_err());
    }

    #[test]
    fn test_event_type_for_statuses() {
        assert_eq!(
            EventType::for_payment_status(PaymentStatus::Confirmed),
            Some(EventType::PaymentConfirmed)
        );
        // pending and expired are outside the vocabulary
        assert_eq!(EventType::for_payment_status(PaymentStatus::Pending), None);
        assert_eq!(EventType::for_payment_status(PaymentStatus::Expired), None);
        assert_eq!(
            EventType::for_invoice_status(InvoiceStatus::Paid),
            Some(EventType::InvoicePaid)
        );
        assert_eq!(EventType::for_invoice_status(InvoiceStatus::Overdue), None);
    }

    #[test]
    fn test_payment_initialization_defaults() {
        let payment = Payment::new(
            "pay_1".to_string(),
            "merchant_1".to_string(),
            dec!(100.00),
            "USDC".to_string(),
        );

        assert_eq!(payment.status, PaymentStatus::Created);
        assert_eq!(payment.version, 1);
        assert!(payment.tx_hash.is_none());
        assert_eq!(payment.amount, dec!(100.00));
    }

    #[test]
    fn test_payment_serialization_roundtrip() {
        let payment = Payment::new(
            "pay_1".to_string(),
            "merchant_1".to_string(),
            dec!(0.000001),
            "USDC".to_string(),
        );

        let json = serde_json::to_string(&payment).unwrap();
        let deserialized: Payment = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized.id, "pay_1");
        assert_eq!(deserialized.amount, dec!(0.000001));
        assert_eq!(deserialized, payment);
    }

    #[test]
    fn test_endpoint_secret_not_serialized() {
        let endpoint = WebhookEndpoint::new(
            "ep_1".to_string(),
            "merchant_1".to_string(),
            "https://example.com/hook".to_string(),
            vec![EventType::PaymentCreated],
            "super-secret-value-123".to_string(),
        );

        let json = serde_json::to_string(&endpoint).unwrap();
        assert!(!json.contains("super-secret-value-123"));
    }

    #[test]
    fn test_new_webhook_event_idempotency_key() {
        let a = NewWebhookEvent::new(
            "ep_1".to_string(),
            EventType::PaymentConfirmed,
            serde_json::json!({"id": "pay_1"}),
            "pay_1",
            2,
        );
        let b = NewWebhookEvent::new(
            "ep_1".to_string(),
            EventType::PaymentConfirmed,
            serde_json::json!({"id": "pay_1"}),
            "pay_1",
            2,
        );

        // Fresh ids, identical idempotency keys for the same logical transition
        assert_ne!(a.id, b.id);
        assert_eq!(a.idempotency_key, b.idempotency_key);
        assert_eq!(a.idempotency_key, "pay_1:payment.confirmed:ep_1:2");
    }

    #[test]
    fn test_create_payment_request_validation() {
        let valid = CreatePaymentRequest {
            merchant_ref: "merchant_1".to_string(),
            amount: dec!(10.50),
            currency: "USDC".to_string(),
            payer_address: None,
            merchant_address: None,
            expires_at: None,
        };
        assert!(valid.validate().is_ok());

        let zero_amount = CreatePaymentRequest {
            amount: Decimal::ZERO,
            ..valid.clone()
        };
        assert!(zero_amount.validate().is_err());

        let negative_amount = CreatePaymentRequest {
            amount: dec!(-1),
            ..valid.clone()
        };
        assert!(negative_amount.validate().is_err());

        let empty_merchant = CreatePaymentRequest {
            merchant_ref: String::new(),
            ..valid.clone()
        };
        assert!(empty_merchant.validate().is_err());

        let bad_currency = CreatePaymentRequest {
            currency: "X".to_string(),
            ..valid
        };
        assert!(bad_currency.validate().is_err());
    }

    #[test]
    fn test_create_endpoint_request_validation() {
        let valid = CreateEndpointRequest {
            merchant_ref: "merchant_1".to_string(),
            url: "https://example.com/hook".to_string(),
            event_types: vec![EventType::PaymentCreated],
            secret: "0123456789abcdef".to_string(),
        };
        assert!(valid.validate().is_ok());

        let bad_url = CreateEndpointRequest {
            url: "not-a-url".to_string(),
            ..valid.clone()
        };
        assert!(bad_url.validate().is_err());

        let short_secret = CreateEndpointRequest {
            secret: "short".to_string(),
            ..valid.clone()
        };
        assert!(short_secret.validate().is_err());

        let no_events = CreateEndpointRequest {
            event_types: vec![],
            ..valid
        };
        assert!(no_events.validate().is_err());
    }

    #[test]
    fn test_retry_policy_disposition() {
        let policy = RetryPolicy {
            jitter_secs: 0,
            ..RetryPolicy::default()
        };
        let now = Utc::now();

        // 2xx is delivered regardless of attempt count
        assert_eq!(
            policy.disposition(&AttemptOutcome::response(200, String::new()), 5, now),
            AttemptDisposition::Delivered
        );
        assert_eq!(
            policy.disposition(&AttemptOutcome::response(204, String::new()), 1, now),
            AttemptDisposition::Delivered
        );

        // Retryable failure within budget schedules a retry
        match policy.disposition(&AttemptOutcome::response(500, String::new()), 1, now) {
            AttemptDisposition::Retry { next_attempt_at } => {
                assert_eq!(next_attempt_at, now + Duration::seconds(60));
            }
            other => panic!("expected retry, got {:?}", other),
        }

        // Transport errors retry too
        assert!(matches!(
            policy.disposition(&AttemptOutcome::transport_error("timeout"), 2, now),
            AttemptDisposition::Retry { .. }
        ));

        // Budget exhausted at max_attempts
        assert_eq!(
            policy.disposition(&AttemptOutcome::response(503, String::new()), 5, now),
            AttemptDisposition::TerminalFailure
        );

        // Non-retryable 4xx fails immediately
        for code in [400, 401, 403, 410] {
            assert_eq!(
                policy.disposition(&AttemptOutcome::response(code, String::new()), 1, now),
                AttemptDisposition::TerminalFailure,
                "status {code} should be non-retryable"
            );
        }

        // 408 and 429 stay retryable
        assert!(matches!(
            policy.disposition(&AttemptOutcome::response(429, String::new()), 1, now),
            AttemptDisposition::Retry { .. }
        ));
        assert!(matches!(
            policy.disposition(&AttemptOutcome::response(408, String::new()), 1, now),
            AttemptDisposition::Retry { .. }
        ));
    }

    #[test]
    fn test_retry_policy_backoff_schedule() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_backoff_secs: 30,
            max_backoff_secs: 300,
            jitter_secs: 0,
        };

        assert_eq!(policy.backoff_secs(1), 60);
        assert_eq!(policy.backoff_secs(2), 120);
        assert_eq!(policy.backoff_secs(3), 240);
        assert_eq!(policy.backoff_secs(4), 300); // capped
        assert_eq!(policy.backoff_secs(10), 300); // capped
    }

    #[test]
    fn test_retry_policy_backoff_jitter_bounds() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_backoff_secs: 30,
            max_backoff_secs: 3600,
            jitter_secs: 10,
        };

        for _ in 0..100 {
            let delay = policy.backoff_secs(1);
            assert!(
                (50..=70).contains(&delay),
                "delay {delay} outside jitter bounds"
            );
        }
    }

    #[test]
    fn test_webhook_envelope_wire_format() {
        let envelope = WebhookEnvelope {
            id: "evt_1".to_string(),
            event_type: EventType::PaymentConfirmed,
            payload: serde_json::json!({"id": "pay_1"}),
            timestamp: "2026-01-01T00:00:00Z".to_string(),
        };

        let json: serde_json::Value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["id"], "evt_1");
        assert_eq!(json["eventType"], "payment.confirmed");
        assert_eq!(json["payload"]["id"], "pay_1");
        assert_eq!(json["timestamp"], "2026-01-01T00:00:00Z");
    }

    #[test]
    fn test_terminal_failure_detection() {
        let mut event = WebhookEvent {
            id: "evt_1".to_string(),
            endpoint_id: "ep_1".to_string(),
            event_type: EventType::PaymentCreated,
            payload: serde_json::json!({}),
            delivery_status: DeliveryStatus::Failed,
            attempts: 5,
            last_attempt_at: Some(Utc::now()),
            response_code: Some(500),
            response_body: None,
            next_attempt_at: None,
            in_flight_at: None,
            idempotency_key: "k".to_string(),
            created_at: Utc::now(),
        };
        assert!(event.is_terminal_failure());

        event.next_attempt_at = Some(Utc::now());
        assert!(!event.is_terminal_failure());

        event.delivery_status = DeliveryStatus::Delivered;
        event.next_attempt_at = None;
        assert!(!event.is_terminal_failure());
    }
}
