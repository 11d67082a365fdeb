//! Domain traits defining contracts for storage and external systems.
//!
//! Each entity gets its own repository capability so the core logic stays
//! storage-engine-agnostic. One concrete client may implement several of
//! them against the same backing store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use super::error::AppError;
use super::types::{
    AttemptOutcome, EventType, Invoice, InvoiceStatus, NewWebhookEvent, PaginatedResponse, Payment,
    PaymentStatus, Refund, RefundStatus, RetryPolicy, WebhookEndpoint, WebhookEvent,
};

/// Persistence contract for payments.
///
/// `apply_transition` is the write side of the state machine: the status
/// update and the webhook-event fan-out commit atomically, so a transition
/// is never half-applied.
#[async_trait]
pub trait PaymentRepository: Send + Sync {
    /// Check storage connectivity
    async fn health_check(&self) -> Result<(), AppError>;

    /// Persist a new payment together with its creation events
    async fn insert_payment(
        &self,
        payment: &Payment,
        events: &[NewWebhookEvent],
    ) -> Result<(), AppError>;

    /// Get a single payment by ID
    async fn get_payment(&self, id: &str) -> Result<Option<Payment>, AppError>;

    /// List payments with cursor-based pagination
    async fn list_payments(
        &self,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<PaginatedResponse<Payment>, AppError>;

    /// Apply an accepted transition under optimistic concurrency.
    ///
    /// Fails with `ConcurrentModification` when the stored version differs
    /// from `expected_version`, with `NotFound` when the payment does not
    /// exist. The version is bumped by one on success. `tx_hash` is applied
    /// only when currently unset.
    async fn apply_transition(
        &self,
        id: &str,
        target: PaymentStatus,
        tx_hash: Option<&str>,
        settlement_duration_secs: Option<i64>,
        expected_version: i32,
        events: &[NewWebhookEvent],
    ) -> Result<Payment, AppError>;
}

/// Persistence contract for invoices.
#[async_trait]
pub trait InvoiceRepository: Send + Sync {
    /// Persist a new invoice together with its creation events
    async fn insert_invoice(
        &self,
        invoice: &Invoice,
        events: &[NewWebhookEvent],
    ) -> Result<(), AppError>;

    /// Get a single invoice by ID
    async fn get_invoice(&self, id: &str) -> Result<Option<Invoice>, AppError>;

    /// List invoices with cursor-based pagination
    async fn list_invoices(
        &self,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<PaginatedResponse<Invoice>, AppError>;

    /// Apply an accepted invoice transition atomically with its events.
    /// Optionally links a payment (used when marking paid against one).
    async fn apply_transition(
        &self,
        id: &str,
        target: InvoiceStatus,
        payment_id: Option<&str>,
        events: &[NewWebhookEvent],
    ) -> Result<Invoice, AppError>;
}

/// Persistence contract for refunds.
#[async_trait]
pub trait RefundRepository: Send + Sync {
    /// Persist a new refund
    async fn insert_refund(&self, refund: &Refund) -> Result<(), AppError>;

    /// Get a single refund by ID
    async fn get_refund(&self, id: &str) -> Result<Option<Refund>, AppError>;

    /// All refunds linked to a payment
    async fn list_refunds_for_payment(&self, payment_id: &str) -> Result<Vec<Refund>, AppError>;

    /// Update a refund's status; `tx_hash` is applied only when set
    async fn update_status(
        &self,
        id: &str,
        status: RefundStatus,
        tx_hash: Option<&str>,
    ) -> Result<Refund, AppError>;
}

/// Persistence contract for webhook endpoints.
#[async_trait]
pub trait WebhookEndpointRepository: Send + Sync {
    /// Persist a new endpoint
    async fn insert_endpoint(&self, endpoint: &WebhookEndpoint) -> Result<(), AppError>;

    /// Get a single endpoint by ID
    async fn get_endpoint(&self, id: &str) -> Result<Option<WebhookEndpoint>, AppError>;

    /// List endpoints with cursor-based pagination
    async fn list_endpoints(
        &self,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<PaginatedResponse<WebhookEndpoint>, AppError>;

    /// Active endpoints of a merchant subscribed to the given event type
    async fn subscribed_endpoints(
        &self,
        merchant_ref: &str,
        event_type: EventType,
    ) -> Result<Vec<WebhookEndpoint>, AppError>;

    /// Soft-activate or deactivate an endpoint
    async fn set_active(&self, id: &str, active: bool) -> Result<(), AppError>;

    /// Record the outcome of a finished delivery for auto-deactivation
    /// bookkeeping. Success resets the consecutive-failure counter; a
    /// terminal failure increments it and deactivates the endpoint once the
    /// threshold is reached. Returns true when the endpoint is now inactive.
    async fn record_delivery_result(
        &self,
        id: &str,
        success: bool,
        failure_threshold: i32,
    ) -> Result<bool, AppError>;
}

/// The event store: durable record of webhook events.
///
/// The state machine only requests creation; the dispatcher is the sole
/// mutator of delivery status, attempts, and response metadata, and only
/// through `claim_next_deliverable` / `record_attempt`.
#[async_trait]
pub trait WebhookEventRepository: Send + Sync {
    /// Create a pending event. Idempotent: a second call with the same
    /// idempotency key returns the existing event and creates nothing.
    async fn create_event(&self, event: &NewWebhookEvent) -> Result<WebhookEvent, AppError>;

    /// Get a single event by ID
    async fn get_event(&self, id: &str) -> Result<Option<WebhookEvent>, AppError>;

    /// Audit trail for one endpoint, newest first
    async fn list_events_for_endpoint(
        &self,
        endpoint_id: &str,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<PaginatedResponse<WebhookEvent>, AppError>;

    /// Atomically claim up to `limit` deliverable events, at most one per
    /// endpoint, oldest first per endpoint. An endpoint with a live
    /// in-flight claim is skipped entirely; a claim older than
    /// `visibility_timeout` is treated as abandoned and reclaimed.
    async fn claim_next_deliverable(
        &self,
        limit: i64,
        now: DateTime<Utc>,
        visibility_timeout: Duration,
        max_attempts: i32,
    ) -> Result<Vec<WebhookEvent>, AppError>;

    /// Record an attempt for a claimed event: bump the counter, store
    /// response metadata, compute the next status per `policy`, and release
    /// the claim.
    async fn record_attempt(
        &self,
        event_id: &str,
        outcome: &AttemptOutcome,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> Result<WebhookEvent, AppError>;

    /// Operator-initiated replay of a terminally failed event: reset to
    /// pending with zero attempts. Never triggered automatically.
    async fn replay_event(&self, id: &str) -> Result<WebhookEvent, AppError>;
}

/// Best-effort on-chain notarization collaborator.
///
/// Invoked after a payment reaches `confirmed`; any failure is logged and
/// swallowed, never affecting payment status or webhook delivery.
#[async_trait]
pub trait ProofRecorder: Send + Sync {
    /// Check collaborator reachability
    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }

    /// A payment is eligible once it is confirmed and carries a
    /// transaction hash.
    fn is_eligible(&self, payment: &Payment) -> bool {
        payment.status == PaymentStatus::Confirmed && payment.tx_hash.is_some()
    }

    /// Record a proof, returning an opaque proof reference if the
    /// collaborator produced one.
    async fn record_proof(&self, payment: &Payment) -> Result<Option<String>, AppError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    struct MinimalProofRecorder;

    #[async_trait]
    impl ProofRecorder for MinimalProofRecorder {
        async fn record_proof(&self, _payment: &Payment) -> Result<Option<String>, AppError> {
            Ok(None)
        }
    }

    fn confirmed_payment(tx_hash: Option<&str>) -> Payment {
        let mut payment = Payment::new(
            "pay_1".to_string(),
            "merchant_1".to_string(),
            dec!(100.00),
            "USDC".to_string(),
        );
        payment.status = PaymentStatus::Confirmed;
        payment.tx_hash = tx_hash.map(String::from);
        payment
    }

    #[test]
    fn test_proof_eligibility_requires_confirmed_and_hash() {
        let recorder = MinimalProofRecorder;

        assert!(recorder.is_eligible(&confirmed_payment(Some("0xabc"))));
        assert!(!recorder.is_eligible(&confirmed_payment(None)));

        let mut unconfirmed = confirmed_payment(Some("0xabc"));
        unconfirmed.status = PaymentStatus::Pending;
        assert!(!recorder.is_eligible(&unconfirmed));
    }

    #[tokio::test]
    async fn test_proof_recorder_default_health_check() {
        let recorder = MinimalProofRecorder;
        assert!(recorder.health_check().await.is_ok());
    }
}
