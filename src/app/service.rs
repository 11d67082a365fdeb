//! Payment lifecycle service: the state machine over payments, invoices,
//! and refunds, plus the webhook fan-out each accepted transition produces.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::domain::{
    AppError, DatabaseError, EventType, HealthResponse, HealthStatus, Invoice, InvoiceRepository,
    InvoiceStatus, NewWebhookEvent, PaginatedResponse, Payment, PaymentRepository, PaymentStatus,
    ProofRecorder, Refund, RefundRepository, RefundStatus, TransitionError, ValidationError,
    WebhookEndpoint, WebhookEndpointRepository, WebhookEvent, WebhookEventRepository,
    types::{
        CreateEndpointRequest, CreateInvoiceRequest, CreatePaymentRequest, CreateRefundRequest,
        MarkInvoicePaidRequest, TransitionInvoiceRequest, TransitionPaymentRequest,
        TransitionRefundRequest,
    },
};

/// Idempotency revision used for events fired at entity creation.
const CREATION_REVISION: i32 = 1;

/// Idempotency revision for the invoice paid transition. Invoices have no
/// version counter; `paid` is terminal, so a fixed revision is sufficient
/// to collapse retried calls.
const INVOICE_PAID_REVISION: i32 = 2;

/// Application service containing the lifecycle business logic.
pub struct PaymentService {
    payments: Arc<dyn PaymentRepository>,
    invoices: Arc<dyn InvoiceRepository>,
    refunds: Arc<dyn RefundRepository>,
    endpoints: Arc<dyn WebhookEndpointRepository>,
    events: Arc<dyn WebhookEventRepository>,
    proof_recorder: Arc<dyn ProofRecorder>,
}

impl PaymentService {
    #[must_use]
    pub fn new(
        payments: Arc<dyn PaymentRepository>,
        invoices: Arc<dyn InvoiceRepository>,
        refunds: Arc<dyn RefundRepository>,
        endpoints: Arc<dyn WebhookEndpointRepository>,
        events: Arc<dyn WebhookEventRepository>,
        proof_recorder: Arc<dyn ProofRecorder>,
    ) -> Self {
        Self {
            payments,
            invoices,
            refunds,
            endpoints,
            events,
            proof_recorder,
        }
    }

    // ------------------------------------------------------------------
    // Payments
    // ------------------------------------------------------------------

    /// Create a payment and fan out `payment.created` to every active
    /// subscribed endpoint. The insert and the fan-out commit atomically.
    #[instrument(skip(self, request), fields(merchant = %request.merchant_ref))]
    pub async fn create_payment(&self, request: &CreatePaymentRequest) -> Result<Payment, AppError> {
        request.validate().map_err(|e| {
            warn!(error = %e, "Validation failed");
            AppError::Validation(ValidationError::Multiple(e.to_string()))
        })?;

        let mut payment = Payment::new(
            Uuid::new_v4().to_string(),
            request.merchant_ref.clone(),
            request.amount,
            request.currency.clone(),
        );
        payment.payer_address = request.payer_address.clone();
        payment.merchant_address = request.merchant_address.clone();
        payment.expires_at = request.expires_at;

        let events = self
            .payment_fanout(&payment, EventType::PaymentCreated, CREATION_REVISION)
            .await?;
        self.payments.insert_payment(&payment, &events).await?;

        info!(id = %payment.id, events = events.len(), "Payment created");
        Ok(payment)
    }

    /// Apply a lifecycle transition to a payment.
    ///
    /// Rejected synchronously, with no side effects, when the edge is not in
    /// the allowed graph, the payment is unknown, or the caller's observed
    /// version is stale. On success the status update and the webhook
    /// fan-out have committed together; the proof bridge is then invoked
    /// fire-and-forget for confirmed settlements.
    #[instrument(skip(self, request), fields(target = %request.target_status))]
    pub async fn transition_payment(
        &self,
        id: &str,
        request: &TransitionPaymentRequest,
    ) -> Result<Payment, AppError> {
        let payment = self
            .payments
            .get_payment(id)
            .await?
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound(id.to_string())))?;

        if !payment.status.can_transition_to(request.target_status) {
            return Err(AppError::Transition(TransitionError::InvalidTransition {
                from: payment.status.to_string(),
                to: request.target_status.to_string(),
            }));
        }
        if payment.version != request.expected_version {
            return Err(AppError::Transition(TransitionError::ConcurrentModification {
                id: id.to_string(),
                expected: request.expected_version,
            }));
        }
        if let (Some(incoming), Some(existing)) =
            (request.tx_hash.as_deref(), payment.tx_hash.as_deref())
        {
            if incoming != existing {
                return Err(AppError::Transition(TransitionError::TxHashAlreadySet(
                    id.to_string(),
                )));
            }
        }

        // Event payloads carry the post-transition snapshot; the repository
        // re-checks the version under lock before committing both.
        let mut snapshot = payment.clone();
        snapshot.status = request.target_status;
        if snapshot.tx_hash.is_none() {
            snapshot.tx_hash = request.tx_hash.clone();
        }
        if request.settlement_duration_secs.is_some() {
            snapshot.settlement_duration_secs = request.settlement_duration_secs;
        }
        snapshot.version += 1;

        let events = match EventType::for_payment_status(request.target_status) {
            Some(event_type) => {
                self.payment_fanout(&snapshot, event_type, snapshot.version)
                    .await?
            }
            None => Vec::new(),
        };

        let updated = self
            .payments
            .apply_transition(
                id,
                request.target_status,
                request.tx_hash.as_deref(),
                request.settlement_duration_secs,
                request.expected_version,
                &events,
            )
            .await?;

        info!(
            id = %updated.id,
            status = %updated.status,
            events = events.len(),
            "Payment transition applied"
        );

        if updated.status == PaymentStatus::Confirmed {
            self.spawn_proof_recording(updated.clone());
        }

        Ok(updated)
    }

    #[instrument(skip(self))]
    pub async fn get_payment(&self, id: &str) -> Result<Option<Payment>, AppError> {
        self.payments.get_payment(id).await
    }

    #[instrument(skip(self))]
    pub async fn list_payments(
        &self,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<PaginatedResponse<Payment>, AppError> {
        self.payments.list_payments(limit, cursor).await
    }

    // ------------------------------------------------------------------
    // Invoices
    // ------------------------------------------------------------------

    /// Create an invoice and fan out `invoice.created`.
    #[instrument(skip(self, request), fields(merchant = %request.merchant_ref, number = %request.invoice_number))]
    pub async fn create_invoice(&self, request: &CreateInvoiceRequest) -> Result<Invoice, AppError> {
        request.validate().map_err(|e| {
            warn!(error = %e, "Validation failed");
            AppError::Validation(ValidationError::Multiple(e.to_string()))
        })?;

        if let Some(payment_id) = &request.payment_id {
            self.payments
                .get_payment(payment_id)
                .await?
                .ok_or_else(|| AppError::Database(DatabaseError::NotFound(payment_id.clone())))?;
        }

        let mut invoice = Invoice::new(
            Uuid::new_v4().to_string(),
            request.merchant_ref.clone(),
            request.invoice_number.clone(),
            request.amount,
            request.currency.clone(),
        );
        invoice.payment_id = request.payment_id.clone();
        invoice.customer_name = request.customer_name.clone();
        invoice.customer_email = request.customer_email.clone();
        invoice.due_date = request.due_date;

        let events = self
            .invoice_fanout(&invoice, EventType::InvoiceCreated, CREATION_REVISION)
            .await?;
        self.invoices.insert_invoice(&invoice, &events).await?;

        info!(id = %invoice.id, events = events.len(), "Invoice created");
        Ok(invoice)
    }

    /// Apply a non-paid invoice transition (sent, overdue, cancelled).
    /// Marking paid goes through [`Self::mark_invoice_paid`], which enforces
    /// the settlement evidence rule.
    #[instrument(skip(self, request), fields(target = %request.target_status))]
    pub async fn transition_invoice(
        &self,
        id: &str,
        request: &TransitionInvoiceRequest,
    ) -> Result<Invoice, AppError> {
        if request.target_status == InvoiceStatus::Paid {
            return Err(AppError::Validation(ValidationError::InvalidField {
                field: "target_status".to_string(),
                message: "Use the mark-paid operation to pay an invoice".to_string(),
            }));
        }

        let invoice = self
            .invoices
            .get_invoice(id)
            .await?
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound(id.to_string())))?;

        if !invoice.status.can_transition_to(request.target_status) {
            return Err(AppError::Transition(TransitionError::InvalidTransition {
                from: invoice.status.to_string(),
                to: request.target_status.to_string(),
            }));
        }

        // sent/overdue/cancelled are outside the event vocabulary: no fan-out
        self.invoices
            .apply_transition(id, request.target_status, None, &[])
            .await
    }

    /// Mark an invoice paid, either against a confirmed payment or as an
    /// explicit manual action, and fan out `invoice.paid`.
    #[instrument(skip(self, request))]
    pub async fn mark_invoice_paid(
        &self,
        id: &str,
        request: &MarkInvoicePaidRequest,
    ) -> Result<Invoice, AppError> {
        let invoice = self
            .invoices
            .get_invoice(id)
            .await?
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound(id.to_string())))?;

        if !invoice.status.can_transition_to(InvoiceStatus::Paid) {
            return Err(AppError::Transition(TransitionError::InvalidTransition {
                from: invoice.status.to_string(),
                to: InvoiceStatus::Paid.to_string(),
            }));
        }

        let linked_payment = request
            .payment_id
            .as_deref()
            .or(invoice.payment_id.as_deref());
        if let Some(payment_id) = linked_payment {
            let payment = self
                .payments
                .get_payment(payment_id)
                .await?
                .ok_or_else(|| AppError::Database(DatabaseError::NotFound(payment_id.to_string())))?;
            if payment.status != PaymentStatus::Confirmed {
                return Err(AppError::Validation(ValidationError::InvalidField {
                    field: "payment_id".to_string(),
                    message: "Linked payment is not confirmed".to_string(),
                }));
            }
        } else {
            debug!(id = %invoice.id, "Manual mark-paid without linked payment");
        }

        let mut snapshot = invoice.clone();
        snapshot.status = InvoiceStatus::Paid;
        if snapshot.payment_id.is_none() {
            snapshot.payment_id = request.payment_id.clone();
        }

        let events = self
            .invoice_fanout(&snapshot, EventType::InvoicePaid, INVOICE_PAID_REVISION)
            .await?;
        let updated = self
            .invoices
            .apply_transition(id, InvoiceStatus::Paid, request.payment_id.as_deref(), &events)
            .await?;

        info!(id = %updated.id, events = events.len(), "Invoice marked paid");
        Ok(updated)
    }

    #[instrument(skip(self))]
    pub async fn get_invoice(&self, id: &str) -> Result<Option<Invoice>, AppError> {
        self.invoices.get_invoice(id).await
    }

    #[instrument(skip(self))]
    pub async fn list_invoices(
        &self,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<PaginatedResponse<Invoice>, AppError> {
        self.invoices.list_invoices(limit, cursor).await
    }

    // ------------------------------------------------------------------
    // Refunds
    // ------------------------------------------------------------------

    /// Create a refund request against a confirmed payment.
    #[instrument(skip(self, request))]
    pub async fn create_refund(
        &self,
        payment_id: &str,
        request: &CreateRefundRequest,
    ) -> Result<Refund, AppError> {
        request.validate().map_err(|e| {
            warn!(error = %e, "Validation failed");
            AppError::Validation(ValidationError::Multiple(e.to_string()))
        })?;

        let payment = self
            .payments
            .get_payment(payment_id)
            .await?
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound(payment_id.to_string())))?;

        let siblings = self.refunds.list_refunds_for_payment(payment_id).await?;
        if siblings.iter().any(|r| r.status == RefundStatus::Completed) {
            return Err(AppError::Transition(TransitionError::RefundAlreadyCompleted(
                payment_id.to_string(),
            )));
        }
        if payment.status != PaymentStatus::Confirmed {
            return Err(AppError::Validation(ValidationError::InvalidField {
                field: "payment_id".to_string(),
                message: "Only confirmed payments can be refunded".to_string(),
            }));
        }
        if request.amount > payment.amount {
            return Err(AppError::Transition(TransitionError::RefundExceedsPayment {
                amount: request.amount,
                available: payment.amount,
            }));
        }

        let refund = Refund::new(
            Uuid::new_v4().to_string(),
            payment_id.to_string(),
            payment.merchant_ref.clone(),
            request.amount,
            payment.currency.clone(),
        );
        self.refunds.insert_refund(&refund).await?;

        info!(id = %refund.id, payment = %payment_id, "Refund created");
        Ok(refund)
    }

    /// Apply a refund lifecycle transition. Completing a refund drives the
    /// linked payment's `confirmed -> refunded` transition, whose fan-out
    /// emits `payment.refunded`.
    #[instrument(skip(self, request), fields(target = %request.target_status))]
    pub async fn transition_refund(
        &self,
        id: &str,
        request: &TransitionRefundRequest,
    ) -> Result<Refund, AppError> {
        let refund = self
            .refunds
            .get_refund(id)
            .await?
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound(id.to_string())))?;

        if !refund.status.can_transition_to(request.target_status) {
            return Err(AppError::Transition(TransitionError::InvalidTransition {
                from: refund.status.to_string(),
                to: request.target_status.to_string(),
            }));
        }

        if request.target_status == RefundStatus::Completed {
            let siblings = self.refunds.list_refunds_for_payment(&refund.payment_id).await?;
            if siblings
                .iter()
                .any(|r| r.id != refund.id && r.status == RefundStatus::Completed)
            {
                return Err(AppError::Transition(TransitionError::RefundAlreadyCompleted(
                    refund.payment_id.clone(),
                )));
            }

            // The payment moves first: if its transition fails the refund
            // stays processing and the caller retries.
            let payment = self
                .payments
                .get_payment(&refund.payment_id)
                .await?
                .ok_or_else(|| {
                    AppError::Database(DatabaseError::NotFound(refund.payment_id.clone()))
                })?;
            let payment_request = TransitionPaymentRequest {
                target_status: PaymentStatus::Refunded,
                expected_version: payment.version,
                tx_hash: None,
                settlement_duration_secs: None,
            };
            self.transition_payment(&refund.payment_id, &payment_request)
                .await?;
        }

        let updated = self
            .refunds
            .update_status(id, request.target_status, request.tx_hash.as_deref())
            .await?;
        info!(id = %updated.id, status = %updated.status, "Refund transition applied");
        Ok(updated)
    }

    #[instrument(skip(self))]
    pub async fn get_refund(&self, id: &str) -> Result<Option<Refund>, AppError> {
        self.refunds.get_refund(id).await
    }

    // ------------------------------------------------------------------
    // Webhook endpoints and event audit
    // ------------------------------------------------------------------

    #[instrument(skip(self, request), fields(merchant = %request.merchant_ref))]
    pub async fn create_endpoint(
        &self,
        request: &CreateEndpointRequest,
    ) -> Result<WebhookEndpoint, AppError> {
        request.validate().map_err(|e| {
            warn!(error = %e, "Validation failed");
            AppError::Validation(ValidationError::Multiple(e.to_string()))
        })?;

        let mut seen = std::collections::HashSet::new();
        let event_types: Vec<EventType> = request
            .event_types
            .iter()
            .copied()
            .filter(|t| seen.insert(*t))
            .collect();
        let endpoint = WebhookEndpoint::new(
            Uuid::new_v4().to_string(),
            request.merchant_ref.clone(),
            request.url.clone(),
            event_types,
            request.secret.clone(),
        );
        self.endpoints.insert_endpoint(&endpoint).await?;

        info!(id = %endpoint.id, url = %endpoint.url, "Webhook endpoint registered");
        Ok(endpoint)
    }

    #[instrument(skip(self))]
    pub async fn get_endpoint(&self, id: &str) -> Result<Option<WebhookEndpoint>, AppError> {
        self.endpoints.get_endpoint(id).await
    }

    #[instrument(skip(self))]
    pub async fn list_endpoints(
        &self,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<PaginatedResponse<WebhookEndpoint>, AppError> {
        self.endpoints.list_endpoints(limit, cursor).await
    }

    /// Soft-deactivate an endpoint. Its queued events stay durable and
    /// queryable; they simply stop being claimed.
    #[instrument(skip(self))]
    pub async fn deactivate_endpoint(&self, id: &str) -> Result<(), AppError> {
        self.endpoints.set_active(id, false).await?;
        info!(id = %id, "Webhook endpoint deactivated");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn list_endpoint_events(
        &self,
        endpoint_id: &str,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<PaginatedResponse<WebhookEvent>, AppError> {
        self.endpoints
            .get_endpoint(endpoint_id)
            .await?
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound(endpoint_id.to_string())))?;
        self.events
            .list_events_for_endpoint(endpoint_id, limit, cursor)
            .await
    }

    /// Operator-initiated replay of a terminally failed event.
    #[instrument(skip(self))]
    pub async fn replay_event(&self, id: &str) -> Result<WebhookEvent, AppError> {
        let event = self.events.replay_event(id).await?;
        info!(id = %event.id, endpoint = %event.endpoint_id, "Event queued for replay");
        Ok(event)
    }

    // ------------------------------------------------------------------
    // Health
    // ------------------------------------------------------------------

    #[instrument(skip(self))]
    pub async fn health_check(&self) -> HealthResponse {
        let db_health = match self.payments.health_check().await {
            Ok(()) => HealthStatus::Healthy,
            Err(_) => HealthStatus::Unhealthy,
        };
        let proof_health = match self.proof_recorder.health_check().await {
            Ok(()) => HealthStatus::Healthy,
            Err(_) => HealthStatus::Unhealthy,
        };
        HealthResponse::new(db_health, proof_health)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// One webhook event per active endpoint subscribed to `event_type`,
    /// keyed so a retried call for the same logical transition collapses.
    async fn payment_fanout(
        &self,
        snapshot: &Payment,
        event_type: EventType,
        revision: i32,
    ) -> Result<Vec<NewWebhookEvent>, AppError> {
        let endpoints = self
            .endpoints
            .subscribed_endpoints(&snapshot.merchant_ref, event_type)
            .await?;
        let payload = serde_json::to_value(snapshot)
            .map_err(|e| AppError::Serialization(e.to_string()))?;
        Ok(endpoints
            .into_iter()
            .map(|ep| {
                NewWebhookEvent::new(ep.id, event_type, payload.clone(), &snapshot.id, revision)
            })
            .collect())
    }

    async fn invoice_fanout(
        &self,
        snapshot: &Invoice,
        event_type: EventType,
        revision: i32,
    ) -> Result<Vec<NewWebhookEvent>, AppError> {
        let endpoints = self
            .endpoints
            .subscribed_endpoints(&snapshot.merchant_ref, event_type)
            .await?;
        let payload = serde_json::to_value(snapshot)
            .map_err(|e| AppError::Serialization(e.to_string()))?;
        Ok(endpoints
            .into_iter()
            .map(|ep| {
                NewWebhookEvent::new(ep.id, event_type, payload.clone(), &snapshot.id, revision)
            })
            .collect())
    }

    /// Best-effort notarization. Every outcome is logged and swallowed so
    /// the bridge can never affect payment status or webhook delivery.
    fn spawn_proof_recording(&self, payment: Payment) {
        let recorder = Arc::clone(&self.proof_recorder);
        tokio::spawn(async move {
            if !recorder.is_eligible(&payment) {
                debug!(id = %payment.id, "Payment not eligible for proof recording");
                return;
            }
            match recorder.record_proof(&payment).await {
                Ok(Some(reference)) => {
                    info!(id = %payment.id, proof = %reference, "Proof recorded");
                }
                Ok(None) => {
                    debug!(id = %payment.id, "Proof bridge returned no reference");
                }
                Err(e) => {
                    warn!(id = %payment.id, error = %e, "Proof recording failed; continuing");
                }
            }
        });
    }
}
