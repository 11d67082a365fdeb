//! Mock implementations for testing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::domain::{
    AppError, DatabaseError, EventType, Invoice, InvoiceRepository, InvoiceStatus,
    NewWebhookEvent, PaginatedResponse, Payment, PaymentRepository, PaymentStatus, ProofRecorder,
    Refund, RefundRepository, RefundStatus, RetryPolicy, TransitionError, ValidationError,
    WebhookEndpoint, WebhookEndpointRepository, WebhookEvent, WebhookEventRepository,
    types::{AttemptDisposition, AttemptOutcome, DeliveryStatus},
};

/// Configuration for mock behavior
#[derive(Debug, Clone, Default)]
pub struct MockConfig {
    pub should_fail: bool,
    pub error_message: Option<String>,
}

impl MockConfig {
    #[must_use]
    pub fn success() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            should_fail: true,
            error_message: Some(message.into()),
        }
    }
}

/// In-memory store implementing every repository trait, mirroring the
/// semantics of the Postgres client (idempotent event creation, per-endpoint
/// FIFO claims, visibility-timeout reclaim).
pub struct MockStore {
    payments: Mutex<HashMap<String, Payment>>,
    invoices: Mutex<HashMap<String, Invoice>>,
    refunds: Mutex<HashMap<String, Refund>>,
    endpoints: Mutex<HashMap<String, WebhookEndpoint>>,
    events: Mutex<HashMap<String, WebhookEvent>>,
    config: MockConfig,
    is_healthy: AtomicBool,
}

impl MockStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MockConfig::success())
    }

    #[must_use]
    pub fn with_config(config: MockConfig) -> Self {
        Self {
            payments: Mutex::new(HashMap::new()),
            invoices: Mutex::new(HashMap::new()),
            refunds: Mutex::new(HashMap::new()),
            endpoints: Mutex::new(HashMap::new()),
            events: Mutex::new(HashMap::new()),
            config,
            is_healthy: AtomicBool::new(true),
        }
    }

    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_config(MockConfig::failure(message))
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.is_healthy.store(healthy, Ordering::Relaxed);
    }

    /// All stored events (for testing)
    pub fn get_all_events(&self) -> Vec<WebhookEvent> {
        self.events.lock().unwrap().values().cloned().collect()
    }

    /// Overwrite an event record directly (for testing, e.g. to expire a
    /// backoff window without waiting for it)
    pub fn upsert_event(&self, event: WebhookEvent) {
        self.events.lock().unwrap().insert(event.id.clone(), event);
    }

    fn check_should_fail(&self) -> Result<(), AppError> {
        if self.config.should_fail {
            let msg = self
                .config
                .error_message
                .clone()
                .unwrap_or_else(|| "Mock error".to_string());
            return Err(AppError::Database(DatabaseError::Query(msg)));
        }
        Ok(())
    }

    /// Insert events, skipping idempotency-key duplicates like the
    /// database unique constraint does.
    fn insert_events_locked(
        events: &mut HashMap<String, WebhookEvent>,
        new_events: &[NewWebhookEvent],
        now: DateTime<Utc>,
    ) {
        for new_event in new_events {
            let duplicate = events
                .values()
                .any(|e| e.idempotency_key == new_event.idempotency_key);
            if duplicate {
                continue;
            }
            events.insert(
                new_event.id.clone(),
                WebhookEvent {
                    id: new_event.id.clone(),
                    endpoint_id: new_event.endpoint_id.clone(),
                    event_type: new_event.event_type,
                    payload: new_event.payload.clone(),
                    delivery_status: DeliveryStatus::Pending,
                    attempts: 0,
                    last_attempt_at: None,
                    response_code: None,
                    response_body: None,
                    next_attempt_at: None,
                    in_flight_at: None,
                    idempotency_key: new_event.idempotency_key.clone(),
                    created_at: now,
                },
            );
        }
    }

    fn paginate<T: Clone>(
        mut items: Vec<T>,
        limit: i64,
        cursor: Option<&str>,
        id_of: impl Fn(&T) -> &str,
        created_at_of: impl Fn(&T) -> DateTime<Utc>,
    ) -> Result<PaginatedResponse<T>, AppError>
    where
        T: utoipa::ToSchema,
    {
        items.sort_by(|a, b| {
            created_at_of(b)
                .cmp(&created_at_of(a))
                .then_with(|| id_of(b).cmp(id_of(a)))
        });

        let items = if let Some(cursor_id) = cursor {
            let pos = items.iter().position(|i| id_of(i) == cursor_id);
            match pos {
                Some(p) => items.into_iter().skip(p + 1).collect(),
                None => {
                    return Err(AppError::Validation(ValidationError::InvalidField {
                        field: "cursor".to_string(),
                        message: "Invalid cursor".to_string(),
                    }));
                }
            }
        } else {
            items
        };

        let limit = limit.clamp(1, 100) as usize;
        let has_more = items.len() > limit;
        let items: Vec<T> = items.into_iter().take(limit).collect();
        let next_cursor = if has_more {
            items.last().map(|i| id_of(i).to_string())
        } else {
            None
        };

        Ok(PaginatedResponse::new(items, next_cursor, has_more))
    }
}

impl Default for MockStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentRepository for MockStore {
    async fn health_check(&self) -> Result<(), AppError> {
        if !self.is_healthy.load(Ordering::Relaxed) {
            return Err(AppError::Database(DatabaseError::Connection(
                "Unhealthy".to_string(),
            )));
        }
        self.check_should_fail()
    }

    async fn insert_payment(
        &self,
        payment: &Payment,
        events: &[NewWebhookEvent],
    ) -> Result<(), AppError> {
        self.check_should_fail()?;
        let mut payments = self.payments.lock().unwrap();
        let mut stored_events = self.events.lock().unwrap();
        payments.insert(payment.id.clone(), payment.clone());
        Self::insert_events_locked(&mut stored_events, events, payment.created_at);
        Ok(())
    }

    async fn get_payment(&self, id: &str) -> Result<Option<Payment>, AppError> {
        self.check_should_fail()?;
        Ok(self.payments.lock().unwrap().get(id).cloned())
    }

    async fn list_payments(
        &self,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<PaginatedResponse<Payment>, AppError> {
        self.check_should_fail()?;
        let items: Vec<Payment> = self.payments.lock().unwrap().values().cloned().collect();
        Self::paginate(items, limit, cursor, |p| &p.id, |p| p.created_at)
    }

    async fn apply_transition(
        &self,
        id: &str,
        target: PaymentStatus,
        tx_hash: Option<&str>,
        settlement_duration_secs: Option<i64>,
        expected_version: i32,
        events: &[NewWebhookEvent],
    ) -> Result<Payment, AppError> {
        self.check_should_fail()?;
        let mut payments = self.payments.lock().unwrap();
        let mut stored_events = self.events.lock().unwrap();
        let payment = payments
            .get_mut(id)
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound(id.to_string())))?;

        if payment.version != expected_version {
            return Err(AppError::Transition(TransitionError::ConcurrentModification {
                id: id.to_string(),
                expected: expected_version,
            }));
        }
        if let (Some(incoming), Some(existing)) = (tx_hash, payment.tx_hash.as_deref()) {
            if incoming != existing {
                return Err(AppError::Transition(TransitionError::TxHashAlreadySet(
                    id.to_string(),
                )));
            }
        }

        let now = Utc::now();
        payment.status = target;
        if payment.tx_hash.is_none() {
            payment.tx_hash = tx_hash.map(String::from);
        }
        if settlement_duration_secs.is_some() {
            payment.settlement_duration_secs = settlement_duration_secs;
        }
        payment.version += 1;
        payment.updated_at = now;
        let updated = payment.clone();

        Self::insert_events_locked(&mut stored_events, events, now);
        Ok(updated)
    }
}

#[async_trait]
impl InvoiceRepository for MockStore {
    async fn insert_invoice(
        &self,
        invoice: &Invoice,
        events: &[NewWebhookEvent],
    ) -> Result<(), AppError> {
        self.check_should_fail()?;
        let mut invoices = self.invoices.lock().unwrap();
        let duplicate = invoices.values().any(|i| {
            i.merchant_ref == invoice.merchant_ref && i.invoice_number == invoice.invoice_number
        });
        if duplicate {
            return Err(AppError::Database(DatabaseError::Duplicate(format!(
                "invoice number {} already exists",
                invoice.invoice_number
            ))));
        }
        let mut stored_events = self.events.lock().unwrap();
        invoices.insert(invoice.id.clone(), invoice.clone());
        Self::insert_events_locked(&mut stored_events, events, invoice.created_at);
        Ok(())
    }

    async fn get_invoice(&self, id: &str) -> Result<Option<Invoice>, AppError> {
        self.check_should_fail()?;
        Ok(self.invoices.lock().unwrap().get(id).cloned())
    }

    async fn list_invoices(
        &self,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<PaginatedResponse<Invoice>, AppError> {
        self.check_should_fail()?;
        let items: Vec<Invoice> = self.invoices.lock().unwrap().values().cloned().collect();
        Self::paginate(items, limit, cursor, |i| &i.id, |i| i.created_at)
    }

    async fn apply_transition(
        &self,
        id: &str,
        target: InvoiceStatus,
        payment_id: Option<&str>,
        events: &[NewWebhookEvent],
    ) -> Result<Invoice, AppError> {
        self.check_should_fail()?;
        let mut invoices = self.invoices.lock().unwrap();
        let mut stored_events = self.events.lock().unwrap();
        let invoice = invoices
            .get_mut(id)
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound(id.to_string())))?;

        if !invoice.status.can_transition_to(target) {
            return Err(AppError::Transition(TransitionError::InvalidTransition {
                from: invoice.status.to_string(),
                to: target.to_string(),
            }));
        }

        let now = Utc::now();
        invoice.status = target;
        if invoice.payment_id.is_none() {
            invoice.payment_id = payment_id.map(String::from);
        }
        invoice.updated_at = now;
        let updated = invoice.clone();

        Self::insert_events_locked(&mut stored_events, events, now);
        Ok(updated)
    }
}

#[async_trait]
impl RefundRepository for MockStore {
    async fn insert_refund(&self, refund: &Refund) -> Result<(), AppError> {
        self.check_should_fail()?;
        self.refunds
            .lock()
            .unwrap()
            .insert(refund.id.clone(), refund.clone());
        Ok(())
    }

    async fn get_refund(&self, id: &str) -> Result<Option<Refund>, AppError> {
        self.check_should_fail()?;
        Ok(self.refunds.lock().unwrap().get(id).cloned())
    }

    async fn list_refunds_for_payment(&self, payment_id: &str) -> Result<Vec<Refund>, AppError> {
        self.check_should_fail()?;
        let mut refunds: Vec<Refund> = self
            .refunds
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.payment_id == payment_id)
            .cloned()
            .collect();
        refunds.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(refunds)
    }

    async fn update_status(
        &self,
        id: &str,
        status: RefundStatus,
        tx_hash: Option<&str>,
    ) -> Result<Refund, AppError> {
        self.check_should_fail()?;
        let mut refunds = self.refunds.lock().unwrap();
        let refund = refunds
            .get_mut(id)
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound(id.to_string())))?;
        refund.status = status;
        if refund.tx_hash.is_none() {
            refund.tx_hash = tx_hash.map(String::from);
        }
        refund.updated_at = Utc::now();
        Ok(refund.clone())
    }
}

#[async_trait]
impl WebhookEndpointRepository for MockStore {
    async fn insert_endpoint(&self, endpoint: &WebhookEndpoint) -> Result<(), AppError> {
        self.check_should_fail()?;
        self.endpoints
            .lock()
            .unwrap()
            .insert(endpoint.id.clone(), endpoint.clone());
        Ok(())
    }

    async fn get_endpoint(&self, id: &str) -> Result<Option<WebhookEndpoint>, AppError> {
        self.check_should_fail()?;
        Ok(self.endpoints.lock().unwrap().get(id).cloned())
    }

    async fn list_endpoints(
        &self,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<PaginatedResponse<WebhookEndpoint>, AppError> {
        self.check_should_fail()?;
        let items: Vec<WebhookEndpoint> =
            self.endpoints.lock().unwrap().values().cloned().collect();
        Self::paginate(items, limit, cursor, |e| &e.id, |e| e.created_at)
    }

    async fn subscribed_endpoints(
        &self,
        merchant_ref: &str,
        event_type: EventType,
    ) -> Result<Vec<WebhookEndpoint>, AppError> {
        self.check_should_fail()?;
        let mut endpoints: Vec<WebhookEndpoint> = self
            .endpoints
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.merchant_ref == merchant_ref && e.is_subscribed(event_type))
            .cloned()
            .collect();
        endpoints.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(endpoints)
    }

    async fn set_active(&self, id: &str, active: bool) -> Result<(), AppError> {
        self.check_should_fail()?;
        let mut endpoints = self.endpoints.lock().unwrap();
        let endpoint = endpoints
            .get_mut(id)
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound(id.to_string())))?;
        endpoint.active = active;
        if active {
            endpoint.consecutive_failures = 0;
        }
        endpoint.updated_at = Utc::now();
        Ok(())
    }

    async fn record_delivery_result(
        &self,
        id: &str,
        success: bool,
        failure_threshold: i32,
    ) -> Result<bool, AppError> {
        self.check_should_fail()?;
        let mut endpoints = self.endpoints.lock().unwrap();
        let endpoint = endpoints
            .get_mut(id)
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound(id.to_string())))?;
        if success {
            endpoint.consecutive_failures = 0;
        } else {
            endpoint.consecutive_failures += 1;
            if endpoint.consecutive_failures >= failure_threshold {
                endpoint.active = false;
            }
        }
        endpoint.updated_at = Utc::now();
        Ok(!endpoint.active)
    }
}

#[async_trait]
impl WebhookEventRepository for MockStore {
    async fn create_event(&self, event: &NewWebhookEvent) -> Result<WebhookEvent, AppError> {
        self.check_should_fail()?;
        let mut events = self.events.lock().unwrap();
        if let Some(existing) = events
            .values()
            .find(|e| e.idempotency_key == event.idempotency_key)
        {
            return Ok(existing.clone());
        }
        Self::insert_events_locked(&mut events, std::slice::from_ref(event), Utc::now());
        Ok(events.get(&event.id).cloned().expect("just inserted"))
    }

    async fn get_event(&self, id: &str) -> Result<Option<WebhookEvent>, AppError> {
        self.check_should_fail()?;
        Ok(self.events.lock().unwrap().get(id).cloned())
    }

    async fn list_events_for_endpoint(
        &self,
        endpoint_id: &str,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<PaginatedResponse<WebhookEvent>, AppError> {
        self.check_should_fail()?;
        let items: Vec<WebhookEvent> = self
            .events
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.endpoint_id == endpoint_id)
            .cloned()
            .collect();
        Self::paginate(items, limit, cursor, |e| &e.id, |e| e.created_at)
    }

    async fn claim_next_deliverable(
        &self,
        limit: i64,
        now: DateTime<Utc>,
        visibility_timeout: Duration,
        max_attempts: i32,
    ) -> Result<Vec<WebhookEvent>, AppError> {
        self.check_should_fail()?;
        let stale_cutoff = now
            - chrono::Duration::from_std(visibility_timeout)
                .unwrap_or_else(|_| chrono::Duration::seconds(120));
        let endpoints = self.endpoints.lock().unwrap();
        let mut events = self.events.lock().unwrap();

        // Oldest undelivered candidate per active endpoint
        let mut oldest: HashMap<String, WebhookEvent> = HashMap::new();
        for event in events.values() {
            let candidate = event.delivery_status == DeliveryStatus::Pending
                || (event.delivery_status == DeliveryStatus::Failed
                    && event.attempts < max_attempts
                    && event.next_attempt_at.is_some());
            if !candidate {
                continue;
            }
            let active = endpoints
                .get(&event.endpoint_id)
                .map(|ep| ep.active)
                .unwrap_or(false);
            if !active {
                continue;
            }
            let replace = match oldest.get(&event.endpoint_id) {
                Some(existing) => {
                    (event.created_at, &event.id) < (existing.created_at, &existing.id)
                }
                None => true,
            };
            if replace {
                oldest.insert(event.endpoint_id.clone(), event.clone());
            }
        }

        // Endpoints with a live in-flight claim are skipped entirely
        let live: HashSet<String> = events
            .values()
            .filter(|e| e.in_flight_at.map(|t| t > stale_cutoff).unwrap_or(false))
            .map(|e| e.endpoint_id.clone())
            .collect();

        let mut claimable: Vec<WebhookEvent> = oldest
            .into_values()
            .filter(|e| !live.contains(&e.endpoint_id))
            .filter(|e| e.in_flight_at.map(|t| t <= stale_cutoff).unwrap_or(true))
            .filter(|e| {
                e.delivery_status == DeliveryStatus::Pending
                    || e.next_attempt_at.map(|t| t <= now).unwrap_or(false)
            })
            .collect();
        claimable.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        claimable.truncate(limit.max(0) as usize);

        let mut claimed = Vec::new();
        for mut event in claimable {
            event.in_flight_at = Some(now);
            events.insert(event.id.clone(), event.clone());
            claimed.push(event);
        }
        Ok(claimed)
    }

    async fn record_attempt(
        &self,
        event_id: &str,
        outcome: &AttemptOutcome,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> Result<WebhookEvent, AppError> {
        self.check_should_fail()?;
        let mut events = self.events.lock().unwrap();
        let event = events
            .get_mut(event_id)
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound(event_id.to_string())))?;

        event.attempts += 1;
        match policy.disposition(outcome, event.attempts, now) {
            AttemptDisposition::Delivered => {
                event.delivery_status = DeliveryStatus::Delivered;
                event.next_attempt_at = None;
            }
            AttemptDisposition::Retry { next_attempt_at } => {
                event.delivery_status = DeliveryStatus::Failed;
                event.next_attempt_at = Some(next_attempt_at);
            }
            AttemptDisposition::TerminalFailure => {
                event.delivery_status = DeliveryStatus::Failed;
                event.next_attempt_at = None;
            }
        }
        event.last_attempt_at = Some(now);
        event.response_code = outcome.response_code;
        event.response_body = outcome
            .response_body
            .clone()
            .or_else(|| outcome.error.clone());
        event.in_flight_at = None;
        Ok(event.clone())
    }

    async fn replay_event(&self, id: &str) -> Result<WebhookEvent, AppError> {
        self.check_should_fail()?;
        let mut events = self.events.lock().unwrap();
        let event = events
            .get_mut(id)
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound(id.to_string())))?;
        if !(event.delivery_status == DeliveryStatus::Failed && event.next_attempt_at.is_none()) {
            return Err(AppError::Validation(ValidationError::InvalidField {
                field: "delivery_status".to_string(),
                message: "Only terminally failed events can be replayed".to_string(),
            }));
        }
        event.delivery_status = DeliveryStatus::Pending;
        event.attempts = 0;
        event.next_attempt_at = None;
        event.in_flight_at = None;
        Ok(event.clone())
    }
}

/// Mock proof recorder that records every invocation
pub struct MockProofRecorder {
    recorded: Arc<Mutex<Vec<String>>>,
    config: MockConfig,
}

impl MockProofRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MockConfig::success())
    }

    #[must_use]
    pub fn with_config(config: MockConfig) -> Self {
        Self {
            recorded: Arc::new(Mutex::new(Vec::new())),
            config,
        }
    }

    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_config(MockConfig::failure(message))
    }

    /// Payment ids this recorder was invoked for (for testing)
    pub fn recorded_payments(&self) -> Vec<String> {
        self.recorded.lock().unwrap().clone()
    }
}

impl Default for MockProofRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProofRecorder for MockProofRecorder {
    async fn record_proof(&self, payment: &Payment) -> Result<Option<String>, AppError> {
        if self.config.should_fail {
            let msg = self
                .config
                .error_message
                .clone()
                .unwrap_or_else(|| "Mock error".to_string());
            return Err(AppError::ExternalService(
                crate::domain::ExternalServiceError::Unavailable(msg),
            ));
        }
        self.recorded.lock().unwrap().push(payment.id.clone());
        Ok(Some(format!("proof_{}", payment.id)))
    }
}
