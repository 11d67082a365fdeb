//! Application state management.

use std::sync::Arc;

use crate::domain::{
    InvoiceRepository, PaymentRepository, ProofRecorder, RefundRepository,
    WebhookEndpointRepository, WebhookEventRepository,
};

use super::service::PaymentService;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<PaymentService>,
    pub payments: Arc<dyn PaymentRepository>,
    pub invoices: Arc<dyn InvoiceRepository>,
    pub refunds: Arc<dyn RefundRepository>,
    pub endpoints: Arc<dyn WebhookEndpointRepository>,
    pub events: Arc<dyn WebhookEventRepository>,
    pub proof_recorder: Arc<dyn ProofRecorder>,
}

impl AppState {
    /// Create a new application state
    #[must_use]
    pub fn new(
        payments: Arc<dyn PaymentRepository>,
        invoices: Arc<dyn InvoiceRepository>,
        refunds: Arc<dyn RefundRepository>,
        endpoints: Arc<dyn WebhookEndpointRepository>,
        events: Arc<dyn WebhookEventRepository>,
        proof_recorder: Arc<dyn ProofRecorder>,
    ) -> Self {
        let service = Arc::new(PaymentService::new(
            Arc::clone(&payments),
            Arc::clone(&invoices),
            Arc::clone(&refunds),
            Arc::clone(&endpoints),
            Arc::clone(&events),
            Arc::clone(&proof_recorder),
        ));
        Self {
            service,
            payments,
            invoices,
            refunds,
            endpoints,
            events,
            proof_recorder,
        }
    }
}
