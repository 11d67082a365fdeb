//! Background webhook dispatcher.
//!
//! Claims deliverable events from the event store, POSTs signed envelopes to
//! subscriber URLs, and records each outcome back through the store's atomic
//! claim/record operations. The claim contract returns at most one event per
//! endpoint, so endpoints are served in parallel while each endpoint sees
//! strictly FIFO, one-in-flight delivery.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::header::CONTENT_TYPE;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::{
    AppError, DeliveryStatus, RetryPolicy, WebhookEndpoint, WebhookEndpointRepository,
    WebhookEnvelope, WebhookEvent, WebhookEventRepository,
    types::AttemptOutcome,
};
use crate::infra::signature::{self, EVENT_ID_HEADER, SIGNATURE_HEADER};

/// Stored response bodies are truncated to this many bytes.
const MAX_RESPONSE_BODY_BYTES: usize = 1024;

/// Dispatcher configuration, built once at process start.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub enabled: bool,
    /// Delay between claim cycles
    pub poll_interval: Duration,
    /// Maximum events claimed per cycle
    pub batch_size: i64,
    /// Claims older than this are treated as abandoned and re-claimed
    pub visibility_timeout: Duration,
    /// Per-request delivery timeout
    pub delivery_timeout: Duration,
    /// Retry/backoff policy applied when recording attempts
    pub retry_policy: RetryPolicy,
    /// Consecutive terminal failures before an endpoint is auto-deactivated
    pub endpoint_failure_threshold: i32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval: Duration::from_secs(5),
            batch_size: 20,
            visibility_timeout: Duration::from_secs(120),
            delivery_timeout: Duration::from_secs(10),
            retry_policy: RetryPolicy::default(),
            endpoint_failure_threshold: 3,
        }
    }
}

/// Pulls deliverable events and turns them into signed HTTP deliveries.
pub struct WebhookDispatcher {
    events: Arc<dyn WebhookEventRepository>,
    endpoints: Arc<dyn WebhookEndpointRepository>,
    config: DispatcherConfig,
    http_client: reqwest::Client,
}

impl WebhookDispatcher {
    pub fn new(
        events: Arc<dyn WebhookEventRepository>,
        endpoints: Arc<dyn WebhookEndpointRepository>,
        config: DispatcherConfig,
    ) -> Result<Self, AppError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.delivery_timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            events,
            endpoints,
            config,
            http_client,
        })
    }

    /// Claim and deliver one batch. Returns the number of events processed.
    #[instrument(skip_all)]
    pub async fn run_cycle(self: Arc<Self>) -> Result<usize, AppError> {
        let claimed = self
            .events
            .claim_next_deliverable(
                self.config.batch_size,
                Utc::now(),
                self.config.visibility_timeout,
                self.config.retry_policy.max_attempts,
            )
            .await?;
        if claimed.is_empty() {
            return Ok(0);
        }

        debug!(count = claimed.len(), "Claimed events for delivery");

        // One event per endpoint by the claim contract, so these deliveries
        // never race on the same endpoint.
        let mut deliveries = tokio::task::JoinSet::new();
        for event in claimed {
            let dispatcher = Arc::clone(&self);
            deliveries.spawn(async move { dispatcher.deliver(event).await });
        }
        let mut processed = 0;
        while let Some(result) = deliveries.join_next().await {
            if result.is_ok() {
                processed += 1;
            }
        }
        Ok(processed)
    }

    /// Deliver a single claimed event and record the outcome.
    #[instrument(skip(self, event), fields(event_id = %event.id, endpoint_id = %event.endpoint_id))]
    async fn deliver(&self, event: WebhookEvent) {
        let endpoint = match self.endpoints.get_endpoint(&event.endpoint_id).await {
            Ok(Some(endpoint)) => endpoint,
            Ok(None) => {
                // Endpoints are never hard-deleted while events reference
                // them; treat a missing one as a transport failure.
                warn!("Endpoint missing for claimed event");
                self.record(&event, AttemptOutcome::transport_error("endpoint missing"))
                    .await;
                return;
            }
            Err(e) => {
                error!(error = %e, "Failed to load endpoint; releasing claim to the reclaimer");
                return;
            }
        };

        let outcome = match self.post_signed(&event, &endpoint).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "Failed to build delivery request");
                AttemptOutcome::transport_error(e.to_string())
            }
        };
        self.record(&event, outcome).await;
    }

    /// Serialize the envelope once, sign those exact bytes, and POST them.
    async fn post_signed(
        &self,
        event: &WebhookEvent,
        endpoint: &WebhookEndpoint,
    ) -> Result<AttemptOutcome, AppError> {
        let envelope = WebhookEnvelope {
            id: event.id.clone(),
            event_type: event.event_type,
            payload: event.payload.clone(),
            timestamp: Utc::now().to_rfc3339(),
        };
        let body = serde_json::to_vec(&envelope)
            .map_err(|e| AppError::Serialization(e.to_string()))?;
        let sig = signature::sign(&endpoint.secret, &body);

        let response = self
            .http_client
            .post(&endpoint.url)
            .header(CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, sig)
            .header(EVENT_ID_HEADER, &event.id)
            .body(body)
            .send()
            .await;

        match response {
            Ok(response) => {
                let code = response.status().as_u16() as i32;
                let body = response.text().await.unwrap_or_default();
                Ok(AttemptOutcome::response(code, truncate_body(body)))
            }
            Err(e) if e.is_timeout() => {
                Ok(AttemptOutcome::transport_error(format!("timeout: {e}")))
            }
            Err(e) => Ok(AttemptOutcome::transport_error(e.to_string())),
        }
    }

    /// Record the attempt and apply endpoint failure bookkeeping.
    async fn record(&self, event: &WebhookEvent, outcome: AttemptOutcome) {
        let updated = match self
            .events
            .record_attempt(&event.id, &outcome, &self.config.retry_policy, Utc::now())
            .await
        {
            Ok(updated) => updated,
            Err(e) => {
                // The stale-claim reclaimer will make the event deliverable again
                error!(event_id = %event.id, error = %e, "Failed to record attempt");
                return;
            }
        };

        match updated.delivery_status {
            DeliveryStatus::Delivered => {
                info!(
                    event_id = %updated.id,
                    attempts = updated.attempts,
                    "Webhook delivered"
                );
                self.record_endpoint_result(&updated.endpoint_id, true).await;
            }
            DeliveryStatus::Failed if updated.is_terminal_failure() => {
                warn!(
                    event_id = %updated.id,
                    attempts = updated.attempts,
                    response_code = ?updated.response_code,
                    "Webhook delivery terminally failed"
                );
                self.record_endpoint_result(&updated.endpoint_id, false).await;
            }
            _ => {
                debug!(
                    event_id = %updated.id,
                    attempts = updated.attempts,
                    next_attempt_at = ?updated.next_attempt_at,
                    "Webhook delivery failed; retry scheduled"
                );
            }
        }
    }

    async fn record_endpoint_result(&self, endpoint_id: &str, success: bool) {
        match self
            .endpoints
            .record_delivery_result(endpoint_id, success, self.config.endpoint_failure_threshold)
            .await
        {
            Ok(true) => {
                warn!(endpoint_id = %endpoint_id, "Endpoint auto-deactivated after repeated failures");
            }
            Ok(false) => {}
            Err(e) => {
                error!(endpoint_id = %endpoint_id, error = %e, "Failed to update endpoint failure counter");
            }
        }
    }
}

/// Spawn the dispatcher loop. Returns the task handle and a shutdown sender;
/// sending `true` stops the loop at the next claim boundary, leaving any
/// in-flight claims to the visibility-timeout reclaimer.
pub fn spawn_dispatcher(
    dispatcher: Arc<WebhookDispatcher>,
) -> (JoinHandle<()>, watch::Sender<bool>) {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let poll_interval = dispatcher.config.poll_interval;

    let handle = tokio::spawn(async move {
        info!(interval = ?poll_interval, "Webhook dispatcher started");
        let mut interval = tokio::time::interval(poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match Arc::clone(&dispatcher).run_cycle().await {
                        Ok(0) => {}
                        Ok(count) => debug!(count, "Dispatch cycle complete"),
                        Err(e) => error!(error = %e, "Dispatch cycle failed"),
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Webhook dispatcher shutting down");
                        break;
                    }
                }
            }
        }
    });

    (handle, shutdown_tx)
}

fn truncate_body(body: String) -> String {
    if body.len() <= MAX_RESPONSE_BODY_BYTES {
        return body;
    }
    let mut end = MAX_RESPONSE_BODY_BYTES;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatcher_config_default() {
        let config = DispatcherConfig::default();
        assert!(config.enabled);
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.batch_size, 20);
        assert_eq!(config.visibility_timeout, Duration::from_secs(120));
        assert_eq!(config.delivery_timeout, Duration::from_secs(10));
        assert_eq!(config.endpoint_failure_threshold, 3);
        assert_eq!(config.retry_policy.max_attempts, 5);
    }

    #[test]
    fn test_truncate_body_limits_length() {
        let long = "x".repeat(5000);
        assert_eq!(truncate_body(long).len(), MAX_RESPONSE_BODY_BYTES);

        let short = "ok".to_string();
        assert_eq!(truncate_body(short), "ok");
    }

    #[test]
    fn test_truncate_body_respects_char_boundaries() {
        // Multi-byte characters straddling the cut must not panic
        let body = "é".repeat(MAX_RESPONSE_BODY_BYTES);
        let truncated = truncate_body(body);
        assert!(truncated.len() <= MAX_RESPONSE_BODY_BYTES);
    }
}
