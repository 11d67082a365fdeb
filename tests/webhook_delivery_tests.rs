//! Delivery tests for the webhook dispatcher.
//!
//! Uses `wiremock` as the receiving endpoint and the in-memory store as the
//! event source, driving real dispatch cycles through claim, signed POST,
//! and outcome recording.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use merchant_payment_gateway::app::{DispatcherConfig, WebhookDispatcher};
use merchant_payment_gateway::domain::{
    DeliveryStatus, EventType, NewWebhookEvent, RetryPolicy, WebhookEndpoint,
    WebhookEndpointRepository, WebhookEvent, WebhookEventRepository,
};
use merchant_payment_gateway::infra::signature;
use merchant_payment_gateway::test_utils::MockStore;

const SECRET: &str = "endpoint-secret-0123456789abcdef";

/// Backoff collapses to the one-second floor so retries become eligible as
/// soon as the test rewinds `next_attempt_at`.
fn test_policy(max_attempts: i32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_backoff_secs: 0,
        max_backoff_secs: 0,
        jitter_secs: 0,
    }
}

fn test_dispatcher(
    store: &Arc<MockStore>,
    max_attempts: i32,
    failure_threshold: i32,
) -> Arc<WebhookDispatcher> {
    let config = DispatcherConfig {
        retry_policy: test_policy(max_attempts),
        delivery_timeout: Duration::from_secs(5),
        endpoint_failure_threshold: failure_threshold,
        ..DispatcherConfig::default()
    };
    Arc::new(
        WebhookDispatcher::new(
            Arc::clone(store) as Arc<dyn WebhookEventRepository>,
            Arc::clone(store) as Arc<dyn WebhookEndpointRepository>,
            config,
        )
        .expect("dispatcher builds"),
    )
}

async fn register_endpoint(store: &MockStore, url: &str, id: &str) -> WebhookEndpoint {
    let endpoint = WebhookEndpoint::new(
        id.to_string(),
        "merchant_1".to_string(),
        url.to_string(),
        vec![EventType::PaymentConfirmed],
        SECRET.to_string(),
    );
    store.insert_endpoint(&endpoint).await.unwrap();
    endpoint
}

async fn queue_event(store: &MockStore, endpoint_id: &str, revision: i32) -> WebhookEvent {
    let new_event = NewWebhookEvent::new(
        endpoint_id.to_string(),
        EventType::PaymentConfirmed,
        json!({"id": "pay_1", "amount": "100.00", "currency": "USDC"}),
        "pay_1",
        revision,
    );
    let event = store.create_event(&new_event).await.unwrap();
    // Spread creation timestamps so FIFO order is unambiguous
    tokio::time::sleep(Duration::from_millis(5)).await;
    event
}

/// Rewind every scheduled retry so the next cycle can claim it immediately.
fn expire_backoffs(store: &MockStore) {
    for mut event in store.get_all_events() {
        if event.next_attempt_at.is_some() {
            event.next_attempt_at = Some(Utc::now() - chrono::Duration::seconds(1));
            store.upsert_event(event);
        }
    }
}

#[tokio::test]
async fn test_successful_delivery_is_recorded() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MockStore::new());
    let endpoint = register_endpoint(&store, &format!("{}/hook", server.uri()), "ep_1").await;
    let event = queue_event(&store, &endpoint.id, 1).await;

    let dispatcher = test_dispatcher(&store, 5, 3);
    let processed = dispatcher.clone().run_cycle().await.unwrap();
    assert_eq!(processed, 1);

    let delivered = store.get_event(&event.id).await.unwrap().unwrap();
    assert_eq!(delivered.delivery_status, DeliveryStatus::Delivered);
    assert_eq!(delivered.attempts, 1);
    assert_eq!(delivered.response_code, Some(200));
    assert!(delivered.in_flight_at.is_none());
}

#[tokio::test]
async fn test_signature_covers_exact_wire_bytes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let store = Arc::new(MockStore::new());
    let endpoint = register_endpoint(&store, &server.uri(), "ep_1").await;
    let event = queue_event(&store, &endpoint.id, 1).await;

    let dispatcher = test_dispatcher(&store, 5, 3);
    dispatcher.clone().run_cycle().await.unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];

    let sig = request
        .headers
        .get("X-Webhook-Signature")
        .expect("signature header present")
        .to_str()
        .unwrap();
    let event_id = request
        .headers
        .get("X-Webhook-Event-Id")
        .expect("event id header present")
        .to_str()
        .unwrap();
    assert_eq!(event_id, event.id);

    // The receiver verifies against the raw body bytes it was sent
    assert!(signature::verify(SECRET, &request.body, sig));

    let envelope: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
    assert_eq!(envelope["id"], event.id.as_str());
    assert_eq!(envelope["eventType"], "payment.confirmed");
    assert_eq!(envelope["payload"]["amount"], "100.00");
    assert!(envelope["timestamp"].is_string());
}

/// Receiver returns 500 twice, then 200: the event ends `delivered` with
/// attempts == 3.
#[tokio::test]
async fn test_delivery_succeeds_on_third_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let store = Arc::new(MockStore::new());
    let endpoint = register_endpoint(&store, &server.uri(), "ep_1").await;
    let event = queue_event(&store, &endpoint.id, 1).await;

    let dispatcher = test_dispatcher(&store, 5, 3);

    dispatcher.clone().run_cycle().await.unwrap();
    let after_first = store.get_event(&event.id).await.unwrap().unwrap();
    assert_eq!(after_first.delivery_status, DeliveryStatus::Failed);
    assert_eq!(after_first.attempts, 1);
    assert!(after_first.next_attempt_at.is_some(), "retry scheduled");

    // Still in backoff: a cycle right now claims nothing
    assert_eq!(dispatcher.clone().run_cycle().await.unwrap(), 0);

    expire_backoffs(&store);
    dispatcher.clone().run_cycle().await.unwrap();
    expire_backoffs(&store);
    dispatcher.clone().run_cycle().await.unwrap();

    let final_event = store.get_event(&event.id).await.unwrap().unwrap();
    assert_eq!(final_event.delivery_status, DeliveryStatus::Delivered);
    assert_eq!(final_event.attempts, 3);
}

/// Five consecutive failures exhaust the retry budget: terminal `failed`
/// with attempts == 5 and no further automatic attempts.
#[tokio::test]
async fn test_retry_budget_exhaustion_is_terminal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let store = Arc::new(MockStore::new());
    let endpoint = register_endpoint(&store, &server.uri(), "ep_1").await;
    let event = queue_event(&store, &endpoint.id, 1).await;

    let dispatcher = test_dispatcher(&store, 5, 10);
    for _ in 0..5 {
        expire_backoffs(&store);
        dispatcher.clone().run_cycle().await.unwrap();
    }

    let failed = store.get_event(&event.id).await.unwrap().unwrap();
    assert_eq!(failed.delivery_status, DeliveryStatus::Failed);
    assert_eq!(failed.attempts, 5);
    assert!(failed.next_attempt_at.is_none(), "no retry scheduled");
    assert!(failed.is_terminal_failure());
    // Audit fields survive terminal status
    assert_eq!(failed.response_code, Some(503));
    assert!(failed.last_attempt_at.is_some());

    // Nothing left to claim
    expire_backoffs(&store);
    assert_eq!(dispatcher.clone().run_cycle().await.unwrap(), 0);
    let unchanged = store.get_event(&event.id).await.unwrap().unwrap();
    assert_eq!(unchanged.attempts, 5);
}

#[tokio::test]
async fn test_gone_response_fails_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(410))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MockStore::new());
    let endpoint = register_endpoint(&store, &server.uri(), "ep_1").await;
    let event = queue_event(&store, &endpoint.id, 1).await;

    let dispatcher = test_dispatcher(&store, 5, 10);
    dispatcher.clone().run_cycle().await.unwrap();

    let failed = store.get_event(&event.id).await.unwrap().unwrap();
    assert_eq!(failed.delivery_status, DeliveryStatus::Failed);
    assert_eq!(failed.attempts, 1);
    assert!(failed.is_terminal_failure());
}

/// Three terminally failed deliveries in a row cross the policy threshold
/// and soft-deactivate the endpoint; remaining queued events stop being
/// claimed.
#[tokio::test]
async fn test_repeated_terminal_failures_deactivate_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(410))
        .mount(&server)
        .await;

    let store = Arc::new(MockStore::new());
    let endpoint = register_endpoint(&store, &server.uri(), "ep_1").await;
    for revision in 1..=4 {
        queue_event(&store, &endpoint.id, revision).await;
    }

    let dispatcher = test_dispatcher(&store, 5, 3);
    // One event per endpoint per cycle; each goes terminal on its 410
    for _ in 0..3 {
        assert_eq!(dispatcher.clone().run_cycle().await.unwrap(), 1);
    }

    let endpoint = store.get_endpoint(&endpoint.id).await.unwrap().unwrap();
    assert!(!endpoint.active);
    assert_eq!(endpoint.consecutive_failures, 3);

    // The fourth event stays pending and unclaimed
    assert_eq!(dispatcher.clone().run_cycle().await.unwrap(), 0);
    let pending = store
        .get_all_events()
        .into_iter()
        .filter(|e| e.delivery_status == DeliveryStatus::Pending)
        .count();
    assert_eq!(pending, 1);
}

#[tokio::test]
async fn test_success_resets_failure_counter() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(410))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let store = Arc::new(MockStore::new());
    let endpoint = register_endpoint(&store, &server.uri(), "ep_1").await;
    queue_event(&store, &endpoint.id, 1).await;
    queue_event(&store, &endpoint.id, 2).await;

    let dispatcher = test_dispatcher(&store, 5, 3);
    dispatcher.clone().run_cycle().await.unwrap(); // 410 -> terminal, counter 1
    dispatcher.clone().run_cycle().await.unwrap(); // 200 -> delivered, counter reset

    let endpoint = store.get_endpoint(&endpoint.id).await.unwrap().unwrap();
    assert!(endpoint.active);
    assert_eq!(endpoint.consecutive_failures, 0);
}

/// Events for the same endpoint are delivered strictly in creation order,
/// one in flight at a time; separate endpoints proceed in parallel.
#[tokio::test]
async fn test_per_endpoint_fifo_and_cross_endpoint_parallelism() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let store = Arc::new(MockStore::new());
    let endpoint_a = register_endpoint(&store, &server.uri(), "ep_a").await;
    let endpoint_b = register_endpoint(&store, &server.uri(), "ep_b").await;
    let first_a = queue_event(&store, &endpoint_a.id, 1).await;
    let second_a = queue_event(&store, &endpoint_a.id, 2).await;
    let first_b = queue_event(&store, &endpoint_b.id, 1).await;

    let dispatcher = test_dispatcher(&store, 5, 3);

    // Cycle 1: one event per endpoint - a's oldest plus b's only event
    assert_eq!(dispatcher.clone().run_cycle().await.unwrap(), 2);
    let after_first = store.get_event(&first_a.id).await.unwrap().unwrap();
    let still_pending = store.get_event(&second_a.id).await.unwrap().unwrap();
    let b_done = store.get_event(&first_b.id).await.unwrap().unwrap();
    assert_eq!(after_first.delivery_status, DeliveryStatus::Delivered);
    assert_eq!(still_pending.delivery_status, DeliveryStatus::Pending);
    assert_eq!(b_done.delivery_status, DeliveryStatus::Delivered);

    // Cycle 2 drains the rest of a's queue
    assert_eq!(dispatcher.clone().run_cycle().await.unwrap(), 1);
    let drained = store.get_event(&second_a.id).await.unwrap().unwrap();
    assert_eq!(drained.delivery_status, DeliveryStatus::Delivered);
}

/// An earlier event stuck in backoff blocks later events for the same
/// endpoint: the dispatcher never skips ahead.
#[tokio::test]
async fn test_backoff_blocks_later_events_for_same_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let store = Arc::new(MockStore::new());
    let endpoint = register_endpoint(&store, &server.uri(), "ep_1").await;
    let first = queue_event(&store, &endpoint.id, 1).await;
    let second = queue_event(&store, &endpoint.id, 2).await;

    let dispatcher = test_dispatcher(&store, 5, 3);
    dispatcher.clone().run_cycle().await.unwrap(); // first fails with 500

    // While the first event waits out its backoff, the second must not jump
    // the queue
    assert_eq!(dispatcher.clone().run_cycle().await.unwrap(), 0);
    let untouched = store.get_event(&second.id).await.unwrap().unwrap();
    assert_eq!(untouched.delivery_status, DeliveryStatus::Pending);
    assert_eq!(untouched.attempts, 0);

    expire_backoffs(&store);
    dispatcher.clone().run_cycle().await.unwrap(); // first retries and succeeds
    dispatcher.clone().run_cycle().await.unwrap(); // then the second goes out

    let first = store.get_event(&first.id).await.unwrap().unwrap();
    let second = store.get_event(&second.id).await.unwrap().unwrap();
    assert_eq!(first.delivery_status, DeliveryStatus::Delivered);
    assert_eq!(second.delivery_status, DeliveryStatus::Delivered);
    assert!(first.last_attempt_at <= second.last_attempt_at);
}

/// A claim abandoned mid-delivery (simulated crash) becomes claimable again
/// once the visibility timeout elapses, and only one claimant gets it.
#[tokio::test]
async fn test_stale_claim_is_reclaimed_exactly_once() {
    let store = Arc::new(MockStore::new());
    let endpoint = register_endpoint(&store, "https://unreachable.example.com", "ep_1").await;
    let event = queue_event(&store, &endpoint.id, 1).await;

    let visibility = Duration::from_secs(120);
    let now = Utc::now();

    // First worker claims, then crashes without recording
    let claimed = store
        .claim_next_deliverable(10, now, visibility, 5)
        .await
        .unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, event.id);

    // Within the visibility window the claim is honored
    let blocked = store
        .claim_next_deliverable(10, now + chrono::Duration::seconds(30), visibility, 5)
        .await
        .unwrap();
    assert!(blocked.is_empty());

    // Past the window the event is deliverable again, to one claimant only
    let later = now + chrono::Duration::seconds(121);
    let reclaimed = store
        .claim_next_deliverable(10, later, visibility, 5)
        .await
        .unwrap();
    assert_eq!(reclaimed.len(), 1);
    assert_eq!(reclaimed[0].id, event.id);
    let second = store
        .claim_next_deliverable(10, later, visibility, 5)
        .await
        .unwrap();
    assert!(second.is_empty());
}

/// Operator replay re-enters the pipeline as a fresh attempt and can
/// succeed against a recovered receiver.
#[tokio::test]
async fn test_replayed_event_is_redelivered() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let store = Arc::new(MockStore::new());
    let endpoint = register_endpoint(&store, &server.uri(), "ep_1").await;
    let event = queue_event(&store, &endpoint.id, 1).await;

    // One attempt allowed: the 500 is immediately terminal
    let dispatcher = test_dispatcher(&store, 1, 10);
    dispatcher.clone().run_cycle().await.unwrap();
    let failed = store.get_event(&event.id).await.unwrap().unwrap();
    assert!(failed.is_terminal_failure());

    let replayed = store.replay_event(&event.id).await.unwrap();
    assert_eq!(replayed.delivery_status, DeliveryStatus::Pending);
    assert_eq!(replayed.attempts, 0);

    dispatcher.clone().run_cycle().await.unwrap();
    let delivered = store.get_event(&event.id).await.unwrap().unwrap();
    assert_eq!(delivered.delivery_status, DeliveryStatus::Delivered);
    assert_eq!(delivered.attempts, 1);
}
