//! Additional integration tests for specific request flows.

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use chrono::Utc;
use http_body_util::BodyExt;
use serde_json::json;
use std::sync::Arc;
use tower::ServiceExt;

use merchant_payment_gateway::api::create_router;
use merchant_payment_gateway::app::AppState;
use merchant_payment_gateway::domain::{
    DeliveryStatus, Invoice, PaginatedResponse, Payment, WebhookEndpoint, WebhookEvent,
};
use merchant_payment_gateway::test_utils::{MockProofRecorder, MockStore};

fn create_test_state() -> (Arc<AppState>, Arc<MockStore>) {
    let store = Arc::new(MockStore::new());
    let proof = Arc::new(MockProofRecorder::new());
    let state = Arc::new(AppState::new(
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        proof,
    ));
    (state, store)
}

async fn json_request(
    router: &axum::Router,
    method: &str,
    uri: &str,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, value)
}

async fn get_request(router: &axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, value)
}

#[tokio::test]
async fn test_full_invoice_request_flow() {
    let (state, _) = create_test_state();
    let router = create_router(state);

    // 1. POST - create the invoice
    let (status, body) = json_request(
        &router,
        "POST",
        "/invoices",
        json!({
            "merchant_ref": "merchant_1",
            "invoice_number": "INV-2026-0042",
            "amount": "250.00",
            "currency": "USDC",
            "customer_name": "Ada Lovelace",
            "customer_email": "ada@example.com"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let created: Invoice = serde_json::from_value(body).unwrap();
    assert_eq!(created.invoice_number, "INV-2026-0042");

    // 2. GET - retrieve it by id
    let (status, body) = get_request(&router, &format!("/invoices/{}", created.id)).await;
    assert_eq!(status, StatusCode::OK);
    let fetched: Invoice = serde_json::from_value(body).unwrap();
    assert_eq!(fetched.id, created.id);
    assert_eq!(fetched.customer_email.as_deref(), Some("ada@example.com"));

    // 3. GET - the list contains it
    let (status, body) = get_request(&router, "/invoices?limit=10").await;
    assert_eq!(status, StatusCode::OK);
    let list: PaginatedResponse<Invoice> = serde_json::from_value(body).unwrap();
    assert!(list.items.iter().any(|i| i.id == created.id));
}

/// Operator replay flow: a terminally failed event is reset through the API
/// and shows up pending again in the audit trail.
#[tokio::test]
async fn test_event_replay_request_flow() {
    let (state, store) = create_test_state();
    let router = create_router(state);

    let (_, body) = json_request(
        &router,
        "POST",
        "/webhook-endpoints",
        json!({
            "merchant_ref": "merchant_1",
            "url": "https://merchant.example.com/hooks",
            "event_types": ["payment.created"],
            "secret": "0123456789abcdef0123456789abcdef"
        }),
    )
    .await;
    let endpoint: WebhookEndpoint = serde_json::from_value(body).unwrap();

    let (_, _) = json_request(
        &router,
        "POST",
        "/payments",
        json!({
            "merchant_ref": "merchant_1",
            "amount": "100.00",
            "currency": "USDC"
        }),
    )
    .await;

    // Force the queued event into terminal failure, as the dispatcher would
    // after exhausting its retry budget
    let mut event = store.get_all_events().pop().expect("event queued");
    event.delivery_status = DeliveryStatus::Failed;
    event.attempts = 5;
    event.next_attempt_at = None;
    event.response_code = Some(500);
    event.last_attempt_at = Some(Utc::now());
    store.upsert_event(event.clone());

    let (status, body) = json_request(
        &router,
        "POST",
        &format!("/webhook-events/{}/replay", event.id),
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let replayed: WebhookEvent = serde_json::from_value(body).unwrap();
    assert_eq!(replayed.delivery_status, DeliveryStatus::Pending);
    assert_eq!(replayed.attempts, 0);
    // Audit metadata from the failed run is retained
    assert_eq!(replayed.response_code, Some(500));

    let (_, body) = get_request(
        &router,
        &format!("/webhook-endpoints/{}/events", endpoint.id),
    )
    .await;
    let audit: PaginatedResponse<WebhookEvent> = serde_json::from_value(body).unwrap();
    assert_eq!(audit.items.len(), 1);
    assert_eq!(audit.items[0].delivery_status, DeliveryStatus::Pending);
}

#[tokio::test]
async fn test_invalid_pagination_cursor_rejected() {
    let (state, _) = create_test_state();
    let router = create_router(state);

    let (_, _) = json_request(
        &router,
        "POST",
        "/payments",
        json!({
            "merchant_ref": "merchant_1",
            "amount": "100.00",
            "currency": "USDC"
        }),
    )
    .await;

    let (status, body) = get_request(&router, "/payments?limit=10&cursor=not-a-real-id").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["type"], "validation_error");

    // A well-formed request still works
    let (status, body) = get_request(&router, "/payments?limit=10").await;
    assert_eq!(status, StatusCode::OK);
    let list: PaginatedResponse<Payment> = serde_json::from_value(body).unwrap();
    assert_eq!(list.items.len(), 1);
}
