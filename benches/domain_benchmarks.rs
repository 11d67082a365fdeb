use criterion::{Criterion, criterion_group, criterion_main};
use merchant_payment_gateway::domain::types::CreatePaymentRequest;
use merchant_payment_gateway::infra::signature;
use rust_decimal_macros::dec;
use std::hint::black_box;
use validator::Validate;

fn bench_validation(c: &mut Criterion) {
    let request = CreatePaymentRequest {
        merchant_ref: "merchant_abc123".to_string(),
        amount: dec!(100.00),
        currency: "USDC".to_string(),
        payer_address: None,
        merchant_address: None,
        expires_at: None,
    };

    c.bench_function("validate_create_payment_request", |b| {
        b.iter(|| {
            let _ = black_box(&request).validate();
        })
    });
}

fn bench_envelope_signing(c: &mut Criterion) {
    let secret = "endpoint-secret-0123456789abcdef";
    let body = serde_json::json!({
        "id": "550e8400-e29b-41d4-a716-446655440000",
        "eventType": "payment.confirmed",
        "payload": {
            "id": "pay_1",
            "merchant_ref": "merchant_abc123",
            "amount": "100.00",
            "currency": "USDC",
            "status": "confirmed"
        },
        "timestamp": "2026-01-01T00:00:00Z"
    })
    .to_string();

    c.bench_function("sign_webhook_envelope", |b| {
        b.iter(|| signature::sign(black_box(secret), black_box(body.as_bytes())))
    });
}

criterion_group!(benches, bench_validation, bench_envelope_signing);
criterion_main!(benches);
