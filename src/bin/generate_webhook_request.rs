use chrono::Utc;
use merchant_payment_gateway::domain::types::{EventType, WebhookEnvelope};
use merchant_payment_gateway::infra::signature::{self, EVENT_ID_HEADER, SIGNATURE_HEADER};
use rand::Rng;
use rand::distributions::Alphanumeric;
use uuid::Uuid;

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let url = args
        .iter()
        .position(|arg| arg == "--url")
        .and_then(|i| args.get(i + 1))
        .cloned()
        .unwrap_or_else(|| "http://localhost:4000/hooks/payments".to_string());

    // 1. Generate a random endpoint secret, like the one a merchant would
    //    register alongside their endpoint URL.
    let secret: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect();

    println!(" Generated endpoint secret (register with the endpoint):");
    println!(" {}", secret);
    println!("\n--------------------------------------------------\n");

    // 2. Build a sample payment.confirmed envelope
    let event_id = Uuid::new_v4().to_string();
    let envelope = WebhookEnvelope {
        id: event_id.clone(),
        event_type: EventType::PaymentConfirmed,
        payload: serde_json::json!({
            "id": Uuid::new_v4().to_string(),
            "merchant_ref": "merchant_demo",
            "amount": "100.00",
            "currency": "USDC",
            "status": "confirmed",
        }),
        timestamp: Utc::now().to_rfc3339(),
    };

    // 3. Serialize once and sign those exact bytes - the receiver must
    //    verify against the raw request body.
    let body = serde_json::to_string(&envelope).unwrap();
    let sig = signature::sign(&secret, body.as_bytes());

    println!("Signed body:\n{}", body);
    println!("\nSignature: {}", sig);

    // 4. Generate the curl command
    let curl_cmd = format!(
        "curl -X POST '{}' \\\n  -H 'Content-Type: application/json' \\\n  -H '{}: {}' \\\n  -H '{}: {}' \\\n  -d '{}'",
        url, SIGNATURE_HEADER, sig, EVENT_ID_HEADER, event_id, body
    );

    println!("\nGenerated curl command:\n");
    println!("{}", curl_cmd);
}
