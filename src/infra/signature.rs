//! HMAC-SHA256 signing of outbound webhook bodies.
//!
//! Signatures are computed over the exact serialized bytes sent on the
//! wire. The receiver must verify against the raw request body, never a
//! re-parsed representation, or the digests will disagree.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex-encoded signature of the request body.
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

/// Header carrying the event id for receiver-side deduplication.
pub const EVENT_ID_HEADER: &str = "X-Webhook-Event-Id";

/// Compute the hex-encoded HMAC-SHA256 signature of `raw_body`.
pub fn sign(secret: &str, raw_body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(raw_body);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a hex-encoded signature against `raw_body`.
///
/// Comparison happens inside `Mac::verify_slice`, which is constant-time;
/// a malformed hex string simply fails verification.
pub fn verify(secret: &str, raw_body: &[u8], signature_hex: &str) -> bool {
    let Ok(signature) = hex::decode(signature_hex) else {
        return false;
    };
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(raw_body);
    mac.verify_slice(&signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify_roundtrip() {
        let secret = "endpoint-secret-0123456789";
        let body = br#"{"id":"evt_1","eventType":"payment.confirmed"}"#;

        let signature = sign(secret, body);
        assert!(verify(secret, body, &signature));
    }

    #[test]
    fn test_signature_is_hex_sha256() {
        let signature = sign("secret", b"body");
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_signing_is_deterministic() {
        assert_eq!(sign("secret", b"body"), sign("secret", b"body"));
    }

    #[test]
    fn test_verify_rejects_modified_body() {
        let secret = "endpoint-secret-0123456789";
        let signature = sign(secret, br#"{"amount":"100.00"}"#);
        assert!(!verify(secret, br#"{"amount":"999.00"}"#, &signature));
    }

    #[test]
    fn test_verify_rejects_wrong_secret() {
        let body = b"payload";
        let signature = sign("secret-one", body);
        assert!(!verify("secret-two", body, &signature));
    }

    #[test]
    fn test_verify_rejects_malformed_hex() {
        assert!(!verify("secret", b"payload", "not-hex-at-all"));
        assert!(!verify("secret", b"payload", ""));
    }

    #[test]
    fn test_every_byte_matters() {
        let secret = "endpoint-secret-0123456789";
        let body = b"abcdefgh";
        let signature = sign(secret, body);

        for i in 0..body.len() {
            let mut tampered = *body;
            tampered[i] ^= 0x01;
            assert!(
                !verify(secret, &tampered, &signature),
                "flipping byte {i} should break verification"
            );
        }
    }
}
