use hmac::{Hmac, Mac};
use sha2::Sha256;

use ledger_core::handlers::webhook::verify_signature;

type HmacSha256 = Hmac<Sha256>;

fn sign(secret: &str, payload: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[test]
fn test_signature_roundtrip() {
    let secret = "whsec_test";
    let payload = r#"{"id":"evt_1","type":"payout.succeeded","object_id":"po_123"}"#;

    let signature = sign(secret, payload);
    assert_eq!(signature.len(), 64);
    assert!(verify_signature(secret, payload.as_bytes(), &signature));
}

#[test]
fn test_signature_rejects_tampered_payload() {
    let secret = "whsec_test";
    let payload = r#"{"id":"evt_1","type":"payout.succeeded","object_id":"po_123"}"#;
    let tampered = r#"{"id":"evt_1","type":"payout.succeeded","object_id":"po_999"}"#;

    let signature = sign(secret, payload);
    assert!(!verify_signature(secret, tampered.as_bytes(), &signature));
}

#[test]
fn test_signature_rejects_wrong_secret() {
    let payload = r#"{"id":"evt_1"}"#;
    let signature = sign("whsec_test", payload);
    assert!(!verify_signature("whsec_prod", payload.as_bytes(), &signature));
}

#[test]
fn test_signature_rejects_non_hex_input() {
    assert!(!verify_signature("whsec_test", b"{}", "zzzz"));
    assert!(!verify_signature("whsec_test", b"{}", ""));
}
