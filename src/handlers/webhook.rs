use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;

use crate::error::LedgerError;
use crate::services::reconciler::{ProcessorEvent, ReconcileOutcome};
use crate::AppState;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-ledger-signature";

/// Constant-time verification of the processor's HMAC-SHA256 signature over
/// the raw request body.
pub fn verify_signature(secret: &str, body: &[u8], signature_hex: &str) -> bool {
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    let Ok(signature) = hex::decode(signature_hex) else {
        return false;
    };
    mac.verify_slice(&signature).is_ok()
}

fn outcome_label(outcome: &ReconcileOutcome) -> &'static str {
    match outcome {
        ReconcileOutcome::Applied(_) => "applied",
        ReconcileOutcome::AlreadyTerminal(_) => "already_terminal",
        ReconcileOutcome::Refunded(_) => "refunded",
        ReconcileOutcome::UnknownRef => "unknown_ref",
        ReconcileOutcome::UnknownKind => "unknown_kind",
        ReconcileOutcome::StillProcessing => "processing",
        ReconcileOutcome::TerminalConflict => "terminal_conflict",
    }
}

/// Inbound processor events. The signature gate runs before anything else;
/// an unverifiable payload never reaches the reconciler.
pub async fn processor_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<impl IntoResponse, LedgerError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| LedgerError::Unauthorized("missing signature".to_string()))?;

    if !verify_signature(&state.webhook_secret, body.as_bytes(), signature) {
        return Err(LedgerError::Unauthorized("invalid signature".to_string()));
    }

    let value: serde_json::Value = serde_json::from_str(&body)
        .map_err(|e| LedgerError::Validation(format!("malformed event payload: {}", e)))?;

    // Account lifecycle events share the endpoint but not the reconciler.
    if let Some(kind) = value.get("type").and_then(|k| k.as_str()) {
        if kind == "account.capable" {
            let account_id = value
                .get("object_id")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    LedgerError::Validation("account event without object_id".to_string())
                })?;
            state.payouts.mark_capable(account_id).await?;
            return Ok((StatusCode::OK, Json(json!({ "outcome": "account_capable" }))));
        }
    }

    let event: ProcessorEvent = serde_json::from_value(value)
        .map_err(|e| LedgerError::Validation(format!("malformed event payload: {}", e)))?;

    let outcome = state.reconciler.apply(&event).await?;
    Ok((
        StatusCode::OK,
        Json(json!({ "outcome": outcome_label(&outcome) })),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, body: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn test_valid_signature_verifies() {
        let body = r#"{"id":"evt_1","type":"payout.succeeded","object_id":"po_1"}"#;
        let signature = sign("whsec_test", body);
        assert!(verify_signature("whsec_test", body.as_bytes(), &signature));
    }

    #[test]
    fn test_tampered_body_fails() {
        let body = r#"{"id":"evt_1","type":"payout.succeeded","object_id":"po_1"}"#;
        let signature = sign("whsec_test", body);
        let tampered = r#"{"id":"evt_1","type":"payout.succeeded","object_id":"po_2"}"#;
        assert!(!verify_signature("whsec_test", tampered.as_bytes(), &signature));
    }

    #[test]
    fn test_wrong_secret_fails() {
        let body = r#"{"id":"evt_1"}"#;
        let signature = sign("whsec_test", body);
        assert!(!verify_signature("whsec_other", body.as_bytes(), &signature));
    }

    #[test]
    fn test_garbage_signature_fails() {
        assert!(!verify_signature("whsec_test", b"{}", "not-hex"));
        assert!(!verify_signature("whsec_test", b"{}", ""));
    }
}
