//! # Webhook Verification and Parsing
//!
//! Turns signed provider callbacks into provider-neutral `PaymentEvent`s for
//! the transaction ledger. Events the ledger has no use for parse to `None`
//! and are acknowledged without further work.
//!
//! Idempotency keys are the provider's own event identity (Stripe event id,
//! MobilePay PSP reference), so a redelivered event always dedupes.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use storefront_core::{PaymentError, PaymentEvent, PaymentEventKind, PaymentProvider, PaymentResult};
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a Stripe signature timestamp
pub const STRIPE_TOLERANCE_SECS: i64 = 300;

/// Stripe events the storefront consumes
pub const STRIPE_WEBHOOK_EVENTS: &[&str] = &[
    "payment_intent.succeeded",
    "payment_intent.amount_capturable_updated",
    "payment_intent.payment_failed",
    "payment_intent.canceled",
    "charge.refunded",
    "refund.created",
];

fn hmac_sha256(secret: &[u8], message: &[u8]) -> PaymentResult<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| PaymentError::Configuration(format!("invalid webhook secret: {e}")))?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0, |acc, (x, y)| acc | (x ^ y))
        == 0
}

fn verification_failed(reason: &str) -> PaymentError {
    PaymentError::WebhookVerificationFailed(reason.to_string())
}

// =============================================================================
// Stripe
// =============================================================================

struct SignatureHeader {
    timestamp: i64,
    signatures: Vec<String>,
}

fn parse_signature_header(header: &str) -> PaymentResult<SignatureHeader> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse().ok(),
            "v1" => signatures.push(value.to_string()),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| verification_failed("Missing timestamp in signature"))?;
    if signatures.is_empty() {
        return Err(verification_failed("No v1 signature found"));
    }

    Ok(SignatureHeader {
        timestamp,
        signatures,
    })
}

/// Check a `Stripe-Signature` header against the raw body at time `now`
/// (unix seconds).
pub fn verify_stripe_signature(
    secret: &str,
    payload: &[u8],
    header: Option<&str>,
    now: i64,
) -> PaymentResult<()> {
    let header = header.ok_or_else(|| verification_failed("Missing Stripe-Signature header"))?;
    let parsed = parse_signature_header(header)?;

    if (now - parsed.timestamp).abs() > STRIPE_TOLERANCE_SECS {
        return Err(verification_failed("Timestamp outside tolerance"));
    }

    let mut signed = format!("{}.", parsed.timestamp).into_bytes();
    signed.extend_from_slice(payload);
    let expected = hex::encode(hmac_sha256(secret.as_bytes(), &signed)?);

    if parsed
        .signatures
        .iter()
        .any(|sig| constant_time_compare(sig, &expected))
    {
        Ok(())
    } else {
        Err(verification_failed("Signature mismatch"))
    }
}

#[derive(Debug, Deserialize)]
struct StripeEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: serde_json::Value,
}

fn str_field<'a>(value: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(|v| v.as_str())
}

/// Parse a verified Stripe event body
pub fn parse_stripe_event(payload: &[u8]) -> PaymentResult<Option<PaymentEvent>> {
    let event: StripeEvent = serde_json::from_slice(payload)
        .map_err(|e| PaymentError::WebhookParseError(format!("Failed to parse webhook: {e}")))?;
    let object = &event.data.object;
    debug!(event_id = %event.id, event_type = %event.event_type, "Parsing Stripe webhook");

    let (kind, success) = match event.event_type.as_str() {
        "payment_intent.succeeded" => (PaymentEventKind::Capture, true),
        "payment_intent.amount_capturable_updated" => (PaymentEventKind::Authorize, true),
        "payment_intent.payment_failed" => (PaymentEventKind::Authorize, false),
        "payment_intent.canceled" => (PaymentEventKind::Cancel, true),
        "charge.refunded" | "refund.created" => (PaymentEventKind::Refund, true),
        _ => return Ok(None),
    };

    let (payment_id, transaction_id, amount) = match event.event_type.as_str() {
        "charge.refunded" => {
            // Most recent refund comes first
            let refund = object.pointer("/refunds/data/0");
            (
                str_field(object, "payment_intent"),
                refund.and_then(|r| str_field(r, "id")),
                refund.and_then(|r| r.get("amount")).and_then(|v| v.as_i64()),
            )
        }
        "refund.created" => {
            if str_field(object, "status").is_some_and(|s| s == "failed" || s == "canceled") {
                return Ok(None);
            }
            (
                str_field(object, "payment_intent"),
                str_field(object, "id"),
                object.get("amount").and_then(|v| v.as_i64()),
            )
        }
        "payment_intent.amount_capturable_updated" => (
            str_field(object, "id"),
            None,
            object.get("amount_capturable").and_then(|v| v.as_i64()),
        ),
        "payment_intent.succeeded" => (
            str_field(object, "id"),
            str_field(object, "latest_charge"),
            object.get("amount_received").and_then(|v| v.as_i64()),
        ),
        _ => (str_field(object, "id"), None, None),
    };

    let payment_id = payment_id
        .ok_or_else(|| PaymentError::WebhookParseError("Missing payment intent id".to_string()))?;

    Ok(Some(PaymentEvent {
        provider: PaymentProvider::Stripe,
        payment_id: payment_id.to_string(),
        transaction_id: transaction_id.map(String::from),
        kind,
        success,
        amount,
        idempotency_key: Some(event.id.clone()),
        payload: object.clone(),
    }))
}

// =============================================================================
// MobilePay
// =============================================================================

/// Headers MobilePay signs its webhooks with
#[derive(Debug, Clone, Default)]
pub struct MobilePaySignature<'a> {
    pub date: Option<&'a str>,
    pub content_sha256: Option<&'a str>,
    pub authorization: Option<&'a str>,
    pub host: Option<&'a str>,
}

/// Verify a MobilePay webhook. `path` is the request path and query as
/// received.
pub fn verify_mobilepay_signature(
    secret: &str,
    path: &str,
    payload: &[u8],
    headers: &MobilePaySignature<'_>,
) -> PaymentResult<()> {
    let date = headers
        .date
        .ok_or_else(|| verification_failed("Missing x-ms-date header"))?;
    let claimed_hash = headers
        .content_sha256
        .ok_or_else(|| verification_failed("Missing x-ms-content-sha256 header"))?;
    let authorization = headers
        .authorization
        .ok_or_else(|| verification_failed("Missing Authorization header"))?;
    let host = headers
        .host
        .ok_or_else(|| verification_failed("Missing Host header"))?;

    let content_hash = BASE64.encode(Sha256::digest(payload));
    if !constant_time_compare(&content_hash, claimed_hash) {
        return Err(verification_failed("Content hash mismatch"));
    }

    let signed = format!("POST\n{path}\n{date};{host};{content_hash}");
    let expected = BASE64.encode(hmac_sha256(secret.as_bytes(), signed.as_bytes())?);
    let expected_header =
        format!("HMAC-SHA256 SignedHeaders=x-ms-date;host;x-ms-content-sha256&Signature={expected}");

    if constant_time_compare(authorization, &expected_header) {
        Ok(())
    } else {
        Err(verification_failed("Signature mismatch"))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MobilePayEvent {
    reference: String,
    psp_reference: String,
    name: String,
    #[serde(default)]
    amount: Option<MobilePayAmount>,
    #[serde(default = "default_success")]
    success: bool,
}

fn default_success() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct MobilePayAmount {
    value: i64,
}

/// Parse a verified MobilePay event body
pub fn parse_mobilepay_event(payload: &[u8]) -> PaymentResult<Option<PaymentEvent>> {
    let raw: serde_json::Value = serde_json::from_slice(payload)
        .map_err(|e| PaymentError::WebhookParseError(format!("Failed to parse webhook: {e}")))?;
    let event: MobilePayEvent = serde_json::from_value(raw.clone())
        .map_err(|e| PaymentError::WebhookParseError(format!("Failed to parse webhook: {e}")))?;
    debug!(reference = %event.reference, name = %event.name, "Parsing MobilePay webhook");

    let kind = match event.name.as_str() {
        "AUTHORIZED" => PaymentEventKind::Authorize,
        "CAPTURED" => PaymentEventKind::Capture,
        "REFUNDED" => PaymentEventKind::Refund,
        "CANCELLED" | "TERMINATED" => PaymentEventKind::Cancel,
        "ABORTED" | "EXPIRED" => PaymentEventKind::Expire,
        _ => return Ok(None),
    };

    Ok(Some(PaymentEvent {
        provider: PaymentProvider::MobilePay,
        transaction_id: Some(event.psp_reference.clone()),
        idempotency_key: Some(format!("mobilepay-{}", event.psp_reference)),
        payment_id: event.reference,
        kind,
        success: event.success,
        amount: event.amount.map(|a| a.value),
        payload: raw,
    }))
}

/// Current unix time, for callers verifying Stripe signatures
pub fn unix_now() -> i64 {
    Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const STRIPE_SECRET: &str = "whsec_test";

    fn stripe_header(payload: &[u8], timestamp: i64) -> String {
        let mut signed = format!("{timestamp}.").into_bytes();
        signed.extend_from_slice(payload);
        let sig = hex::encode(hmac_sha256(STRIPE_SECRET.as_bytes(), &signed).unwrap());
        format!("t={timestamp},v1={sig}")
    }

    #[test]
    fn test_parse_signature_header() {
        let parsed = parse_signature_header("t=1234567890,v1=abc123,v1=def456,v0=old").unwrap();
        assert_eq!(parsed.timestamp, 1234567890);
        assert_eq!(parsed.signatures, vec!["abc123", "def456"]);

        assert!(parse_signature_header("v1=abc").is_err());
        assert!(parse_signature_header("t=123").is_err());
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("abc123", "abc123"));
        assert!(!constant_time_compare("abc123", "abc124"));
        assert!(!constant_time_compare("abc", "abcd"));
    }

    #[test]
    fn test_stripe_signature() {
        let payload = br#"{"id":"evt_1"}"#;
        let now = 1_760_000_000;
        let header = stripe_header(payload, now);

        assert!(verify_stripe_signature(STRIPE_SECRET, payload, Some(&header), now + 10).is_ok());
        assert!(verify_stripe_signature("whsec_other", payload, Some(&header), now).is_err());
        assert!(verify_stripe_signature(STRIPE_SECRET, b"{}", Some(&header), now).is_err());
        assert!(verify_stripe_signature(STRIPE_SECRET, payload, None, now).is_err());

        let stale = verify_stripe_signature(STRIPE_SECRET, payload, Some(&header), now + 301);
        assert!(matches!(
            stale,
            Err(PaymentError::WebhookVerificationFailed(msg)) if msg.contains("tolerance")
        ));
    }

    #[test]
    fn test_stripe_event_mapping() {
        let succeeded = json!({
            "id": "evt_1",
            "type": "payment_intent.succeeded",
            "data": { "object": { "id": "pi_1", "amount_received": 3998, "latest_charge": "ch_1" } }
        });
        let event = parse_stripe_event(succeeded.to_string().as_bytes())
            .unwrap()
            .unwrap();
        assert_eq!(event.kind, PaymentEventKind::Capture);
        assert_eq!(event.payment_id, "pi_1");
        assert_eq!(event.amount, Some(3998));
        assert_eq!(event.idempotency_key.as_deref(), Some("evt_1"));

        let refunded = json!({
            "id": "evt_2",
            "type": "charge.refunded",
            "data": { "object": {
                "id": "ch_1",
                "payment_intent": "pi_1",
                "refunds": { "data": [ { "id": "re_9", "amount": 500 } ] }
            } }
        });
        let event = parse_stripe_event(refunded.to_string().as_bytes())
            .unwrap()
            .unwrap();
        assert_eq!(event.kind, PaymentEventKind::Refund);
        assert_eq!(event.payment_id, "pi_1");
        assert_eq!(event.transaction_id.as_deref(), Some("re_9"));
        assert_eq!(event.amount, Some(500));

        let failed = json!({
            "id": "evt_3",
            "type": "payment_intent.payment_failed",
            "data": { "object": { "id": "pi_2" } }
        });
        let event = parse_stripe_event(failed.to_string().as_bytes())
            .unwrap()
            .unwrap();
        assert_eq!(event.kind, PaymentEventKind::Authorize);
        assert!(!event.success);

        let ignored = json!({
            "id": "evt_4",
            "type": "customer.created",
            "data": { "object": { "id": "cus_1" } }
        });
        assert!(parse_stripe_event(ignored.to_string().as_bytes())
            .unwrap()
            .is_none());

        assert!(matches!(
            parse_stripe_event(b"not json"),
            Err(PaymentError::WebhookParseError(_))
        ));
    }

    fn mobilepay_headers(secret: &str, path: &str, payload: &[u8]) -> (String, String, String) {
        let date = "Thu, 16 Oct 2026 10:00:00 GMT".to_string();
        let hash = BASE64.encode(Sha256::digest(payload));
        let signed = format!("POST\n{path}\n{date};shop.test;{hash}");
        let sig = BASE64.encode(hmac_sha256(secret.as_bytes(), signed.as_bytes()).unwrap());
        let auth = format!("HMAC-SHA256 SignedHeaders=x-ms-date;host;x-ms-content-sha256&Signature={sig}");
        (date, hash, auth)
    }

    #[test]
    fn test_mobilepay_signature() {
        let payload = br#"{"reference":"ORD-1"}"#;
        let (date, hash, auth) = mobilepay_headers("mp-secret", "/webhooks/mobilepay", payload);
        let headers = MobilePaySignature {
            date: Some(&date),
            content_sha256: Some(&hash),
            authorization: Some(&auth),
            host: Some("shop.test"),
        };

        assert!(verify_mobilepay_signature("mp-secret", "/webhooks/mobilepay", payload, &headers).is_ok());
        assert!(verify_mobilepay_signature("wrong", "/webhooks/mobilepay", payload, &headers).is_err());
        assert!(verify_mobilepay_signature("mp-secret", "/other", payload, &headers).is_err());
        assert!(verify_mobilepay_signature("mp-secret", "/webhooks/mobilepay", b"{}", &headers).is_err());

        let missing = MobilePaySignature {
            authorization: None,
            ..headers
        };
        assert!(verify_mobilepay_signature("mp-secret", "/webhooks/mobilepay", payload, &missing).is_err());
    }

    #[test]
    fn test_mobilepay_event_mapping() {
        let body = json!({
            "msn": "123456",
            "reference": "ORD-20261016-000007",
            "pspReference": "psp-1",
            "name": "AUTHORIZED",
            "amount": { "currency": "DKK", "value": 13593 },
            "timestamp": "2026-10-16T10:00:00Z",
            "idempotencyKey": "payment-xyz",
            "success": true
        });
        let event = parse_mobilepay_event(body.to_string().as_bytes())
            .unwrap()
            .unwrap();
        assert_eq!(event.provider, PaymentProvider::MobilePay);
        assert_eq!(event.kind, PaymentEventKind::Authorize);
        assert_eq!(event.payment_id, "ORD-20261016-000007");
        assert_eq!(event.amount, Some(13593));
        assert_eq!(event.idempotency_key.as_deref(), Some("mobilepay-psp-1"));

        let expired = json!({ "reference": "R", "pspReference": "p2", "name": "EXPIRED" });
        let event = parse_mobilepay_event(expired.to_string().as_bytes())
            .unwrap()
            .unwrap();
        assert_eq!(event.kind, PaymentEventKind::Expire);

        let created = json!({ "reference": "R", "pspReference": "p3", "name": "CREATED" });
        assert!(parse_mobilepay_event(created.to_string().as_bytes())
            .unwrap()
            .is_none());
    }
}
