//! Provider webhooks.
//!
//! Each endpoint verifies the signature over the raw body, maps the payload
//! to a `PaymentEvent` and hands it to the ledger. The provider only sees a
//! 200 once the event is recorded (or known to be irrelevant), so a storage
//! failure makes it retry.

use super::{ApiError, ApiResult};
use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::{OriginalUri, State},
    http::{header, HeaderMap, StatusCode},
};
use storefront_core::{LedgerOutcome, PaymentError, PaymentEvent, ShopError};
use storefront_gateways::webhook::{
    parse_mobilepay_event, parse_stripe_event, unix_now, verify_mobilepay_signature,
    verify_stripe_signature, MobilePaySignature,
};
use tracing::{debug, info, instrument, warn};

fn webhook_error(err: PaymentError) -> ApiError {
    match err {
        PaymentError::WebhookVerificationFailed(reason) => {
            warn!(%reason, "Webhook rejected");
            ApiError(ShopError::Authentication(reason))
        }
        PaymentError::WebhookParseError(reason) | PaymentError::Serialization(reason) => {
            ApiError(ShopError::Validation(reason))
        }
        other => ApiError(other.into()),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

async fn dispatch(state: &AppState, event: Option<PaymentEvent>) -> ApiResult<StatusCode> {
    let Some(event) = event else {
        debug!("Webhook event ignored");
        return Ok(StatusCode::OK);
    };

    let provider = event.provider;
    let payment_id = event.payment_id.clone();
    match state.ledger.record_event(event).await? {
        LedgerOutcome::Applied {
            payment_status, ..
        } => {
            info!(%provider, %payment_id, %payment_status, "Webhook applied");
        }
        outcome => {
            info!(%provider, %payment_id, ?outcome, "Webhook acknowledged without change");
        }
    }
    Ok(StatusCode::OK)
}

/// Stripe webhook handler
#[instrument(skip_all)]
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<StatusCode> {
    match &state.webhook_secrets.stripe {
        Some(secret) => verify_stripe_signature(
            secret,
            &body,
            header_str(&headers, "stripe-signature"),
            unix_now(),
        )
        .map_err(webhook_error)?,
        None => warn!("STRIPE_WEBHOOK_SECRET not set; accepting unsigned webhook"),
    }

    let event = parse_stripe_event(&body).map_err(webhook_error)?;
    dispatch(&state, event).await
}

/// MobilePay webhook handler
#[instrument(skip_all)]
pub async fn mobilepay_webhook(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<StatusCode> {
    match &state.webhook_secrets.mobilepay {
        Some(secret) => {
            let path = uri
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or_else(|| uri.path());
            let signature = MobilePaySignature {
                date: header_str(&headers, "x-ms-date"),
                content_sha256: header_str(&headers, "x-ms-content-sha256"),
                authorization: header_str(&headers, header::AUTHORIZATION.as_str()),
                host: header_str(&headers, header::HOST.as_str()),
            };
            verify_mobilepay_signature(secret, path, &body, &signature).map_err(webhook_error)?;
        }
        None => warn!("MOBILEPAY_WEBHOOK_SECRET not set; accepting unsigned webhook"),
    }

    let event = parse_mobilepay_event(&body).map_err(webhook_error)?;
    dispatch(&state, event).await
}
