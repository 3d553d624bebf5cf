//! Buyer checkout endpoints, addressed by the session cookie.
//!
//! A browser without a usable cookie gets a fresh checkout and a
//! `Set-Cookie` on the response. A cookie that points at a checkout which is
//! no longer active is kept for mutations, so they fail with a conflict
//! instead of silently starting over; `GET /checkout` hands out a new one.

use super::{session_set_cookie, ApiResult, Identity};
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use storefront_core::store::CheckoutRepository;
use storefront_core::{Address, CompleteCheckout, CustomerDetails};
use tracing::instrument;

// =============================================================================
// Request Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct AddItemRequest {
    pub sku: String,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

fn default_quantity() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
pub struct UpdateItemRequest {
    pub quantity: u32,
}

#[derive(Debug, Deserialize)]
pub struct ShippingMethodRequest {
    #[serde(alias = "shipping_method_id")]
    pub rate_id: String,
}

#[derive(Debug, Deserialize)]
pub struct DiscountRequest {
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct CurrencyRequest {
    pub currency: String,
}

// =============================================================================
// Session plumbing
// =============================================================================

/// Session a request operates on, plus the cookie to send if it is new
struct Session {
    id: String,
    set_cookie: Option<HeaderValue>,
}

impl Session {
    fn respond<T: Serialize>(self, status: StatusCode, body: T) -> Response {
        let mut response = (status, Json(body)).into_response();
        if let Some(cookie) = self.set_cookie {
            response.headers_mut().insert(header::SET_COOKIE, cookie);
        }
        response
    }

    fn ok<T: Serialize>(self, body: T) -> Response {
        self.respond(StatusCode::OK, body)
    }
}

fn secure_cookies(state: &AppState) -> bool {
    state.config.base_url.starts_with("https://")
}

/// Resolve the session for a mutation: the cookie's checkout whatever its
/// status, or a freshly minted one.
async fn session(state: &AppState, identity: &Identity) -> ApiResult<Session> {
    if let Some(id) = identity.session_id() {
        if state.store.find_checkout_by_session(id).await?.is_some() {
            return Ok(Session {
                id: id.to_string(),
                set_cookie: None,
            });
        }
    }
    mint(state, identity).await
}

async fn mint(state: &AppState, identity: &Identity) -> ApiResult<Session> {
    let checkout = state
        .checkout
        .get_or_create(None, identity.user_id())
        .await?;
    Ok(Session {
        set_cookie: session_set_cookie(&checkout.session_id, secure_cookies(state)),
        id: checkout.session_id,
    })
}

// =============================================================================
// Handlers
// =============================================================================

/// Current checkout, created on first visit
#[instrument(skip_all)]
pub async fn get_checkout(State(state): State<AppState>, identity: Identity) -> ApiResult<Response> {
    let checkout = state
        .checkout
        .get_or_create(identity.session_id(), identity.user_id())
        .await?;
    let set_cookie = (identity.session_id() != Some(checkout.session_id.as_str()))
        .then(|| session_set_cookie(&checkout.session_id, secure_cookies(&state)))
        .flatten();

    let session = Session {
        id: checkout.session_id.clone(),
        set_cookie,
    };
    Ok(session.ok(checkout))
}

#[instrument(skip(state, identity), fields(sku = %request.sku, quantity = request.quantity))]
pub async fn add_item(
    State(state): State<AppState>,
    identity: Identity,
    Json(request): Json<AddItemRequest>,
) -> ApiResult<Response> {
    let session = session(&state, &identity).await?;
    let checkout = state
        .checkout
        .add_item(&session.id, &request.sku, request.quantity)
        .await?;
    Ok(session.respond(StatusCode::CREATED, checkout))
}

#[instrument(skip(state, identity, request))]
pub async fn update_item(
    State(state): State<AppState>,
    identity: Identity,
    Path(sku): Path<String>,
    Json(request): Json<UpdateItemRequest>,
) -> ApiResult<Response> {
    let session = session(&state, &identity).await?;
    let checkout = state
        .checkout
        .update_item(&session.id, &sku, request.quantity)
        .await?;
    Ok(session.ok(checkout))
}

#[instrument(skip(state, identity))]
pub async fn remove_item(
    State(state): State<AppState>,
    identity: Identity,
    Path(sku): Path<String>,
) -> ApiResult<Response> {
    let session = session(&state, &identity).await?;
    let checkout = state.checkout.remove_item(&session.id, &sku).await?;
    Ok(session.ok(checkout))
}

/// Empty the basket
#[instrument(skip_all)]
pub async fn clear(State(state): State<AppState>, identity: Identity) -> ApiResult<Response> {
    let session = session(&state, &identity).await?;
    let checkout = state.checkout.clear(&session.id).await?;
    Ok(session.ok(checkout))
}

#[instrument(skip_all)]
pub async fn set_shipping_address(
    State(state): State<AppState>,
    identity: Identity,
    Json(address): Json<Address>,
) -> ApiResult<Response> {
    let session = session(&state, &identity).await?;
    let checkout = state
        .checkout
        .set_shipping_address(&session.id, address)
        .await?;
    Ok(session.ok(checkout))
}

#[instrument(skip_all)]
pub async fn set_billing_address(
    State(state): State<AppState>,
    identity: Identity,
    Json(address): Json<Address>,
) -> ApiResult<Response> {
    let session = session(&state, &identity).await?;
    let checkout = state
        .checkout
        .set_billing_address(&session.id, address)
        .await?;
    Ok(session.ok(checkout))
}

#[instrument(skip_all)]
pub async fn set_customer(
    State(state): State<AppState>,
    identity: Identity,
    Json(customer): Json<CustomerDetails>,
) -> ApiResult<Response> {
    let session = session(&state, &identity).await?;
    let checkout = state.checkout.set_customer(&session.id, customer).await?;
    Ok(session.ok(checkout))
}

#[instrument(skip_all)]
pub async fn shipping_options(
    State(state): State<AppState>,
    identity: Identity,
) -> ApiResult<Response> {
    let session = session(&state, &identity).await?;
    let options = state.checkout.shipping_options(&session.id).await?;
    Ok(session.ok(options))
}

#[instrument(skip(state, identity), fields(rate_id = %request.rate_id))]
pub async fn set_shipping_method(
    State(state): State<AppState>,
    identity: Identity,
    Json(request): Json<ShippingMethodRequest>,
) -> ApiResult<Response> {
    let session = session(&state, &identity).await?;
    let checkout = state
        .checkout
        .set_shipping_method(&session.id, &request.rate_id)
        .await?;
    Ok(session.ok(checkout))
}

#[instrument(skip(state, identity), fields(code = %request.code))]
pub async fn apply_discount(
    State(state): State<AppState>,
    identity: Identity,
    Json(request): Json<DiscountRequest>,
) -> ApiResult<Response> {
    let session = session(&state, &identity).await?;
    let checkout = state
        .checkout
        .apply_discount(&session.id, request.code.trim())
        .await?;
    Ok(session.ok(checkout))
}

#[instrument(skip_all)]
pub async fn remove_discount(
    State(state): State<AppState>,
    identity: Identity,
) -> ApiResult<Response> {
    let session = session(&state, &identity).await?;
    let checkout = state.checkout.remove_discount(&session.id).await?;
    Ok(session.ok(checkout))
}

#[instrument(skip(state, identity), fields(currency = %request.currency))]
pub async fn change_currency(
    State(state): State<AppState>,
    identity: Identity,
    Json(request): Json<CurrencyRequest>,
) -> ApiResult<Response> {
    let session = session(&state, &identity).await?;
    let checkout = state
        .checkout
        .change_currency(&session.id, &request.currency)
        .await?;
    Ok(session.ok(checkout))
}

/// Convert the checkout to an order and start payment. The body tells the
/// client whether to redirect the buyer (`requires_action`, `action_url`).
#[instrument(skip(state, identity, payment), fields(provider = %payment.provider))]
pub async fn complete(
    State(state): State<AppState>,
    identity: Identity,
    Json(mut payment): Json<CompleteCheckout>,
) -> ApiResult<Response> {
    let session = session(&state, &identity).await?;
    if payment.return_url.is_none() {
        payment.return_url = Some(state.return_url());
    }

    let submission = state.checkout.complete(&session.id, payment).await?;
    let status = if submission.requires_action {
        StatusCode::ACCEPTED
    } else {
        StatusCode::CREATED
    };
    Ok(session.respond(status, submission))
}
