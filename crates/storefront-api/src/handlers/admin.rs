//! Admin endpoints: order fulfillment, payment operations and checkout
//! housekeeping. Every handler checks the admin role first.
//!
//! Capture and refund take an optional body, `{"mode":"amount","amount":500}`
//! or `{"mode":"full"}`; no body means the full amount.

use super::{ApiResult, Identity};
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use storefront_core::{AmountMode, Order, OrderStatus, SweepReport};
use tracing::{info, instrument};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct OrderFilter {
    #[serde(default)]
    pub status: Option<OrderStatus>,
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub status: OrderStatus,
}

#[derive(Debug, Default, Deserialize)]
pub struct SweepParams {
    #[serde(default)]
    pub force: bool,
}

// =============================================================================
// Orders
// =============================================================================

#[instrument(skip(state, identity))]
pub async fn list_orders(
    State(state): State<AppState>,
    identity: Identity,
    Query(filter): Query<OrderFilter>,
) -> ApiResult<Json<Vec<Order>>> {
    Ok(Json(state.orders.list(&identity.0, filter.status).await?))
}

#[instrument(skip(state, identity))]
pub async fn update_order_status(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<Uuid>,
    Json(update): Json<StatusUpdate>,
) -> ApiResult<Json<Order>> {
    Ok(Json(
        state
            .orders
            .update_status(id, update.status, &identity.0)
            .await?,
    ))
}

// =============================================================================
// Payments
// =============================================================================

#[instrument(skip(state, identity, request))]
pub async fn capture_payment(
    State(state): State<AppState>,
    identity: Identity,
    Path(payment_id): Path<String>,
    request: Option<Json<AmountMode>>,
) -> ApiResult<Json<Order>> {
    identity.0.require_admin()?;
    let mode = request.map(|Json(mode)| mode).unwrap_or(AmountMode::Full);
    Ok(Json(state.payments.capture(&payment_id, mode).await?))
}

#[instrument(skip(state, identity))]
pub async fn cancel_payment(
    State(state): State<AppState>,
    identity: Identity,
    Path(payment_id): Path<String>,
) -> ApiResult<Json<Order>> {
    identity.0.require_admin()?;
    Ok(Json(state.payments.cancel(&payment_id).await?))
}

#[instrument(skip(state, identity, request))]
pub async fn refund_payment(
    State(state): State<AppState>,
    identity: Identity,
    Path(payment_id): Path<String>,
    request: Option<Json<AmountMode>>,
) -> ApiResult<Json<Order>> {
    identity.0.require_admin()?;
    let mode = request.map(|Json(mode)| mode).unwrap_or(AmountMode::Full);
    Ok(Json(state.payments.refund(&payment_id, mode).await?))
}

/// Sandbox only; the provider reports the result through its webhook
#[instrument(skip(state, identity))]
pub async fn force_approve_payment(
    State(state): State<AppState>,
    identity: Identity,
    Path(payment_id): Path<String>,
) -> ApiResult<(StatusCode, Json<Order>)> {
    identity.0.require_admin()?;
    let order = state.payments.force_approve(&payment_id).await?;
    Ok((StatusCode::ACCEPTED, Json(order)))
}

// =============================================================================
// Checkouts
// =============================================================================

/// Run one expiry pass now; `?force=true` deletes every non-active checkout
#[instrument(skip(state, identity))]
pub async fn sweep_checkouts(
    State(state): State<AppState>,
    identity: Identity,
    Query(params): Query<SweepParams>,
) -> ApiResult<Json<SweepReport>> {
    identity.0.require_admin()?;
    let report = state.sweeper.run_once(params.force).await?;
    info!(
        force = params.force,
        abandoned = report.abandoned,
        expired = report.expired,
        deleted = report.deleted,
        "Manual checkout sweep"
    );
    Ok(Json(report))
}

#[instrument(skip(state, identity))]
pub async fn delete_checkout(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    identity.0.require_admin()?;
    state.checkout.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
