//! Order reads for buyers.

use super::{ApiResult, Identity};
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    Json,
};
use storefront_core::Order;
use tracing::instrument;
use uuid::Uuid;

/// Readable by the owner, an admin, or the browser that placed it
#[instrument(skip(state, identity))]
pub async fn get_order(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Order>> {
    Ok(Json(state.orders.get(id, &identity.0).await?))
}

/// Orders of the signed-in user
#[instrument(skip_all)]
pub async fn list_orders(
    State(state): State<AppState>,
    identity: Identity,
) -> ApiResult<Json<Vec<Order>>> {
    Ok(Json(state.orders.list_for_user(&identity.0).await?))
}
