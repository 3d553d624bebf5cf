//! Order reads and fulfillment transitions.

use crate::clock::Clock;
use crate::error::{ShopError, ShopResult};
use crate::notify::{send_shipped, Notifier};
use crate::order::{Order, OrderStatus};
use crate::store::SharedStore;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Who is asking, as established by the upstream authenticator and the
/// session cookie
#[derive(Debug, Clone, Default)]
pub struct Caller {
    pub user_id: Option<String>,
    pub is_admin: bool,
    pub session_id: Option<String>,
}

impl Caller {
    /// Owner, admin, or holder of the originating checkout's session
    pub fn can_read(&self, order: &Order) -> bool {
        self.is_admin
            || (self.user_id.is_some() && self.user_id == order.user_id)
            || self.session_id.as_deref() == Some(order.checkout_session_id.as_str())
    }

    pub fn require_admin(&self) -> ShopResult<()> {
        if self.is_admin {
            Ok(())
        } else {
            Err(ShopError::Forbidden("admin role required".to_string()))
        }
    }
}

pub struct OrderService {
    store: SharedStore,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
}

impl OrderService {
    pub fn new(store: SharedStore, clock: Arc<dyn Clock>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            clock,
            notifier,
        }
    }

    /// Unreadable orders are reported as missing
    #[instrument(skip(self, caller))]
    pub async fn get(&self, id: Uuid, caller: &Caller) -> ShopResult<Order> {
        let order = self.store.get_order(id).await?;
        if !caller.can_read(&order) {
            return Err(ShopError::not_found("Order", id));
        }
        Ok(order)
    }

    pub async fn list_for_user(&self, caller: &Caller) -> ShopResult<Vec<Order>> {
        let user_id = caller
            .user_id
            .as_deref()
            .ok_or_else(|| ShopError::Authentication("sign in to list orders".to_string()))?;
        Ok(self.store.list_orders_by_user(user_id).await?)
    }

    pub async fn list(&self, caller: &Caller, status: Option<OrderStatus>) -> ShopResult<Vec<Order>> {
        caller.require_admin()?;
        Ok(self.store.list_orders(status).await?)
    }

    /// Move an order along `paid → shipped → completed`, or cancel it
    #[instrument(skip(self, caller))]
    pub async fn update_status(&self, id: Uuid, next: OrderStatus, caller: &Caller) -> ShopResult<Order> {
        caller.require_admin()?;
        let mut order = self.store.get_order(id).await?;
        if !order.status.can_transition_to(next) {
            return Err(ShopError::Conflict(format!(
                "order {} cannot move from {} to {}",
                order.order_number, order.status, next
            )));
        }

        let expected = order.clone();
        order.status = next;
        order.updated_at = self.clock.now();
        if !self.store.update_order_if(&order, &expected).await? {
            return Err(ShopError::Conflict(format!(
                "order {} changed while updating its status",
                order.order_number
            )));
        }
        info!(order_number = %order.order_number, status = %next, "Order status updated");

        if next == OrderStatus::Shipped {
            send_shipped(&*self.notifier, &order).await;
        }
        Ok(order)
    }
}
