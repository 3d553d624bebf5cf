//! # Order Notifications
//!
//! Outbound buyer notifications. Delivery is best effort: callers go through
//! [`send_confirmation`] and [`send_shipped`], which log failures and never
//! return them.

use crate::order::Order;
use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
#[error("notification failed: {0}")]
pub struct NotifyError(pub String);

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn order_confirmation(&self, order: &Order) -> Result<(), NotifyError>;

    async fn order_shipped(&self, order: &Order) -> Result<(), NotifyError>;
}

/// Notifier that only logs (development default)
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn order_confirmation(&self, order: &Order) -> Result<(), NotifyError> {
        info!(
            order_number = %order.order_number,
            email = order.customer.as_ref().map(|c| c.email.as_str()).unwrap_or("-"),
            amount = order.final_amount,
            currency = %order.currency,
            "Order confirmation"
        );
        Ok(())
    }

    async fn order_shipped(&self, order: &Order) -> Result<(), NotifyError> {
        info!(order_number = %order.order_number, "Order shipped");
        Ok(())
    }
}

pub async fn send_confirmation(notifier: &dyn Notifier, order: &Order) {
    if let Err(e) = notifier.order_confirmation(order).await {
        warn!(order_number = %order.order_number, error = %e, "Confirmation not delivered");
    }
}

pub async fn send_shipped(notifier: &dyn Notifier, order: &Order) {
    if let Err(e) = notifier.order_shipped(order).await {
        warn!(order_number = %order.order_number, error = %e, "Shipping notice not delivered");
    }
}
