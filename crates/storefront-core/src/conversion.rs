//! # Order Conversion
//!
//! Snapshots an active checkout into an immutable order. Stock decrement,
//! discount usage, order insert and the checkout's move to `completed` are
//! handed to the store as one [`ConversionCommit`]; if any part fails
//! nothing is written and the checkout stays active. The discount is checked
//! again inside that commit, since its usage limit may have been used up by
//! other carts after it was applied here.

use crate::clock::Clock;
use crate::error::{ShopError, ShopResult};
use crate::order::{order_number, Order};
use crate::store::{load_converter, ConversionCommit, SharedStore};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

#[derive(Clone)]
pub struct OrderConverter {
    store: SharedStore,
    clock: Arc<dyn Clock>,
}

impl OrderConverter {
    pub fn new(store: SharedStore, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Convert a checkout into a pending order
    #[instrument(skip(self))]
    pub async fn convert(&self, checkout_id: Uuid) -> ShopResult<Order> {
        let checkout = self.store.get_checkout(checkout_id).await?;
        checkout.ensure_active()?;
        if checkout.is_empty() {
            return Err(ShopError::Conflict(
                "cannot convert a checkout with no items".to_string(),
            ));
        }

        let converter = load_converter(&*self.store).await?;
        converter.resolve(&checkout.currency)?;

        let now = self.clock.now();
        let sequence = self.store.next_order_sequence().await?;
        let order = Order::from_checkout(&checkout, order_number(now, sequence), now);

        let commit = ConversionCommit {
            checkout_id,
            stock: checkout
                .items
                .iter()
                .map(|item| (item.sku.clone(), item.quantity))
                .collect(),
            discount_id: checkout
                .applied_discount
                .as_ref()
                .map(|d| d.discount_id.clone()),
            now,
            order,
        };

        let order = self.store.commit_conversion(commit).await?;

        info!(
            order_id = %order.id,
            order_number = %order.order_number,
            final_amount = order.final_amount,
            currency = %order.currency,
            "Checkout converted to order"
        );

        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkout::{Checkout, CheckoutStatus};
    use crate::discount::{Discount, DiscountMethod};
    use crate::error::{DiscountRejection, StoreError};
    use crate::fixtures::Harness;
    use crate::store::{CheckoutRepository, DiscountRepository, OrderRepository};
    use crate::order::{OrderStatus, PaymentStatus};

    #[tokio::test]
    async fn test_convert_snapshots_totals() {
        let h = Harness::new().await;
        let checkout = h.cart_with("TSHIRT-M", 2).await;

        let order = h.converter.convert(checkout.id).await.unwrap();

        assert_eq!(order.total_amount, 3998);
        assert_eq!(order.final_amount, 3998);
        assert_eq!(order.items.len(), 1);
        assert_eq!(order.items[0].subtotal, 3998);
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.payment_status, PaymentStatus::Pending);
        assert!(order.order_number.starts_with("ORD-"));
        assert!(order.order_number.ends_with("-000001"));

        let stored = h.store.get_checkout(checkout.id).await.unwrap();
        assert_eq!(stored.status, CheckoutStatus::Completed);
        assert_eq!(h.store.stock_of("TSHIRT-M").await, Some(48));
    }

    #[tokio::test]
    async fn test_empty_checkout_is_conflict() {
        let h = Harness::new().await;
        let checkout = Checkout::new("empty", "USD", h.clock.now(), chrono::Duration::hours(1));
        h.store.insert_checkout(&checkout).await.unwrap();

        let err = h.converter.convert(checkout.id).await.unwrap_err();
        assert!(matches!(err, ShopError::Conflict(_)));
        assert!(h.store.list_orders(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stock_shortfall_commits_nothing() {
        let h = Harness::new().await;
        let checkout = h.cart_with("TSHIRT-M", 3).await;
        h.set_stock("TSHIRT-M", 2).await;

        let err = h.converter.convert(checkout.id).await.unwrap_err();
        assert!(matches!(
            err,
            ShopError::Store(StoreError::InsufficientStock { .. })
        ));
        assert_eq!(h.store.stock_of("TSHIRT-M").await, Some(2));
        assert!(h.store.get_checkout(checkout.id).await.unwrap().is_active());
    }

    #[tokio::test]
    async fn test_second_conversion_is_conflict() {
        let h = Harness::new().await;
        let checkout = h.cart_with("TSHIRT-M", 1).await;

        h.converter.convert(checkout.id).await.unwrap();
        let err = h.converter.convert(checkout.id).await.unwrap_err();
        assert!(matches!(err, ShopError::Conflict(_)));
        assert_eq!(h.store.list_orders(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_single_use_discount_converts_once() {
        let h = Harness::new().await;
        h.store
            .put_discount(
                Discount::basket("d-once", "ONCE", DiscountMethod::Fixed(100)).with_usage_limit(1),
            )
            .await;

        let first = h.cart_with("TSHIRT-M", 1).await;
        h.checkout
            .apply_discount(&first.session_id, "ONCE")
            .await
            .unwrap();
        let second = h.cart_with("TSHIRT-M", 1).await;
        h.checkout
            .apply_discount(&second.session_id, "ONCE")
            .await
            .unwrap();

        let order = h.converter.convert(first.id).await.unwrap();
        assert_eq!(order.discount_amount, 100);

        let err = h.converter.convert(second.id).await.unwrap_err();
        assert!(matches!(
            err,
            ShopError::DiscountRejected(DiscountRejection::UsageLimitReached)
        ));
        assert_eq!(err.status_code(), 422);

        // Nothing from the losing conversion was written
        assert!(h.store.get_checkout(second.id).await.unwrap().is_active());
        assert_eq!(h.store.stock_of("TSHIRT-M").await, Some(49));
        assert_eq!(h.store.list_orders(None).await.unwrap().len(), 1);
        let discount = h.store.get_discount("d-once").await.unwrap().unwrap();
        assert_eq!(discount.current_usage, 1);
    }
}
