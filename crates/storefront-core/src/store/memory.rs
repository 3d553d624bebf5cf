//! In-memory `Store` implementation.
//!
//! All tables sit behind one `tokio::sync::RwLock`, so every trait method is
//! atomic with respect to every other. Used by the `storefront` binary for
//! development and by all service tests.

use super::{
    CatalogRepository, CatalogSeed, CheckoutRepository, ConversionCommit, CurrencyRepository,
    DiscountRepository, OrderRepository, ShippingRepository, TransactionRepository,
};
use crate::catalog::Product;
use crate::checkout::{Checkout, CheckoutStatus};
use crate::discount::Discount;
use crate::error::{DiscountRejection, StoreError, StoreResult};
use crate::money::{normalize_code, Currency};
use crate::order::{Order, OrderStatus};
use crate::shipping::ShippingRate;
use crate::transaction::{PaymentTransaction, TransactionStatus, TransactionType, EVENT_KEY};
use async_trait::async_trait;
use std::collections::HashMap;
#[cfg(test)]
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    checkouts: HashMap<Uuid, Checkout>,
    orders: HashMap<Uuid, Order>,
    order_sequence: u64,
    /// Insertion order is creation order
    transactions: Vec<PaymentTransaction>,
    products: HashMap<String, Product>,
    /// sku -> product id
    sku_index: HashMap<String, String>,
    discounts: HashMap<String, Discount>,
    shipping_rates: Vec<ShippingRate>,
    currencies: HashMap<String, Currency>,
}

impl Tables {
    fn variant_stock_mut(&mut self, sku: &str) -> Option<&mut u32> {
        let product_id = self.sku_index.get(sku)?;
        self.products
            .get_mut(product_id)?
            .variants
            .iter_mut()
            .find(|v| v.sku == sku)
            .map(|v| &mut v.stock)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    #[cfg(test)]
    fail_transaction_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-loaded with a catalog seed
    pub async fn from_seed(seed: CatalogSeed) -> Self {
        let store = Self::new();
        for currency in seed.currencies {
            store.put_currency(currency).await;
        }
        for product in seed.products {
            store.put_product(product).await;
        }
        for discount in seed.discounts {
            store.put_discount(discount).await;
        }
        for rate in seed.shipping_rates {
            store.put_shipping_rate(rate).await;
        }
        store
    }

    pub async fn put_currency(&self, mut currency: Currency) {
        currency.code = normalize_code(&currency.code);
        let mut tables = self.tables.write().await;
        tables.currencies.insert(currency.code.clone(), currency);
    }

    pub async fn put_product(&self, product: Product) {
        let mut tables = self.tables.write().await;
        for variant in &product.variants {
            tables
                .sku_index
                .insert(variant.sku.clone(), product.id.clone());
        }
        tables.products.insert(product.id.clone(), product);
    }

    pub async fn put_discount(&self, discount: Discount) {
        let mut tables = self.tables.write().await;
        tables.discounts.insert(discount.id.clone(), discount);
    }

    pub async fn put_shipping_rate(&self, rate: ShippingRate) {
        let mut tables = self.tables.write().await;
        tables.shipping_rates.retain(|r| r.id != rate.id);
        tables.shipping_rates.push(rate);
    }

    /// Current stock of a SKU
    pub async fn stock_of(&self, sku: &str) -> Option<u32> {
        let mut tables = self.tables.write().await;
        tables.variant_stock_mut(sku).map(|s| *s)
    }

    #[cfg(test)]
    pub(crate) fn fail_transaction_writes(&self, fail: bool) {
        self.fail_transaction_writes.store(fail, Ordering::SeqCst);
    }

    fn check_transaction_writes(&self) -> StoreResult<()> {
        #[cfg(test)]
        {
            if self.fail_transaction_writes.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("transaction table unavailable".into()));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CheckoutRepository for MemoryStore {
    async fn insert_checkout(&self, checkout: &Checkout) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if tables.checkouts.contains_key(&checkout.id) {
            return Err(StoreError::Conflict(format!(
                "checkout {} already exists",
                checkout.id
            )));
        }
        tables.checkouts.insert(checkout.id, checkout.clone());
        Ok(())
    }

    async fn get_checkout(&self, id: Uuid) -> StoreResult<Checkout> {
        let tables = self.tables.read().await;
        tables
            .checkouts
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                entity: "Checkout",
                id: id.to_string(),
            })
    }

    async fn find_checkout_by_session(&self, session_id: &str) -> StoreResult<Option<Checkout>> {
        let tables = self.tables.read().await;
        Ok(tables
            .checkouts
            .values()
            .find(|c| c.session_id == session_id)
            .cloned())
    }

    async fn save_active_checkout(&self, checkout: &Checkout) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let stored = tables
            .checkouts
            .get_mut(&checkout.id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "Checkout",
                id: checkout.id.to_string(),
            })?;
        if !stored.is_active() {
            return Err(StoreError::Conflict(format!(
                "checkout {} is {}",
                stored.id, stored.status
            )));
        }
        *stored = checkout.clone();
        Ok(())
    }

    async fn transition_checkout(
        &self,
        id: Uuid,
        from: CheckoutStatus,
        to: CheckoutStatus,
    ) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        match tables.checkouts.get_mut(&id) {
            Some(checkout) if checkout.status == from => {
                checkout.status = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_checkout(&self, id: Uuid) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        Ok(tables.checkouts.remove(&id).is_some())
    }

    async fn list_checkouts_by_status(
        &self,
        statuses: &[CheckoutStatus],
    ) -> StoreResult<Vec<Checkout>> {
        let tables = self.tables.read().await;
        Ok(tables
            .checkouts
            .values()
            .filter(|c| statuses.contains(&c.status))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl OrderRepository for MemoryStore {
    async fn next_order_sequence(&self) -> StoreResult<u64> {
        let mut tables = self.tables.write().await;
        tables.order_sequence += 1;
        Ok(tables.order_sequence)
    }

    async fn commit_conversion(&self, commit: ConversionCommit) -> StoreResult<Order> {
        let mut tables = self.tables.write().await;

        // Validate everything before touching anything
        match tables.checkouts.get(&commit.checkout_id) {
            None => {
                return Err(StoreError::NotFound {
                    entity: "Checkout",
                    id: commit.checkout_id.to_string(),
                })
            }
            Some(checkout) if !checkout.is_active() => {
                return Err(StoreError::Conflict(format!(
                    "checkout {} is {}",
                    checkout.id, checkout.status
                )))
            }
            Some(_) => {}
        }
        if tables
            .orders
            .values()
            .any(|o| o.checkout_id == commit.checkout_id)
        {
            return Err(StoreError::Conflict(format!(
                "checkout {} already has an order",
                commit.checkout_id
            )));
        }
        if tables
            .orders
            .values()
            .any(|o| o.order_number == commit.order.order_number)
        {
            return Err(StoreError::Conflict(format!(
                "order number {} is taken",
                commit.order.order_number
            )));
        }

        let mut requested: HashMap<&str, u32> = HashMap::new();
        for (sku, quantity) in &commit.stock {
            *requested.entry(sku.as_str()).or_default() += quantity;
        }
        if let Some(id) = &commit.discount_id {
            let discount = tables
                .discounts
                .get(id)
                .ok_or_else(|| StoreError::DiscountUnavailable(DiscountRejection::Inactive))?;
            discount
                .check_availability(commit.now)
                .map_err(StoreError::DiscountUnavailable)?;
        }

        for (sku, quantity) in &requested {
            let available = tables.variant_stock_mut(sku).map(|s| *s).unwrap_or(0);
            if available < *quantity {
                return Err(StoreError::InsufficientStock {
                    sku: sku.to_string(),
                    requested: *quantity,
                    available,
                });
            }
        }

        for (sku, quantity) in requested {
            if let Some(stock) = tables.variant_stock_mut(sku) {
                *stock -= quantity;
            }
        }
        if let Some(discount) = commit
            .discount_id
            .as_ref()
            .and_then(|id| tables.discounts.get_mut(id))
        {
            discount.current_usage += 1;
        }
        if let Some(checkout) = tables.checkouts.get_mut(&commit.checkout_id) {
            checkout.status = CheckoutStatus::Completed;
        }
        tables.orders.insert(commit.order.id, commit.order.clone());

        Ok(commit.order)
    }

    async fn get_order(&self, id: Uuid) -> StoreResult<Order> {
        let tables = self.tables.read().await;
        tables
            .orders
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                entity: "Order",
                id: id.to_string(),
            })
    }

    async fn find_order_by_payment_id(&self, payment_id: &str) -> StoreResult<Option<Order>> {
        let tables = self.tables.read().await;
        Ok(tables
            .orders
            .values()
            .find(|o| o.external_payment_id.as_deref() == Some(payment_id))
            .cloned())
    }

    async fn list_orders_by_user(&self, user_id: &str) -> StoreResult<Vec<Order>> {
        let tables = self.tables.read().await;
        let mut orders: Vec<Order> = tables
            .orders
            .values()
            .filter(|o| o.user_id.as_deref() == Some(user_id))
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn list_orders(&self, status: Option<OrderStatus>) -> StoreResult<Vec<Order>> {
        let tables = self.tables.read().await;
        let mut orders: Vec<Order> = tables
            .orders
            .values()
            .filter(|o| status.map_or(true, |s| o.status == s))
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn update_order(&self, order: &Order) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        match tables.orders.get_mut(&order.id) {
            Some(stored) => {
                *stored = order.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound {
                entity: "Order",
                id: order.id.to_string(),
            }),
        }
    }

    async fn update_order_if(&self, order: &Order, expected: &Order) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        let stored = tables
            .orders
            .get_mut(&order.id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "Order",
                id: order.id.to_string(),
            })?;
        if stored.status != expected.status || stored.payment_status != expected.payment_status {
            return Ok(false);
        }
        *stored = order.clone();
        Ok(true)
    }
}

#[async_trait]
impl TransactionRepository for MemoryStore {
    async fn insert_transaction(&self, transaction: &PaymentTransaction) -> StoreResult<()> {
        self.check_transaction_writes()?;
        let mut tables = self.tables.write().await;
        check_keys_unique(&tables.transactions, transaction)?;
        tables.transactions.push(transaction.clone());
        Ok(())
    }

    async fn settle_transaction(&self, transaction: &PaymentTransaction) -> StoreResult<()> {
        self.check_transaction_writes()?;
        let mut tables = self.tables.write().await;
        check_keys_unique(&tables.transactions, transaction)?;
        let stored = tables
            .transactions
            .iter_mut()
            .find(|t| t.id == transaction.id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "Transaction",
                id: transaction.id.to_string(),
            })?;
        if stored.status != TransactionStatus::Pending {
            return Err(StoreError::Conflict(format!(
                "transaction {} is already settled",
                stored.id
            )));
        }
        *stored = transaction.clone();
        Ok(())
    }

    async fn find_transaction_by_idempotency_key(
        &self,
        order_id: Uuid,
        key: &str,
    ) -> StoreResult<Option<PaymentTransaction>> {
        let tables = self.tables.read().await;
        Ok(tables
            .transactions
            .iter()
            .find(|t| t.order_id == order_id && t.answers_to_key(key))
            .cloned())
    }

    async fn latest_pending_transaction(
        &self,
        order_id: Uuid,
        kind: TransactionType,
    ) -> StoreResult<Option<PaymentTransaction>> {
        let tables = self.tables.read().await;
        Ok(tables
            .transactions
            .iter()
            .rev()
            .find(|t| {
                t.order_id == order_id
                    && t.transaction_type == kind
                    && t.status == TransactionStatus::Pending
            })
            .cloned())
    }

    async fn list_transactions(&self, order_id: Uuid) -> StoreResult<Vec<PaymentTransaction>> {
        let tables = self.tables.read().await;
        Ok(tables
            .transactions
            .iter()
            .filter(|t| t.order_id == order_id)
            .cloned()
            .collect())
    }
}

/// Reject a row whose idempotency key or event key another row of the same
/// order already answers to
fn check_keys_unique(
    transactions: &[PaymentTransaction],
    transaction: &PaymentTransaction,
) -> StoreResult<()> {
    let keys = transaction
        .idempotency_key
        .iter()
        .chain(transaction.metadata.get(EVENT_KEY));
    for key in keys {
        let taken = transactions.iter().any(|t| {
            t.id != transaction.id && t.order_id == transaction.order_id && t.answers_to_key(key)
        });
        if taken {
            return Err(StoreError::Conflict(format!("key {key} already recorded")));
        }
    }
    Ok(())
}

#[async_trait]
impl CatalogRepository for MemoryStore {
    async fn find_product_by_sku(&self, sku: &str) -> StoreResult<Option<Product>> {
        let tables = self.tables.read().await;
        Ok(tables
            .sku_index
            .get(sku)
            .and_then(|id| tables.products.get(id))
            .cloned())
    }
}

#[async_trait]
impl DiscountRepository for MemoryStore {
    async fn find_discount_by_code(&self, code: &str) -> StoreResult<Option<Discount>> {
        let tables = self.tables.read().await;
        let code = code.trim();
        Ok(tables
            .discounts
            .values()
            .find(|d| d.code.eq_ignore_ascii_case(code))
            .cloned())
    }

    async fn get_discount(&self, id: &str) -> StoreResult<Option<Discount>> {
        let tables = self.tables.read().await;
        Ok(tables.discounts.get(id).cloned())
    }
}

#[async_trait]
impl ShippingRepository for MemoryStore {
    async fn get_shipping_rate(&self, id: &str) -> StoreResult<Option<ShippingRate>> {
        let tables = self.tables.read().await;
        Ok(tables.shipping_rates.iter().find(|r| r.id == id).cloned())
    }

    async fn list_shipping_rates(&self) -> StoreResult<Vec<ShippingRate>> {
        let tables = self.tables.read().await;
        Ok(tables.shipping_rates.clone())
    }
}

#[async_trait]
impl CurrencyRepository for MemoryStore {
    async fn list_currencies(&self) -> StoreResult<Vec<Currency>> {
        let tables = self.tables.read().await;
        let mut currencies: Vec<Currency> = tables.currencies.values().cloned().collect();
        currencies.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(currencies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ProductVariant;
    use crate::checkout::tests::item;
    use crate::gateway::PaymentProvider;
    use chrono::{Duration, Utc};

    async fn store_with_stock(stock: u32) -> MemoryStore {
        let store = MemoryStore::new();
        store
            .put_product(
                Product::new("tshirt", "T-Shirt")
                    .with_variant(ProductVariant::new("tshirt-m", "TSHIRT", 1999, stock)),
            )
            .await;
        store
    }

    fn checkout_with(qty: u32) -> Checkout {
        let mut checkout = Checkout::new("sess", "USD", Utc::now(), Duration::hours(1));
        checkout.upsert_item(item("TSHIRT", 1999, qty));
        checkout
    }

    fn commit_for(checkout: &Checkout, number: &str) -> ConversionCommit {
        ConversionCommit {
            checkout_id: checkout.id,
            order: Order::from_checkout(checkout, number.into(), Utc::now()),
            stock: vec![("TSHIRT".into(), checkout.items[0].quantity)],
            discount_id: None,
            now: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_save_only_while_active() {
        let store = MemoryStore::new();
        let mut checkout = checkout_with(1);
        store.insert_checkout(&checkout).await.unwrap();

        assert!(store
            .transition_checkout(checkout.id, CheckoutStatus::Active, CheckoutStatus::Abandoned)
            .await
            .unwrap());
        // Second CAS from the same state loses
        assert!(!store
            .transition_checkout(checkout.id, CheckoutStatus::Active, CheckoutStatus::Expired)
            .await
            .unwrap());

        checkout.items.clear();
        assert!(matches!(
            store.save_active_checkout(&checkout).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_conversion_commit_is_atomic() {
        let store = store_with_stock(1).await;
        let checkout = checkout_with(2);
        store.insert_checkout(&checkout).await.unwrap();

        let err = store
            .commit_conversion(commit_for(&checkout, "ORD-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InsufficientStock { available: 1, .. }));
        assert_eq!(store.stock_of("TSHIRT").await, Some(1));
        assert!(store.get_checkout(checkout.id).await.unwrap().is_active());
        assert!(store.list_orders(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_one_order_per_checkout() {
        let store = store_with_stock(10).await;
        let checkout = checkout_with(2);
        store.insert_checkout(&checkout).await.unwrap();

        store
            .commit_conversion(commit_for(&checkout, "ORD-1"))
            .await
            .unwrap();
        assert_eq!(store.stock_of("TSHIRT").await, Some(8));
        assert_eq!(
            store.get_checkout(checkout.id).await.unwrap().status,
            CheckoutStatus::Completed
        );

        let again = store.commit_conversion(commit_for(&checkout, "ORD-2")).await;
        assert!(matches!(again, Err(StoreError::Conflict(_))));
        assert_eq!(store.stock_of("TSHIRT").await, Some(8));
    }

    #[tokio::test]
    async fn test_idempotency_key_unique_per_order() {
        let store = MemoryStore::new();
        let checkout = checkout_with(1);
        let order = Order::from_checkout(&checkout, "ORD-1".into(), Utc::now());

        let txn = |key: &str| {
            PaymentTransaction::new(
                &order,
                PaymentProvider::Mock,
                TransactionType::Capture,
                TransactionStatus::Successful,
                1999,
                Utc::now(),
            )
            .with_idempotency_key(Some(key.to_string()))
        };

        store.insert_transaction(&txn("evt_1")).await.unwrap();
        assert!(matches!(
            store.insert_transaction(&txn("evt_1")).await,
            Err(StoreError::Conflict(_))
        ));
        store.insert_transaction(&txn("evt_2")).await.unwrap();
        assert_eq!(store.list_transactions(order.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_order_write_is_compare_and_set() {
        use crate::order::PaymentStatus;

        let store = store_with_stock(10).await;
        let checkout = checkout_with(1);
        store.insert_checkout(&checkout).await.unwrap();
        let order = store
            .commit_conversion(commit_for(&checkout, "ORD-1"))
            .await
            .unwrap();

        let mut first = order.clone();
        first.apply_payment_status(PaymentStatus::Authorized, Utc::now());
        let mut second = order.clone();
        second.apply_payment_status(PaymentStatus::Failed, Utc::now());

        assert!(store.update_order_if(&first, &order).await.unwrap());
        assert!(!store.update_order_if(&second, &order).await.unwrap());

        let stored = store.get_order(order.id).await.unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Authorized);
        assert_eq!(stored.status, OrderStatus::Paid);
    }

    #[tokio::test]
    async fn test_settle_only_once_and_keys_stay_unique() {
        let store = MemoryStore::new();
        let checkout = checkout_with(1);
        let order = Order::from_checkout(&checkout, "ORD-1".into(), Utc::now());

        let pending = PaymentTransaction::new(
            &order,
            PaymentProvider::Mock,
            TransactionType::Authorize,
            TransactionStatus::Pending,
            1999,
            Utc::now(),
        )
        .with_idempotency_key(Some("payment-1".into()));
        store.insert_transaction(&pending).await.unwrap();

        let mut settled = pending.clone();
        settled.status = TransactionStatus::Successful;
        settled.metadata.insert(EVENT_KEY.into(), "evt_1".into());
        store.settle_transaction(&settled).await.unwrap();

        // A second settlement of the same row loses
        assert!(matches!(
            store.settle_transaction(&settled).await,
            Err(StoreError::Conflict(_))
        ));

        // The event key now belongs to the settled row
        let found = store
            .find_transaction_by_idempotency_key(order.id, "evt_1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, pending.id);
        let replay = PaymentTransaction::new(
            &order,
            PaymentProvider::Mock,
            TransactionType::Authorize,
            TransactionStatus::Successful,
            1999,
            Utc::now(),
        )
        .with_idempotency_key(Some("evt_1".into()));
        assert!(matches!(
            store.insert_transaction(&replay).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_used_up_discount_blocks_commit() {
        use crate::discount::DiscountMethod;

        let store = store_with_stock(10).await;
        let mut discount = Discount::basket("d1", "ONCE", DiscountMethod::Fixed(100)).with_usage_limit(1);
        discount.current_usage = 1;
        store.put_discount(discount).await;

        let checkout = checkout_with(1);
        store.insert_checkout(&checkout).await.unwrap();
        let mut commit = commit_for(&checkout, "ORD-1");
        commit.discount_id = Some("d1".into());

        let err = store.commit_conversion(commit).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::DiscountUnavailable(DiscountRejection::UsageLimitReached)
        ));
        assert_eq!(store.stock_of("TSHIRT").await, Some(10));
        assert!(store.get_checkout(checkout.id).await.unwrap().is_active());
    }

    #[tokio::test]
    async fn test_discount_lookup_ignores_case() {
        use crate::discount::DiscountMethod;

        let store = MemoryStore::new();
        store
            .put_discount(Discount::basket("d1", "SAVE20", DiscountMethod::Fixed(2000)))
            .await;
        assert!(store.find_discount_by_code("save20").await.unwrap().is_some());
        assert!(store.find_discount_by_code("SAVE21").await.unwrap().is_none());
    }
}
