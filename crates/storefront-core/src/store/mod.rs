//! # Repository Traits
//!
//! Persistence is consumed through these traits. Races between requests,
//! webhooks and the sweeper are arbitrated here:
//!
//! - `save_active_checkout` only writes over a checkout that is still active
//! - `transition_checkout` is compare-and-set on status
//! - `commit_conversion` re-checks discount availability and applies stock,
//!   discount usage, order and checkout status as one unit
//! - `update_order_if` is compare-and-set on order and payment status
//! - `insert_transaction` and `settle_transaction` reject a second
//!   `(order_id, key)`, where a row answers to its idempotency key and to
//!   the key of the event that settled it
//! - `settle_transaction` only writes over a row that is still pending

mod memory;
mod seed;

pub use memory::MemoryStore;
pub use seed::CatalogSeed;

use crate::catalog::Product;
use crate::checkout::{Checkout, CheckoutStatus};
use crate::discount::Discount;
use crate::error::{ShopResult, StoreResult};
use crate::money::{Currency, CurrencyConverter};
use crate::order::{Order, OrderStatus};
use chrono::{DateTime, Utc};
use crate::shipping::ShippingRate;
use crate::transaction::{PaymentTransaction, TransactionType};
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

#[async_trait]
pub trait CheckoutRepository: Send + Sync {
    /// Store a new checkout
    async fn insert_checkout(&self, checkout: &Checkout) -> StoreResult<()>;

    async fn get_checkout(&self, id: Uuid) -> StoreResult<Checkout>;

    /// Checkout bound to a session cookie, in any status. Session ids are
    /// minted per checkout, so there is at most one.
    async fn find_checkout_by_session(&self, session_id: &str) -> StoreResult<Option<Checkout>>;

    /// Overwrite a checkout, failing with `Conflict` if the stored copy is no
    /// longer active
    async fn save_active_checkout(&self, checkout: &Checkout) -> StoreResult<()>;

    /// Compare-and-set status change. Returns `false` if the stored status
    /// was not `from`.
    async fn transition_checkout(
        &self,
        id: Uuid,
        from: CheckoutStatus,
        to: CheckoutStatus,
    ) -> StoreResult<bool>;

    /// Remove a checkout and its items. Returns `false` if it did not exist.
    async fn delete_checkout(&self, id: Uuid) -> StoreResult<bool>;

    async fn list_checkouts_by_status(
        &self,
        statuses: &[CheckoutStatus],
    ) -> StoreResult<Vec<Checkout>>;
}

/// Everything order conversion writes, committed as one unit
#[derive(Debug, Clone)]
pub struct ConversionCommit {
    pub checkout_id: Uuid,
    pub order: Order,
    /// `(sku, quantity)` to take out of stock
    pub stock: Vec<(String, u32)>,
    /// Discount whose usage counter is incremented
    pub discount_id: Option<String>,
    /// Instant the discount's window and usage limit are checked against
    pub now: DateTime<Utc>,
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Next value of the order-number sequence
    async fn next_order_sequence(&self) -> StoreResult<u64>;

    /// Atomically: require the checkout to be active, require the discount to
    /// still be available (failing with `DiscountUnavailable`), decrement
    /// stock (failing with `InsufficientStock`), bump discount usage, insert
    /// the order and mark the checkout completed. On error nothing is written.
    async fn commit_conversion(&self, commit: ConversionCommit) -> StoreResult<Order>;

    async fn get_order(&self, id: Uuid) -> StoreResult<Order>;

    async fn find_order_by_payment_id(&self, payment_id: &str) -> StoreResult<Option<Order>>;

    async fn list_orders_by_user(&self, user_id: &str) -> StoreResult<Vec<Order>>;

    /// All orders, optionally filtered by status, newest first
    async fn list_orders(&self, status: Option<OrderStatus>) -> StoreResult<Vec<Order>>;

    /// Unconditional overwrite, for orders no provider event can reach yet
    async fn update_order(&self, order: &Order) -> StoreResult<()>;

    /// Overwrite only if the stored order still carries `expected`'s order
    /// and payment status. Returns `false` if another writer got there first.
    async fn update_order_if(&self, order: &Order, expected: &Order) -> StoreResult<bool>;
}

#[async_trait]
pub trait TransactionRepository: Send + Sync {
    /// Fails with `Conflict` on a repeated `(order_id, idempotency_key)`
    async fn insert_transaction(&self, transaction: &PaymentTransaction) -> StoreResult<()>;

    /// Overwrite a pending row. Fails with `Conflict` if the stored row is no
    /// longer pending, or if another row of the order answers to one of its
    /// keys.
    async fn settle_transaction(&self, transaction: &PaymentTransaction) -> StoreResult<()>;

    /// Row of an order that answers to `key`
    async fn find_transaction_by_idempotency_key(
        &self,
        order_id: Uuid,
        key: &str,
    ) -> StoreResult<Option<PaymentTransaction>>;

    /// Most recent pending transaction of a type for an order
    async fn latest_pending_transaction(
        &self,
        order_id: Uuid,
        kind: TransactionType,
    ) -> StoreResult<Option<PaymentTransaction>>;

    /// Oldest first
    async fn list_transactions(&self, order_id: Uuid) -> StoreResult<Vec<PaymentTransaction>>;
}

#[async_trait]
pub trait CatalogRepository: Send + Sync {
    /// Product owning the variant with this SKU
    async fn find_product_by_sku(&self, sku: &str) -> StoreResult<Option<Product>>;
}

#[async_trait]
pub trait DiscountRepository: Send + Sync {
    /// Case-insensitive lookup
    async fn find_discount_by_code(&self, code: &str) -> StoreResult<Option<Discount>>;

    async fn get_discount(&self, id: &str) -> StoreResult<Option<Discount>>;
}

#[async_trait]
pub trait ShippingRepository: Send + Sync {
    async fn get_shipping_rate(&self, id: &str) -> StoreResult<Option<ShippingRate>>;

    async fn list_shipping_rates(&self) -> StoreResult<Vec<ShippingRate>>;
}

#[async_trait]
pub trait CurrencyRepository: Send + Sync {
    async fn list_currencies(&self) -> StoreResult<Vec<Currency>>;
}

/// Every repository the services need
pub trait Store:
    CheckoutRepository
    + OrderRepository
    + TransactionRepository
    + CatalogRepository
    + DiscountRepository
    + ShippingRepository
    + CurrencyRepository
{
}

impl<T> Store for T where
    T: CheckoutRepository
        + OrderRepository
        + TransactionRepository
        + CatalogRepository
        + DiscountRepository
        + ShippingRepository
        + CurrencyRepository
{
}

pub type SharedStore = Arc<dyn Store>;

/// Converter over the current currency table
pub async fn load_converter(store: &dyn Store) -> ShopResult<CurrencyConverter> {
    CurrencyConverter::new(store.list_currencies().await?)
}
