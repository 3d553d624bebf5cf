//! # Order Types
//!
//! An order is the immutable snapshot of a completed checkout. After
//! creation only its payment status and fulfillment status move.

use crate::checkout::{Address, Checkout, CheckoutItem, CustomerDetails};
use crate::discount::AppliedDiscount;
use crate::gateway::{PaymentMethod, PaymentProvider};
use crate::shipping::ShippingOption;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fulfillment status of an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Pending,
    Paid,
    Shipped,
    Completed,
    Cancelled,
    Failed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Failed => "failed",
        }
    }

    /// Allowed fulfillment transitions
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Paid)
                | (Pending, Cancelled)
                | (Pending, Failed)
                | (Paid, Shipped)
                | (Paid, Cancelled)
                | (Shipped, Completed)
        )
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(OrderStatus::Pending),
            "paid" => Ok(OrderStatus::Paid),
            "shipped" => Ok(OrderStatus::Shipped),
            "completed" => Ok(OrderStatus::Completed),
            "cancelled" => Ok(OrderStatus::Cancelled),
            "failed" => Ok(OrderStatus::Failed),
            other => Err(format!("unknown order status: {other}")),
        }
    }
}

/// Payment status of an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Authorized,
    Captured,
    Refunded,
    Cancelled,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Authorized => "authorized",
            PaymentStatus::Captured => "captured",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::Cancelled => "cancelled",
            PaymentStatus::Failed => "failed",
        }
    }

    /// Whether `next` moves the payment forward from `self`.
    ///
    /// Anything not listed is "at or beyond" and must be ignored, which is
    /// what makes late or duplicate provider events harmless. `Failed` is
    /// only reachable from `Pending`: a failure reported after a successful
    /// authorization belongs to an earlier attempt.
    pub fn can_advance_to(self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        match (self, next) {
            (Pending, Pending) => false,
            (Pending, _) => true,
            (Authorized, Captured | Cancelled) => true,
            (Captured, Refunded) => true,
            (Refunded, Refunded) => true,
            _ => false,
        }
    }

    /// Whether refunds may be recorded against an order in this status
    pub fn is_refundable(self) -> bool {
        matches!(self, PaymentStatus::Captured | PaymentStatus::Refunded)
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A line item frozen at conversion time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: String,
    pub variant_id: String,
    pub sku: String,
    pub name: String,
    pub quantity: u32,
    pub unit_price: i64,
    pub weight: u32,
    /// `quantity × unit_price`
    pub subtotal: i64,
}

impl From<&CheckoutItem> for OrderItem {
    fn from(item: &CheckoutItem) -> Self {
        Self {
            product_id: item.product_id.clone(),
            variant_id: item.variant_id.clone(),
            sku: item.sku.clone(),
            name: item.name.clone(),
            quantity: item.quantity,
            unit_price: item.unit_price,
            weight: item.weight,
            subtotal: item.line_total(),
        }
    }
}

/// A placed order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,

    /// Human-facing unique number, e.g. `ORD-20261016-000042`
    pub order_number: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Originating checkout
    pub checkout_id: Uuid,

    /// Session cookie of the originating checkout (grants read access)
    pub checkout_session_id: String,

    pub currency: String,

    /// Items subtotal
    pub total_amount: i64,
    pub shipping_cost: i64,
    pub discount_amount: i64,
    pub final_amount: i64,
    pub total_weight: u32,

    pub status: OrderStatus,
    pub payment_status: PaymentStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_provider: Option<PaymentProvider>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<PaymentMethod>,

    /// Provider's payment reference (payment intent id, wallet reference)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_payment_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub shipping_address: Option<Address>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub billing_address: Option<Address>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer: Option<CustomerDetails>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub shipping_option: Option<ShippingOption>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied_discount: Option<AppliedDiscount>,

    pub items: Vec<OrderItem>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub paid_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Snapshot a checkout into a new pending order
    pub fn from_checkout(checkout: &Checkout, order_number: String, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_number,
            user_id: checkout.user_id.clone(),
            checkout_id: checkout.id,
            checkout_session_id: checkout.session_id.clone(),
            currency: checkout.currency.clone(),
            total_amount: checkout.totals.subtotal,
            shipping_cost: checkout.totals.shipping_cost,
            discount_amount: checkout.totals.discount_amount,
            final_amount: checkout.totals.final_amount,
            total_weight: checkout.totals.total_weight,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            payment_provider: None,
            payment_method: None,
            external_payment_id: None,
            shipping_address: checkout.shipping_address.clone(),
            billing_address: checkout.effective_billing_address().cloned(),
            customer: checkout.customer.clone(),
            shipping_option: checkout.shipping_option.clone(),
            applied_discount: checkout.applied_discount.clone(),
            items: checkout.items.iter().map(OrderItem::from).collect(),
            created_at: now,
            updated_at: now,
            paid_at: None,
        }
    }

    /// Number of units
    pub fn item_count(&self) -> u32 {
        self.items.iter().map(|i| i.quantity).sum()
    }

    /// Order status a payment status implies, if any
    fn derived_status(payment: PaymentStatus) -> Option<OrderStatus> {
        match payment {
            PaymentStatus::Authorized | PaymentStatus::Captured => Some(OrderStatus::Paid),
            PaymentStatus::Cancelled => Some(OrderStatus::Cancelled),
            PaymentStatus::Failed => Some(OrderStatus::Failed),
            PaymentStatus::Pending | PaymentStatus::Refunded => None,
        }
    }

    /// Whether the order can take payment status `next` while keeping its
    /// order status consistent with it
    pub fn accepts_payment_status(&self, next: PaymentStatus) -> bool {
        if !self.payment_status.can_advance_to(next) {
            return false;
        }
        match Self::derived_status(next) {
            None => true,
            Some(status) if status == self.status => true,
            // Fulfillment already moved past paid
            Some(OrderStatus::Paid) => {
                matches!(self.status, OrderStatus::Shipped | OrderStatus::Completed)
            }
            Some(status) => self.status.can_transition_to(status),
        }
    }

    /// Advance the payment status if `next` moves it forward, deriving the
    /// order status from it. Leaves the order untouched when the pair would
    /// end up inconsistent.
    ///
    /// Returns `true` if this call moved the order into `paid`.
    pub fn apply_payment_status(&mut self, next: PaymentStatus, now: DateTime<Utc>) -> bool {
        if !self.accepts_payment_status(next) {
            return false;
        }
        self.payment_status = next;
        self.updated_at = now;

        match Self::derived_status(next) {
            Some(status) if self.status.can_transition_to(status) => {
                self.status = status;
                if status == OrderStatus::Paid {
                    self.paid_at = Some(now);
                    return true;
                }
                false
            }
            _ => false,
        }
    }
}

/// Format an order number from the creation date and a store sequence
pub fn order_number(now: DateTime<Utc>, sequence: u64) -> String {
    format!("ORD-{}-{:06}", now.format("%Y%m%d"), sequence)
}
