//! # storefront-core
//!
//! Checkout, pricing, order conversion and payment bookkeeping for the
//! storefront-rs engine.
//!
//! This crate provides:
//! - `Checkout` and `CheckoutService` for the session-bound basket
//! - `calculate_totals` for subtotal, discount and shipping arithmetic
//! - `OrderConverter` for turning a checkout into a pending order
//! - `PaymentGateway` trait for implementing payment providers
//! - `PaymentService` and `TransactionLedger` for the payment lifecycle
//! - `ExpirySweeper` for retiring idle checkouts
//! - Repository traits plus the in-memory `MemoryStore`
//!
//! ## Example
//!
//! ```rust,ignore
//! use storefront_core::{CheckoutService, CompleteCheckout};
//!
//! let checkout = service.get_or_create(None, None).await?;
//! service.add_item(&checkout.session_id, "TSHIRT-M", 2).await?;
//! service.set_customer(&checkout.session_id, customer).await?;
//! service.set_shipping_address(&checkout.session_id, address).await?;
//!
//! let submission = service.complete(&checkout.session_id, payment).await?;
//! // Redirect the buyer to submission.action_url if one is set
//! ```

pub mod cart;
pub mod catalog;
pub mod checkout;
pub mod clock;
pub mod conversion;
pub mod discount;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod money;
pub mod notify;
pub mod order;
pub mod orders;
pub mod payments;
pub mod pricing;
pub mod shipping;
pub mod store;
pub mod sweeper;
pub mod transaction;

#[cfg(test)]
mod fixtures;

// Re-exports for convenience
pub use cart::{CheckoutService, CheckoutSettings, CompleteCheckout};
pub use catalog::{Product, ProductVariant};
pub use checkout::{Address, Checkout, CheckoutItem, CheckoutStatus, CustomerDetails};
pub use clock::{Clock, ManualClock, SystemClock};
pub use conversion::OrderConverter;
pub use discount::{AppliedDiscount, Discount, DiscountMethod};
pub use error::{
    DiscountRejection, PaymentError, PaymentResult, ShopError, ShopResult, StoreError, StoreResult,
};
pub use gateway::{
    BoxedPaymentGateway, CardDetails, GatewayReceipt, PaymentAdjustment, PaymentGateway,
    PaymentGateways, PaymentMethod, PaymentOutcome, PaymentProvider, PaymentRequest,
};
pub use ledger::{LedgerOutcome, PaymentEvent, PaymentEventKind, TransactionLedger};
pub use money::{Currency, CurrencyConverter};
pub use notify::{LoggingNotifier, Notifier, NotifyError};
pub use order::{Order, OrderItem, OrderStatus, PaymentStatus};
pub use orders::{Caller, OrderService};
pub use payments::{AmountMode, PaymentService, PaymentSubmission};
pub use pricing::Totals;
pub use shipping::{ShippingOption, ShippingRate};
pub use store::{CatalogSeed, MemoryStore, SharedStore, Store};
pub use sweeper::{ExpirySweeper, SweepReport, SweeperConfig, MIN_SWEEP_INTERVAL};
pub use transaction::{PaymentTransaction, TransactionStatus, TransactionType};
