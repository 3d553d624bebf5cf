//! # storefront-gateways
//!
//! Payment provider implementations for storefront-rs.
//!
//! 1. **StripeGateway** - Payment Intents API
//!    - Card payments, captured immediately
//!    - 3-D Secure comes back as a redirect action
//!
//! 2. **MobilePayGateway** - ePayment API
//!    - Wallet payments via redirect
//!    - Capture, refund and cancel as payment modifications
//!    - Force-approve in the test environment
//!
//! 3. **MockGateway** - in-process provider for development and tests
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use storefront_core::PaymentGateways;
//! use storefront_gateways::{StripeConfig, StripeGateway};
//!
//! let mut gateways = PaymentGateways::new();
//! if let Some(config) = StripeConfig::from_env()? {
//!     gateways.register(Arc::new(StripeGateway::new(config)?));
//! }
//! ```
//!
//! ## Webhook Handling
//!
//! ```rust,ignore
//! use storefront_gateways::webhook::{parse_stripe_event, unix_now, verify_stripe_signature};
//!
//! verify_stripe_signature(secret, body, signature_header, unix_now())?;
//! if let Some(event) = parse_stripe_event(body)? {
//!     ledger.record_event(event).await?;
//! }
//! ```

pub mod config;
mod http;
pub mod mobilepay;
pub mod mock;
pub mod stripe;
pub mod webhook;

// Re-exports
pub use config::{MobilePayConfig, StripeConfig};
pub use mobilepay::MobilePayGateway;
pub use mock::MockGateway;
pub use stripe::StripeGateway;
pub use webhook::{
    parse_mobilepay_event, parse_stripe_event, verify_mobilepay_signature,
    verify_stripe_signature, MobilePaySignature, STRIPE_WEBHOOK_EVENTS,
};
